use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_JSON_LEN;
use crate::model::*;
use crate::pricing::PricingRuleSet;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertResource {
        id: Ulid,
        name: Option<String>,
        sport: Option<String>,
        schedule: WeeklySchedule,
        pricing: PricingRuleSet,
    },
    DeleteResource {
        id: Ulid,
    },
    SelectResources,
    InsertSchedule {
        resource_id: Ulid,
        weekday: u8,
        enabled: bool,
        open: Option<SlotTime>,
        close: Option<SlotTime>,
    },
    InsertPricing {
        resource_id: Ulid,
        pricing: PricingRuleSet,
    },
    SelectCalendar {
        resource_id: Ulid,
        month: String,
    },
    InsertBooking {
        id: Ulid,
        resource_id: Ulid,
        date: NaiveDate,
        start: SlotTime,
        duration: BookingDuration,
        party_size: Option<u32>,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBookings {
        resource_id: Ulid,
        date: Option<NaiveDate>,
    },
    InsertClosure {
        resource_id: Ulid,
        date: NaiveDate,
    },
    DeleteClosure {
        resource_id: Ulid,
        date: NaiveDate,
    },
    InsertSlotState {
        resource_id: Ulid,
        date: NaiveDate,
        time: SlotTime,
        enabled: bool,
    },
    SelectPrice {
        resource_id: Ulid,
        date: NaiveDate,
        start: SlotTime,
        duration: BookingDuration,
        party_size: Option<u32>,
    },
    SelectPricingErrors {
        rules: PricingRuleSet,
    },
}

/// Column order assumed when an INSERT omits its column list.
fn default_columns(table: &str) -> Option<&'static [&'static str]> {
    Some(match table {
        "resources" => &["id", "name", "sport", "schedule", "pricing"],
        "schedules" => &["resource_id", "weekday", "enabled", "open", "close"],
        "pricing" => &["resource_id", "rules"],
        "bookings" => &["id", "resource_id", "date", "start", "duration", "party_size"],
        "closures" => &["resource_id", "date"],
        "slot_states" => &["resource_id", "date", "time", "enabled"],
        _ => return None,
    })
}

fn parse_statement(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts =
        Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(stmts.swap_remove(0))
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if sql.trim().is_empty() {
        return Err(SqlError::Empty);
    }
    match parse_statement(sql)? {
        Statement::Insert(insert) => parse_insert(&insert),
        Statement::Delete(delete) => parse_delete(&delete),
        Statement::Query(query) => parse_select(&query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, for describing result columns before the
/// parameters are bound.
pub fn select_table(sql: &str) -> Option<String> {
    match parse_statement(sql).ok()? {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => table_factor_name(&select.from.first()?.relation).ok(),
            _ => None,
        },
        _ => None,
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let columns = default_columns(&table).ok_or_else(|| SqlError::UnknownTable(table.clone()))?;
    let row = insert_row(insert, columns)?;

    match table.as_str() {
        "resources" => Ok(Command::InsertResource {
            id: row.ulid("id")?,
            name: row.opt_text("name")?,
            sport: row.opt_text("sport")?,
            schedule: parse_schedule(&row.text("schedule")?)?,
            pricing: parse_rules(&row.text("pricing")?)?,
        }),
        "schedules" => {
            let weekday = row.int("weekday")?;
            Ok(Command::InsertSchedule {
                resource_id: row.ulid("resource_id")?,
                weekday: u8::try_from(weekday)
                    .map_err(|_| SqlError::InvalidValue("weekday", weekday.to_string()))?,
                enabled: row.bool("enabled")?,
                open: row.opt_time("open")?,
                close: row.opt_time("close")?,
            })
        }
        "pricing" => Ok(Command::InsertPricing {
            resource_id: row.ulid("resource_id")?,
            pricing: parse_rules(&row.text("rules")?)?,
        }),
        "bookings" => Ok(Command::InsertBooking {
            id: row.ulid("id")?,
            resource_id: row.ulid("resource_id")?,
            date: row.date("date")?,
            start: row.time("start")?,
            duration: row.duration("duration")?,
            party_size: row.opt_u32("party_size")?,
        }),
        "closures" => Ok(Command::InsertClosure {
            resource_id: row.ulid("resource_id")?,
            date: row.date("date")?,
        }),
        "slot_states" => Ok(Command::InsertSlotState {
            resource_id: row.ulid("resource_id")?,
            date: row.date("date")?,
            time: row.time("time")?,
            enabled: row.bool("enabled")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Fields::from_filter(delete.selection.as_ref())?;

    match table.as_str() {
        "resources" => Ok(Command::DeleteResource { id: filters.ulid("id")? }),
        "bookings" => Ok(Command::DeleteBooking { id: filters.ulid("id")? }),
        "closures" => Ok(Command::DeleteClosure {
            resource_id: filters.ulid("resource_id")?,
            date: filters.date("date")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&from.relation)?;
    let filters = Fields::from_filter(select.selection.as_ref())?;

    match table.as_str() {
        "resources" => Ok(Command::SelectResources),
        "calendar" => Ok(Command::SelectCalendar {
            resource_id: filters.ulid("resource_id")?,
            month: filters.text("month")?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            resource_id: filters.ulid("resource_id")?,
            date: filters.opt_date("date")?,
        }),
        "price" => Ok(Command::SelectPrice {
            resource_id: filters.ulid("resource_id")?,
            date: filters.date("date")?,
            start: filters.time("start")?,
            duration: filters.duration("duration")?,
            party_size: filters.opt_u32("party_size")?,
        }),
        "pricing_errors" => Ok(Command::SelectPricingErrors {
            rules: parse_rules(&filters.text("rules")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_rules(json: &str) -> Result<PricingRuleSet, SqlError> {
    if json.len() > MAX_JSON_LEN {
        return Err(SqlError::InvalidValue("rules", "JSON document too large".into()));
    }
    PricingRuleSet::from_json(json).map_err(|e| SqlError::InvalidValue("rules", e))
}

/// A schedule is either `{"days": [...]}` or a bare array of seven entries,
/// Sunday first.
fn parse_schedule(json: &str) -> Result<WeeklySchedule, SqlError> {
    if json.len() > MAX_JSON_LEN {
        return Err(SqlError::InvalidValue("schedule", "JSON document too large".into()));
    }
    let bad = |e: serde_json::Error| SqlError::InvalidValue("schedule", e.to_string());
    let value: serde_json::Value = serde_json::from_str(json).map_err(bad)?;
    if value.is_array() {
        let days: Vec<DaySchedule> = serde_json::from_value(value).map_err(bad)?;
        let days: [DaySchedule; 7] = days.try_into().map_err(|d: Vec<DaySchedule>| {
            SqlError::InvalidValue("schedule", format!("expected 7 weekdays, got {}", d.len()))
        })?;
        Ok(WeeklySchedule { days })
    } else {
        serde_json::from_value(value).map_err(bad)
    }
}

// ── Field access ──────────────────────────────────────────────

/// Named scalar values from an INSERT row or a WHERE conjunction.
struct Fields {
    values: HashMap<String, Expr>,
}

impl Fields {
    fn from_filter(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut values = HashMap::new();
        if let Some(expr) = selection {
            collect_eq_filters(expr, &mut values)?;
        }
        Ok(Self { values })
    }

    /// Present and not NULL.
    fn get(&self, col: &'static str) -> Option<&Expr> {
        self.values
            .get(col)
            .filter(|e| !matches!(extract_value(e), Some(Value::Null)))
    }

    fn required(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingField(col))
    }

    fn text(&self, col: &'static str) -> Result<String, SqlError> {
        expr_text(self.required(col)?, col)
    }

    fn opt_text(&self, col: &'static str) -> Result<Option<String>, SqlError> {
        self.get(col).map(|e| expr_text(e, col)).transpose()
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        let s = self.text(col)?;
        Ulid::from_string(&s).map_err(|e| SqlError::InvalidValue(col, format!("bad ULID '{s}': {e}")))
    }

    fn date(&self, col: &'static str) -> Result<NaiveDate, SqlError> {
        parse_date(&self.text(col)?).map_err(|e| SqlError::InvalidValue(col, e))
    }

    fn opt_date(&self, col: &'static str) -> Result<Option<NaiveDate>, SqlError> {
        match self.opt_text(col)? {
            Some(s) => parse_date(&s).map(Some).map_err(|e| SqlError::InvalidValue(col, e)),
            None => Ok(None),
        }
    }

    fn time(&self, col: &'static str) -> Result<SlotTime, SqlError> {
        self.text(col)?.parse().map_err(|e| SqlError::InvalidValue(col, e))
    }

    fn opt_time(&self, col: &'static str) -> Result<Option<SlotTime>, SqlError> {
        match self.opt_text(col)? {
            Some(s) => s.parse().map(Some).map_err(|e| SqlError::InvalidValue(col, e)),
            None => Ok(None),
        }
    }

    fn duration(&self, col: &'static str) -> Result<BookingDuration, SqlError> {
        self.text(col)?.parse().map_err(|e| SqlError::InvalidValue(col, e))
    }

    fn int(&self, col: &'static str) -> Result<i64, SqlError> {
        let s = self.text(col)?;
        s.trim()
            .parse()
            .map_err(|_| SqlError::InvalidValue(col, format!("expected integer, got '{s}'")))
    }

    fn opt_u32(&self, col: &'static str) -> Result<Option<u32>, SqlError> {
        if self.get(col).is_none() {
            return Ok(None);
        }
        let v = self.int(col)?;
        u32::try_from(v)
            .map(Some)
            .map_err(|_| SqlError::InvalidValue(col, format!("{v} out of range")))
    }

    fn bool(&self, col: &'static str) -> Result<bool, SqlError> {
        let expr = self.required(col)?;
        if let Some(Value::Boolean(b)) = extract_value(expr) {
            return Ok(*b);
        }
        let s = expr_text(expr, col)?;
        match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::InvalidValue(col, format!("bad bool '{s}'"))),
        }
    }
}

fn collect_eq_filters(expr: &Expr, out: &mut HashMap<String, Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.insert(col, (**right).clone());
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// The single VALUES row of an INSERT, keyed by column name.
fn insert_row(insert: &ast::Insert, defaults: &[&'static str]) -> Result<Fields, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let row = match rows.as_slice() {
        [row] => row,
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if row.len() > columns.len() {
        return Err(SqlError::WrongArity(columns.len(), row.len()));
    }
    let values = columns.into_iter().zip(row.iter().cloned()).collect();
    Ok(Fields { values })
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

/// Any scalar literal as text. Negative numbers keep their sign.
fn expr_text(expr: &Expr, col: &'static str) -> Result<String, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(format!("-{}", expr_text(expr, col)?));
    }
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(Value::Boolean(b)) => Ok(b.to_string()),
        Some(other) => Err(SqlError::InvalidValue(col, format!("unexpected literal {other}"))),
        None => Err(SqlError::InvalidValue(col, format!("expected a literal, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(usize, usize),
    MissingField(&'static str),
    InvalidValue(&'static str, String),
}

impl SqlError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::UnknownTable(_) => "42P01",
            SqlError::Unsupported(_) => "0A000",
            SqlError::InvalidValue(..) => "22023",
            _ => "42601",
        }
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected at most {expected} values, got {got}")
            }
            SqlError::MissingField(col) => write!(f, "missing value for {col}"),
            SqlError::InvalidValue(col, msg) => write!(f, "invalid {col}: {msg}"),
        }
    }
}

impl std::error::Error for SqlError {}
