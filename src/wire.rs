use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type, METADATA_USER};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::CampoAuthSource;
use crate::engine::{BookingRequest, Engine, EngineError, NewResource};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::pricing::{validate, Quote};
use crate::sql::{self, Command, SqlError};

pub struct CampoHandler {
    engine: Arc<Engine>,
    query_parser: Arc<CampoQueryParser>,
}

impl CampoHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(CampoQueryParser),
        }
    }

    /// The login user name is the requester identity.
    fn requester<C: ClientInfo>(client: &C) -> PgWireResult<String> {
        client
            .metadata()
            .get(METADATA_USER)
            .filter(|u| !u.is_empty())
            .cloned()
            .ok_or_else(|| user_error("28000", "no user in startup packet".into()))
    }

    async fn run(&self, requester: &str, sql: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(requester, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        debug!(command = label, status, requester, "query");
        result
    }

    async fn execute_command(&self, requester: &str, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertResource {
                id,
                name,
                sport,
                schedule,
                pricing,
            } => {
                engine
                    .create_resource(NewResource {
                        id,
                        owner: requester.to_string(),
                        name,
                        sport,
                        schedule,
                        pricing,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteResource { id } => {
                engine.deactivate_resource(id, requester).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectResources => {
                let resources = engine.list_resources().await;
                let schema = Arc::new(resources_schema());
                let rows: Vec<PgWireResult<DataRow>> = resources
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.owner)?;
                        encoder.encode_field(&r.name)?;
                        encoder.encode_field(&r.sport)?;
                        encoder.encode_field(&r.active)?;
                        encoder.encode_field(&r.horizon.map(|d| d.to_string()))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::InsertSchedule {
                resource_id,
                weekday,
                enabled,
                open,
                close,
            } => {
                let change = engine
                    .update_weekly_schedule(resource_id, weekday, enabled, open, close, requester)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("INSERT").with_rows(change.reprojected),
                )])
            }
            Command::InsertPricing {
                resource_id,
                pricing,
            } => {
                engine
                    .update_pricing(resource_id, pricing, requester)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectCalendar { resource_id, month } => {
                let days = engine
                    .get_calendar_month(resource_id, &month)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(calendar_schema());
                Ok(vec![query_response(schema.clone(), calendar_rows(&schema, &days))])
            }
            Command::InsertBooking {
                id,
                resource_id,
                date,
                start,
                duration,
                party_size,
            } => {
                engine
                    .create_booking(BookingRequest {
                        id,
                        resource_id,
                        date,
                        start,
                        duration,
                        requester: requester.to_string(),
                        party_size,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteBooking { id } => {
                engine.cancel_booking(id, requester).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectBookings { resource_id, date } => {
                let bookings = engine
                    .list_bookings(resource_id, date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(bookings_schema());
                let rows = bookings.iter().map(|b| encode_booking(&schema, b)).collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::InsertClosure { resource_id, date } => {
                let cancelled = engine
                    .close_day(resource_id, date, requester)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(cancelled))])
            }
            Command::DeleteClosure { resource_id, date } => {
                engine
                    .reopen_day(resource_id, date, requester)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertSlotState {
                resource_id,
                date,
                time,
                enabled,
            } => {
                engine
                    .set_slot_enabled(resource_id, date, time, enabled, requester)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectPrice {
                resource_id,
                date,
                start,
                duration,
                party_size,
            } => {
                let quote = engine
                    .quote(resource_id, date, start, duration, party_size)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(price_schema());
                let row = encode_quote(&schema, &quote);
                Ok(vec![query_response(schema, vec![row])])
            }
            Command::SelectPricingErrors { rules } => {
                let schema = Arc::new(pricing_errors_schema());
                let rows: Vec<PgWireResult<DataRow>> = validate(&rules)
                    .into_iter()
                    .map(|error| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&error)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
        }
    }
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// One row per slot. A day without slots still gets one row, with a NULL time.
fn calendar_rows(schema: &Arc<Vec<FieldInfo>>, days: &[CalendarDay]) -> Vec<PgWireResult<DataRow>> {
    let mut rows = Vec::new();
    for day in days {
        if day.slots.is_empty() {
            rows.push(encode_calendar_row(schema, day, None));
        }
        for slot in &day.slots {
            rows.push(encode_calendar_row(schema, day, Some(slot)));
        }
    }
    rows
}

fn encode_calendar_row(
    schema: &Arc<Vec<FieldInfo>>,
    day: &CalendarDay,
    slot: Option<&Slot>,
) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&day.date.to_string())?;
    encoder.encode_field(&slot.map(|s| s.time.to_string()))?;
    encoder.encode_field(&slot.map(|s| s.enabled))?;
    encoder.encode_field(&day.closed)?;
    Ok(encoder.take_row())
}

fn encode_booking(schema: &Arc<Vec<FieldInfo>>, b: &Booking) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.resource_id.to_string())?;
    encoder.encode_field(&b.date.to_string())?;
    encoder.encode_field(&b.start.to_string())?;
    encoder.encode_field(&b.end.to_string())?;
    encoder.encode_field(&b.duration.to_string())?;
    encoder.encode_field(&b.price.to_string())?;
    encoder.encode_field(&b.per_person.map(|p| p.to_string()))?;
    encoder.encode_field(&b.party_size.map(|n| n as i32))?;
    encoder.encode_field(&b.pricing_level.as_str().to_string())?;
    encoder.encode_field(&b.requester)?;
    encoder.encode_field(&b.status.as_str().to_string())?;
    Ok(encoder.take_row())
}

fn encode_quote(schema: &Arc<Vec<FieldInfo>>, quote: &Quote) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&quote.total.to_string())?;
    encoder.encode_field(&quote.per_person.map(|p| p.to_string()))?;
    encoder.encode_field(&quote.level.as_str().to_string())?;
    Ok(encoder.take_row())
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn resources_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("owner"),
        text_field("name"),
        text_field("sport"),
        field("active", Type::BOOL),
        text_field("horizon"),
    ]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date"),
        text_field("time"),
        field("enabled", Type::BOOL),
        field("closed", Type::BOOL),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("resource_id"),
        text_field("date"),
        text_field("start"),
        text_field("end"),
        text_field("duration"),
        field("price", Type::NUMERIC),
        field("per_person", Type::NUMERIC),
        field("party_size", Type::INT4),
        text_field("pricing_level"),
        text_field("requester"),
        text_field("status"),
    ]
}

fn price_schema() -> Vec<FieldInfo> {
    vec![
        field("total", Type::NUMERIC),
        field("per_person", Type::NUMERIC),
        text_field("level"),
    ]
}

fn pricing_errors_schema() -> Vec<FieldInfo> {
    vec![text_field("error")]
}

/// Result columns for a statement, empty for anything that is not a SELECT.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::select_table(sql).as_deref() {
        Some("resources") => resources_schema(),
        Some("calendar") => calendar_schema(),
        Some("bookings") => bookings_schema(),
        Some("price") => price_schema(),
        Some("pricing_errors") => pricing_errors_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for CampoHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let requester = Self::requester(client)?;
        self.run(&requester, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CampoQueryParser;

#[async_trait]
impl QueryParser for CampoQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CampoHandler {
    type Statement = String;
    type QueryParser = CampoQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let requester = Self::requester(client)?;
        let sql = substitute_params(portal);
        let mut responses = self.run(&requester, &sql).await?;
        responses
            .pop()
            .ok_or_else(|| user_error("XX000", "statement produced no response".into()))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute `$1, $2, ...` with the bound text parameters, quoted.
fn substitute_params(portal: &Portal<String>) -> String {
    substitute(&portal.statement.statement, &portal.parameters)
}

fn quote_param(param: &Option<Bytes>) -> String {
    match param {
        Some(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            format!("'{}'", text.replace('\'', "''"))
        }
        None => "NULL".to_string(),
    }
}

/// One left-to-right pass: each placeholder is replaced once, bound values
/// are never rescanned, and `$N` inside a string literal is left alone.
fn substitute(sql: &str, params: &[Option<Bytes>]) -> String {
    let bytes = sql.as_bytes();
    let mut result = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let param = sql[start..end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|idx| params.get(idx));
                match param {
                    Some(param) => {
                        result.push_str(&sql[copied..i]);
                        result.push_str(&quote_param(param));
                        copied = end;
                        i = end;
                    }
                    None => i = start,
                }
            }
            _ => i += 1,
        }
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CampoFactory {
    handler: Arc<CampoHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CampoAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CampoFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = CampoAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CampoHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CampoFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(CampoFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.is_fatal() {
        tracing::error!("store failure: {e}");
    }
    user_error(e.sqlstate(), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(e.sqlstate(), e.to_string())
}
