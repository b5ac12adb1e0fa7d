use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use campo::auth::OwnerAuthorizer;
use campo::clock::SystemClock;
use campo::engine::{Engine, EngineSettings};
use campo::notify::NotifyHub;
use campo::wire;

const SCHEDULE: &str = r#"[{"enabled":true,"open":"08:00","close":"22:00"},{"enabled":true,"open":"08:00","close":"22:00"},{"enabled":true,"open":"08:00","close":"22:00"},{"enabled":true,"open":"08:00","close":"22:00"},{"enabled":true,"open":"08:00","close":"22:00"},{"enabled":true,"open":"08:00","close":"22:00"},{"enabled":true,"open":"08:00","close":"22:00"}]"#;
const PRICING: &str = r#"{"mode":"flat","flat":{"oneHour":"40","oneHourHalf":"56"}}"#;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("campo_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(
        Engine::new(
            dir.join("campo.wal"),
            Arc::new(NotifyHub::new()),
            Arc::new(SystemClock),
            Arc::new(OwnerAuthorizer::new()),
            EngineSettings::default(),
        )
        .unwrap(),
    );

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "campo".to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr, user: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("campo")
        .user(user)
        .password("campo");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn affected(client: &Client, sql: &str) -> u64 {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .find_map(|m| match m {
            SimpleQueryMessage::CommandComplete(n) => Some(n),
            _ => None,
        })
        .unwrap()
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<&str> {
    err.code().map(|c| c.code())
}

/// A date one week out, safely inside the default horizon.
fn next_week() -> NaiveDate {
    chrono::Local::now().date_naive() + Days::new(7)
}

async fn create_court(client: &Client) -> Ulid {
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO resources (id, name, sport, schedule, pricing) VALUES ('{rid}', 'Court 1', 'padel', '{SCHEDULE}', '{PRICING}')"
        ))
        .await
        .unwrap();
    rid
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn resource_is_listed_with_owner() {
    let addr = start_test_server().await;
    let client = connect(addr, "club").await;
    let rid = create_court(&client).await;

    let listed = rows(&client, "SELECT * FROM resources").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("id"), Some(rid.to_string().as_str()));
    assert_eq!(listed[0].get("owner"), Some("club"));
    assert_eq!(listed[0].get("sport"), Some("padel"));
    assert_eq!(listed[0].get("active"), Some("t"));
}

#[tokio::test]
async fn booking_flow_over_the_wire() {
    let addr = start_test_server().await;
    let owner = connect(addr, "club").await;
    let player = connect(addr, "ana").await;
    let rid = create_court(&owner).await;
    let date = next_week();
    let month = date.format("%Y-%m");

    let bid = Ulid::new();
    let n = affected(
        &player,
        &format!(
            "INSERT INTO bookings (id, resource_id, date, start, duration, party_size) VALUES ('{bid}', '{rid}', '{date}', '14:00', '1.5h', 4)"
        ),
    )
    .await;
    assert_eq!(n, 1);

    let bookings = rows(
        &player,
        &format!("SELECT * FROM bookings WHERE resource_id = '{rid}' AND date = '{date}'"),
    )
    .await;
    assert_eq!(bookings.len(), 1);
    let b = &bookings[0];
    assert_eq!(b.get("id"), Some(bid.to_string().as_str()));
    assert_eq!(b.get("end"), Some("15:30"));
    assert_eq!(b.get("duration"), Some("1.5h"));
    assert_eq!(b.get("price").map(|p| p.parse::<f64>().unwrap()), Some(56.0));
    assert_eq!(b.get("per_person").map(|p| p.parse::<f64>().unwrap()), Some(14.0));
    assert_eq!(b.get("requester"), Some("ana"));
    assert_eq!(b.get("status"), Some("confirmed"));

    let calendar = rows(
        &player,
        &format!("SELECT * FROM calendar WHERE resource_id = '{rid}' AND month = '{month}'"),
    )
    .await;
    let day = date.to_string();
    let held: Vec<_> = calendar
        .iter()
        .filter(|r| r.get("date") == Some(day.as_str()) && r.get("enabled") == Some("f"))
        .map(|r| r.get("time").unwrap().to_string())
        .collect();
    assert_eq!(held, vec!["14:00", "14:30"]);

    // Overlapping second booking is refused with an exclusion-violation code.
    let err = player
        .simple_query(&format!(
            "INSERT INTO bookings (id, resource_id, date, start, duration) VALUES ('{}', '{rid}', '{date}', '14:30', '1h')",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23P01"));

    // Strangers cannot cancel, the booker can.
    let stranger = connect(addr, "mallory").await;
    let err = stranger
        .simple_query(&format!("DELETE FROM bookings WHERE id = '{bid}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("42501"));
    assert_eq!(
        affected(&player, &format!("DELETE FROM bookings WHERE id = '{bid}'")).await,
        1
    );
    let err = player
        .simple_query(&format!("DELETE FROM bookings WHERE id = '{bid}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("55000"));
}

#[tokio::test]
async fn closure_reports_cancelled_bookings() {
    let addr = start_test_server().await;
    let owner = connect(addr, "club").await;
    let player = connect(addr, "ana").await;
    let rid = create_court(&owner).await;
    let date = next_week();

    for start in ["09:00", "18:00"] {
        player
            .batch_execute(&format!(
                "INSERT INTO bookings (id, resource_id, date, start, duration) VALUES ('{}', '{rid}', '{date}', '{start}', '1h')",
                Ulid::new()
            ))
            .await
            .unwrap();
    }

    let err = player
        .simple_query(&format!(
            "INSERT INTO closures (resource_id, date) VALUES ('{rid}', '{date}')"
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("42501"));

    let cancelled = affected(
        &owner,
        &format!("INSERT INTO closures (resource_id, date) VALUES ('{rid}', '{date}')"),
    )
    .await;
    assert_eq!(cancelled, 2);

    let statuses: Vec<_> = rows(
        &owner,
        &format!("SELECT * FROM bookings WHERE resource_id = '{rid}'"),
    )
    .await
    .iter()
    .map(|r| r.get("status").unwrap().to_string())
    .collect();
    assert_eq!(statuses, vec!["cancelled", "cancelled"]);

    assert_eq!(
        affected(
            &owner,
            &format!("DELETE FROM closures WHERE resource_id = '{rid}' AND date = '{date}'"),
        )
        .await,
        1
    );
}

#[tokio::test]
async fn price_preview_and_rule_check() {
    let addr = start_test_server().await;
    let client = connect(addr, "club").await;
    let rid = create_court(&client).await;
    let date = next_week();

    let quote = rows(
        &client,
        &format!(
            "SELECT * FROM price WHERE resource_id = '{rid}' AND date = '{date}' AND start = '10:00' AND duration = '1h'"
        ),
    )
    .await;
    assert_eq!(quote.len(), 1);
    assert_eq!(quote[0].get("total").map(|p| p.parse::<f64>().unwrap()), Some(40.0));
    assert_eq!(quote[0].get("per_person"), None);
    assert_eq!(quote[0].get("level"), Some("flat"));

    let errors = rows(
        &client,
        r#"SELECT * FROM pricing_errors WHERE rules = '{"mode":"advanced"}'"#,
    )
    .await;
    assert!(!errors.is_empty());

    let errors = rows(
        &client,
        &format!("SELECT * FROM pricing_errors WHERE rules = '{PRICING}'"),
    )
    .await;
    assert!(errors.is_empty());
}

#[tokio::test]
async fn bad_statements_get_sql_errors() {
    let addr = start_test_server().await;
    let client = connect(addr, "club").await;

    let err = client.simple_query("SELECT * FROM holds").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("42P01"));

    let err = client
        .simple_query(&format!(
            "SELECT * FROM calendar WHERE resource_id = '{}' AND month = '2025-06'",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("P0002"));

    let err = client.simple_query("UPDATE bookings SET x = 1").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("0A000"));
}
