//! Campo: a facility slot calendar and deterministic pricing engine served
//! over the PostgreSQL wire protocol.

pub mod auth;
pub mod calendar;
pub mod clock;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pricing;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
