//! Shared domain types and database access for the EV fleet telemetry stack.
//!
//! `domain` holds the sample/state/session types exchanged between the
//! ingestion service, the durable queue and the HTTP surface. `db` holds the
//! schema DDL and every query the services run against Postgres.

pub mod db;
pub mod domain;
