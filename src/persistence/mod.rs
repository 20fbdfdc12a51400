//! The Postgres-backed relational store: schema DDL plus the idempotent
//! batch writers the flushers call.

pub mod repository;
pub mod schema;
