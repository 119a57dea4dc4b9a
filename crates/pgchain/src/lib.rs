//! # pgchain
//!
//! A fluent, parameter-safe PostgreSQL table query layer.
//!
//! ## Features
//!
//! - **Chainable builder**: filters, ordering, paging and one mutation per query
//! - **Injection-safe**: every value is bound to a `$n` placeholder
//! - **Uniform results**: every execution returns an [`Envelope`] `{data, error, count}`
//! - **Pooled**: one bounded `deadpool-postgres` pool, connections released on every path
//!
//! ## Usage
//!
//! ```ignore
//! use pgchain::{Database, OrderOptions, PoolConfig};
//! use serde_json::json;
//!
//! let db = Database::connect(&PoolConfig::from_env()?)?;
//!
//! // SELECT
//! let open = db
//!     .for_table("todos")
//!     .select("id, title")
//!     .eq("status", "open")
//!     .order("created_at", OrderOptions::descending())
//!     .limit(20)
//!     .await;
//!
//! // INSERT ... RETURNING
//! let created = db
//!     .for_table("todos")
//!     .insert(&json!({"title": "write docs", "status": "open"}))
//!     .select("id")
//!     .single()
//!     .await;
//!
//! // UPDATE
//! db.for_table("todos")
//!     .update(&json!({"status": "done"}))
//!     .eq("id", 7)
//!     .await;
//!
//! // Raw SQL
//! let counts = db
//!     .raw_query("SELECT status, count(*) FROM todos GROUP BY status", &[])
//!     .await;
//! ```
//!
//! The process-wide instance is available through [`init`], [`database`] and
//! [`for_table`].

pub mod builder;
pub mod client;
pub mod config;
pub mod database;
pub mod envelope;
pub mod error;
pub mod exec;
pub mod filter;
pub mod pool;
pub mod row;
pub mod stmt;
mod trace;
pub mod value;

pub use builder::TableQuery;
pub use client::{GenericClient, QueryOutput};
pub use config::PoolConfig;
pub use database::{Database, database, for_table, init};
pub use envelope::{Data, Envelope};
pub use error::{DbError, DbResult};
pub use exec::run_plan;
pub use filter::{Filter, FilterValue, Operator, compile_where, shift_placeholders};
pub use pool::{PoolStatus, create_pool};
pub use row::Record;
pub use stmt::{CompiledStatement, OrderOptions, Plan, QueryState, StatementKind};
pub use value::Value;
