//! # kq-core
//!
//! Answers dashboard aggregation requests from a SQL-speaking search daemon.
//!
//! The nested aggregation tree of a request is flattened into a [`NodeSet`],
//! compiled into one grouped SphinxQL statement per physical table, and the
//! flat rows that come back are rebuilt into the nested bucket response.
//!
//! ```text
//! request JSON ──► RequestParser ──► NodeSet
//!                                      │  request passes (per table)
//!                                      ▼
//!                                  SqlRequest ──► SqlExecutor
//!                                                     │
//!                      response passes ◄── ResultRow ◄┘
//!                             │
//!                             ▼
//!                      ResponseBuilder ──► response JSON
//! ```

pub mod catalog;
pub mod date;
pub mod engine;
pub mod error;
pub mod executor;
pub mod filter;
pub mod node;
pub mod node_set;
pub mod parser;
pub mod request_logic;
pub mod response;
pub mod response_logic;
pub mod row;
pub mod sql;
pub mod tree;

pub use catalog::{FieldCatalog, StaticCatalog, TableFields};
pub use engine::{plan_tables, AggregationEngine, EngineSettings, TablePlan};
pub use error::{AggError, FilterError, Result};
pub use executor::{ExecutionResult, SqlExecutor};
pub use node::{Node, NodeKind};
pub use node_set::NodeSet;
pub use parser::RequestParser;
pub use response::ResponseBuilder;
pub use row::{ResultRow, RowOrigin};
pub use sql::SqlRequest;
