//! # Building Assistant
//!
//! Operations assistant for smart buildings: answers questions from the
//! building's manuals and maintenance logs, reports equipment health from
//! live sensor readings, and runs a tool-using agent that combines both.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  PDF / CSV  │──▶│ Split+Embed  │──▶│ Vector index │
//! │  uploads    │   │              │   │ SQLite / pg  │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!   ┌──────────┐   ┌───────────┐        ┌─────┴──────┐
//!   │ sensors  │──▶│ predictor │───────▶│   agent    │◀── LLM
//!   └──────────┘   └───────────┘        └─────┬──────┘
//!                                             │
//!                      ┌──────────────────────┤
//!                      ▼                      ▼
//!                 ┌──────────┐          ┌──────────┐
//!                 │   CLI    │          │   HTTP   │
//!                 │  (bldg)  │          │  (axum)  │
//!                 └──────────┘          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! bldg init                         # create index + sensor_history
//! bldg ingest ./manuals             # index PDFs and CSVs
//! bldg ask "How often should the AHU filters be replaced?"
//! bldg health HVAC-01
//! bldg serve                        # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Chunks, hits and citations |
//! | [`error`] | Domain error taxonomy |
//! | [`extract`] | PDF and CSV text extraction |
//! | [`chunk`] | Overlapping text splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector index backends |
//! | [`rag`] | Ingestion and grounded answers |
//! | [`llm`] | Chat model abstraction |
//! | [`sensors`] | Live readings and sensor history |
//! | [`predict`] | Failure probability |
//! | [`sql`] | Read-only SQL for the agent |
//! | [`tools`] | Agent tools |
//! | [`agent`] | Bounded tool-calling loop |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connections |
//! | [`migrate`] | Schema setup |

pub mod agent;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod predict;
pub mod rag;
pub mod remote;
pub mod sensors;
pub mod server;
pub mod services;
pub mod sql;
pub mod store;
pub mod tools;
