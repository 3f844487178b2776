//! # Alert Harness
//!
//! Periodic ingestion of a public weather-alert feed with batch diffing,
//! per-subscriber rules and push/email notification.
//!
//! Every cycle stores the full feed snapshot as an immutable batch, works out
//! which alerts are new against a bounded window of recent history, runs each
//! subscriber's rules over the new alerts, and delivers one digest per
//! subscriber through every channel it has credentials for.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │ HttpFeed │──▶│ ingest (tx)  │──▶│  SQLite  │
//! └──────────┘   └──────┬───────┘   └────┬─────┘
//!                       ▼                │
//!          retention ─▶ diff ─▶ rules ─▶ dispatch ──▶ push / email
//!                                        │
//!                      ┌─────────────────┤
//!                      ▼                 ▼
//!                 ┌──────────┐     ┌──────────┐
//!                 │   CLI    │     │   HTTP   │
//!                 │  (alh)   │     │  (axum)  │
//!                 └──────────┘     └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! alh init                                   # create database
//! alh config add --send-key SCT... --alert-levels 红色,橙色
//! alh update                                 # run one cycle
//! alh alerts --level 红色
//! alh serve                                  # HTTP API + scheduler
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`codes`] | Disaster-type and severity-level tables |
//! | [`connector_feed`] | Feed fetch and decode |
//! | [`ingest`] | Atomic batch persistence |
//! | [`retention`] | Alert and log pruning |
//! | [`diff`] | New-vs-repeat classification |
//! | [`rules`] | Subscriber rule engine |
//! | [`digest`] | Notification rendering |
//! | [`channel_push`] | Push API channel |
//! | [`channel_email`] | SMTP channel |
//! | [`dispatch`] | Per-subscriber delivery and audit log |
//! | [`pipeline`] | One cycle, single-flight |
//! | [`scheduler`] | Periodic trigger |
//! | [`subscriptions`] | Config and rule CRUD |
//! | [`query`] | Latest-batch query |
//! | [`monitor`] | Overview and health |
//! | [`server`] | HTTP API |
//! | [`traits`] | `FeedSource` and `Channel` seams |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod channel_email;
pub mod channel_push;
pub mod codes;
pub mod config;
pub mod connector_feed;
pub mod db;
pub mod diff;
pub mod digest;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod monitor;
pub mod pipeline;
pub mod query;
pub mod retention;
pub mod rules;
pub mod scheduler;
pub mod server;
pub mod subscriptions;
pub mod traits;
