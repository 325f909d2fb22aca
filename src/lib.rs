//! Construction Finance Bot Core
//!
//! A conversational assistant core for tracking construction-site money:
//! - Guides users through multi-step dialogs (objects, expenses, advances)
//! - Turns free-form text and voice into structured candidate records
//! - Requires explicit confirmation before anything reaches the ledger
//! - Commits at most once per confirmation, even under retransmits
//! - Computes profit and profitability deterministically (LLM excluded
//!   from all arithmetic)
//!
//! LOOP:
//! EVENT → AUTHORIZE → FLOW STEP → EXTRACT? → CONFIRM → COMMIT → REPORT

pub mod admin;
pub mod calc;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extraction;
pub mod files;
pub mod flow;
pub mod models;
pub mod report;
pub mod store;

pub use error::{BotError, Result};

// Re-export common types
pub use dispatch::Dispatcher;
pub use flow::{FlowEngine, FlowKind, FlowOutcome};
pub use models::*;
pub use store::{InMemoryLedgerStore, LedgerStore};
