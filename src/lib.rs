//! FinVoice Orchestrator
//!
//! Conversational finance assistant built around a turn engine that:
//! - Streams model output to the caller as it is produced
//! - Lets the model call bookkeeping and market tools, feeding results back
//! - Checkpoints every stable point of a turn with optimistic versioning
//! - Resumes unanswered tool calls after a crash
//!
//! TURN LOOP:
//! RECOVER → MODEL → TOOLS? → MODEL → ... → DONE

pub mod agent;
pub mod api;
pub mod bootstrap;
pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod stream;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use agent::Orchestrator;
pub use models::*;
pub use stream::{TurnReport, TurnStream};
