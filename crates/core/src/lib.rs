//! # Campusd Core
//!
//! Domain types, traits, and error definitions for the Campusd campus-admin
//! agent backend. This crate has **zero framework dependencies** — it defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod reasoner;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{FunctionCall, Message, Role, Session, SessionId};
pub use reasoner::{Reasoner, ReasonerReply, ReasonerRequest, StreamFragment};
pub use store::{
    ActivityRecord, CampusStore, ConversationStore, DepartmentCount, EmailRecord, StudentRecord,
    StudentUpdate,
};
pub use tool::{Tool, ToolCallRequest, ToolCallResult, ToolRegistry, ToolSpec};
