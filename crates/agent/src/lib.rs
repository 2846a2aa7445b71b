//! The tool-calling dispatch loop — the heart of Campusd.
//!
//! One turn moves through a fixed sequence of states:
//!
//! 1. **Guardrail check** on the latest user message (blocked turns stop
//!    here — no reasoning call, no persistence)
//! 2. **Load history** for the session (bounded cache, store on miss)
//! 3. **First reasoning call** with the full tool schema list
//! 4. **Branch**: direct text reply, or a function selection
//! 5. On a selection: **dispatch the tool** (every failure is wrapped,
//!    never fatal), persist the intent/result pair
//! 6. **Second reasoning call** with no tool schemas to phrase the outcome
//!    (this is the call that streams in streaming mode)
//! 7. **Respond** and persist the final assistant text
//!
//! There is no multi-hop tool chaining: one selection, one execution, one
//! phrasing per turn.

pub mod dispatch;
pub mod history_cache;
pub mod stream_event;

pub use dispatch::{DispatchLoop, ToolInvocation, TurnOutcome, TurnReply};
pub use history_cache::HistoryCache;
pub use stream_event::AgentStreamEvent;
