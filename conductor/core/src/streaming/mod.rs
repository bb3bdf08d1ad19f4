//! Streaming Tool-Call Orchestration
//!
//! Everything between the upstream byte stream and the downstream event
//! channel for a single request.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        StreamingSession                           │
//! │                                                                   │
//! │   bytes ──▶ StreamDecoder ──▶ UpstreamEvent                       │
//! │                                  │                                │
//! │              ContentDelta ◀──────┴──────▶ ToolCallDelta           │
//! │                   │                            │                  │
//! │                   ▼                            ▼                  │
//! │             token event            RealTimeToolExecutor           │
//! │                                    ┌────────────────────┐         │
//! │                                    │ToolCallAccumulator │         │
//! │                                    │ConsumedSet         │         │
//! │                                    └─────────┬──────────┘         │
//! │                                              ▼                    │
//! │                               tool_call / tool_result / tool_error│
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Chunk-boundary invariance**: the decoder yields the same events no
//!   matter how the upstream bytes are split
//! - **At-most-once tools**: a call is marked consumed before it runs and is
//!   never run again, mid-stream or after the stream ends
//! - **Ordered output**: events reach the client in emission order, one
//!   sender per request

mod accumulator;
mod decoder;
mod executor;
mod session;
mod types;

pub use accumulator::{
    parse_arguments_object, ConsumedSet, ToolCallAccumulator, ToolCallBuffer, ToolCallIdentity,
};
pub use decoder::StreamDecoder;
pub use executor::{PreparedCall, RealTimeToolExecutor, RemainingCalls, ToolExecutionResult};
pub use session::{
    SessionConfig, SessionDeps, SessionError, SessionOutcome, SessionState, StreamingSession,
};
pub use types::{ToolCallDelta, UpstreamEvent};
