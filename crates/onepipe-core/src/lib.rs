//! onepipe-core: single-session TCP relay.
//!
//! Provides the byte-stream endpoint abstraction, the TCP transport
//! connector, the bidirectional [`Pipe`], the one-slot [`SessionGate`] and
//! the [`SessionHandler`] that ties an accepted client to its target.

pub mod endpoint;
pub mod error;
pub mod gate;
pub mod pipe;
pub mod session;
pub mod transport;

// Re-export commonly used items at crate root.
pub use endpoint::{Endpoint, Labeled};
pub use error::{RelayError, RelayResult};
pub use gate::{SessionGate, SessionSlot};
pub use pipe::{DirectionEnd, DirectionReport, Pipe, PipeConfig, PipeOutcome, RunningPipe};
pub use session::{SessionHandler, SessionOutcome, SessionSummary, SharedTarget, TargetSource};
pub use transport::{bind, dial, listen, serve, TargetAddr};
