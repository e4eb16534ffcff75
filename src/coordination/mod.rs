//! Coordination Layer for the tick loop
//!
//! - Graceful shutdown handling
//! - Injectable clock

pub mod clock;
pub mod shutdown;

pub use clock::{Clock, ManualClock, SystemClock};
pub use shutdown::{install_signal_handlers, GracefulShutdown, ShutdownPhase, ShutdownSignal};
