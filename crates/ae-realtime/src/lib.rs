//! ae-realtime: Lock-free plumbing between the control and audio threads
//!
//! - `mailbox` - triple-buffered latest-value parameter snapshots
//! - `queue` - bounded SPSC rings (commands, garbage return)
//! - `fault_board` - per-voice fault flags and per-kind totals
//!
//! Nothing on the audio-thread side of these types waits, allocates or
//! frees memory.

pub mod fault_board;
pub mod mailbox;
pub mod queue;

pub use fault_board::{FaultBoard, FaultTotals};
pub use mailbox::{ParamPublisher, ParamReceiver, mailbox};
pub use queue::{QueueConsumer, QueueProducer, SpscQueue};
