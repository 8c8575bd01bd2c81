//! rc-sched: delayed operations for background maintenance.
//!
//! A [`DelayedOperationQueue`] owns one dispatcher thread that runs
//! operations in due-time order (ties in insertion order), one at a time,
//! never before they are due. Any thread may schedule or cancel through the
//! queue or a cloned [`QueueHandle`].
//!
//! ```no_run
//! use std::time::Duration;
//! use rc_sched::DelayedOperationQueue;
//!
//! # fn main() -> rc_core::Result<()> {
//! let queue = DelayedOperationQueue::start("maintenance")?;
//! let id = queue.schedule_after(Duration::from_secs(30), || {
//!     println!("sweeping");
//!     Ok(())
//! });
//! queue.cancel(id);
//! # Ok(())
//! # }
//! ```

mod queue;

pub use queue::{DelayedOperationQueue, QueueHandle, MAX_FINISHED};

use std::fmt;

/// Error type returned by operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Lifecycle of a scheduled operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Running,
    Completed,
    /// The operation returned an error or panicked.
    Failed(String),
    Cancelled,
}

impl OperationState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Cancelled)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
