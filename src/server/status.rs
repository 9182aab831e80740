//! Server status state machine.
//!
//! The status moves strictly forward:
//! - **NotInited**: constructed, nothing opened
//! - **Loading**: `start()` is opening endpoints and resolving components
//! - **Running**: workers are accepting
//! - **Stopping**: `stop()` was accepted; workers drain and exit
//!
//! Transitions are compare-and-swap on a single atomic, so a racing second
//! `start()` or `stop()` observes the winner's state and fails.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle status of a [`Server`](super::Server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    NotInited = 0,
    Loading = 1,
    Running = 2,
    Stopping = 3,
}

impl Status {
    /// Text reported by the monitor.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotInited => "not inited",
            Self::Loading => "loading",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotInited,
            1 => Self::Loading,
            2 => Self::Running,
            _ => Self::Stopping,
        }
    }

    /// The only legal predecessor of `self`.
    const fn predecessor(self) -> Option<Self> {
        match self {
            Self::NotInited => None,
            Self::Loading => Some(Self::NotInited),
            Self::Running => Some(Self::Loading),
            Self::Stopping => Some(Self::Running),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically updated [`Status`].
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub const fn new() -> Self {
        Self(AtomicU8::new(Status::NotInited as u8))
    }

    pub fn get(&self) -> Status {
        Status::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` from its single legal predecessor.
    ///
    /// Returns the status actually observed when the transition is illegal.
    pub fn advance(&self, next: Status) -> Result<(), Status> {
        let Some(from) = next.predecessor() else {
            return Err(self.get());
        };
        self.0
            .compare_exchange(from as u8, next as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(Status::from_u8)
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}
