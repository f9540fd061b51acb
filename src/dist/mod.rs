//! Multi-process gradient exchange over TCP
//!
//! Workers are plain OS processes. Rank 0 listens on the rendezvous address
//! and every other rank dials in, yielding a star topology: reductions go
//! worker -> chief -> workers as framed f32 buffers. With a world size of
//! one the collective degenerates to [`Collective::Single`] and every
//! operation is a no-op, so single-process training pays nothing.
//!
//! The async plumbing stays private; the training loop sees synchronous
//! calls backed by a current-thread tokio runtime inside the collective.

mod collective;
mod frame;
mod launcher;

pub use collective::{Collective, TcpCollective};
pub use launcher::WorkerPool;

use std::time::Duration;

/// Errors from rendezvous, framing, and worker supervision
#[derive(Debug, thiserror::Error)]
pub enum DistError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("rendezvous at {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("invalid topology: rank {rank} with world size {world_size}")]
    BadTopology { rank: usize, world_size: usize },

    #[error("worker rank {rank} exited with {status}")]
    WorkerFailed { rank: usize, status: String },
}

/// Result alias for distributed operations
pub type Result<T> = std::result::Result<T, DistError>;
