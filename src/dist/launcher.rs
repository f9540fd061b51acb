//! Child-process supervision for multi-worker runs
//!
//! The process started by the user becomes rank 0 and forks the remaining
//! ranks as copies of its own binary with `--rank k` appended. Workers that
//! are still alive when the pool drops get killed, so a chief that errors
//! out does not strand children.

use std::process::{Child, Command, Stdio};

use log::info;

use super::{DistError, Result};

/// Handle over spawned worker processes (ranks 1..world)
pub struct WorkerPool {
    children: Vec<(usize, Child)>,
}

impl WorkerPool {
    /// Spawn `world_size - 1` workers re-running this binary.
    ///
    /// `args` is the argument vector each worker receives before its
    /// `--rank` flag, normally the subcommand plus config path.
    pub fn spawn(world_size: usize, args: &[String]) -> Result<Self> {
        let exe = std::env::current_exe()?;
        let mut children = Vec::with_capacity(world_size.saturating_sub(1));
        for rank in 1..world_size {
            let child = Command::new(&exe)
                .args(args)
                .arg("--rank")
                .arg(rank.to_string())
                .stdin(Stdio::null())
                .spawn()?;
            info!("spawned worker rank {rank} (pid {})", child.id());
            children.push((rank, child));
        }
        Ok(Self { children })
    }

    /// Wait for every worker; the first non-zero exit wins the error.
    pub fn wait(mut self) -> Result<()> {
        let mut failure = None;
        for (rank, child) in self.children.iter_mut() {
            let status = child.wait()?;
            if !status.success() && failure.is_none() {
                failure = Some(DistError::WorkerFailed { rank: *rank, status: status.to_string() });
            }
        }
        self.children.clear();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for (rank, child) in self.children.iter_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                info!("killing worker rank {rank}");
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}
