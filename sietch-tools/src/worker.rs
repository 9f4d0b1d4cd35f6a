//! Cancellation token for long-running vault operations.
//!
//! Handed to `add`, `get` and GC; checked at chunk boundaries. Commit
//! never checks it - a commit runs to completion or is left for
//! recovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sietch_api_types::{Error, Result};

#[derive(Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; workers observe it at their next boundary.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[test]
fn test_abort_flag() {
    let flag = AbortFlag::new();
    assert!(flag.check().is_ok());

    let remote = flag.clone();
    remote.abort();
    assert!(matches!(flag.check(), Err(Error::Cancelled)));
}
