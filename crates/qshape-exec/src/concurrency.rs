//! Cooperative detection of concurrent use of one context instance.
//!
//! This is not a lock: a second operation entering while another is in
//! flight fails with `ExecError::ConcurrentUse` instead of waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ExecError, Result};

#[derive(Debug, Default)]
pub struct ConcurrencyDetector {
    in_use: Arc<AtomicBool>,
}

impl ConcurrencyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the context busy until the returned guard is dropped.
    pub fn enter(&self) -> Result<ConcurrencyGuard> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ExecError::ConcurrentUse);
        }
        Ok(ConcurrencyGuard {
            in_use: Arc::clone(&self.in_use),
        })
    }

    /// Enter only when checks are enabled.
    pub fn enter_if(&self, enabled: bool) -> Result<Option<ConcurrencyGuard>> {
        if enabled {
            self.enter().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }
}

/// RAII guard; dropping it releases the context (panic-safe).
#[derive(Debug)]
pub struct ConcurrencyGuard {
    in_use: Arc<AtomicBool>,
}

impl Drop for ConcurrencyGuard {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_fails_until_release() {
        let d = ConcurrencyDetector::new();
        let g = d.enter().unwrap();
        assert!(matches!(d.enter(), Err(ExecError::ConcurrentUse)));
        drop(g);
        assert!(!d.is_in_use());
        assert!(d.enter().is_ok());
    }

    #[test]
    fn disabled_checks_never_block() {
        let d = ConcurrencyDetector::new();
        let _g = d.enter().unwrap();
        assert!(d.enter_if(false).unwrap().is_none());
    }
}
