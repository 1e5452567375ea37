//! Cooperative cancellation of long renders

use crate::error::{ReportError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared interruption flag, checked inside long loops.
///
/// Clones share the same flag: keep one on the caller's side and call
/// [`Interrupter::interrupt`] to stop a render running elsewhere.
#[derive(Debug, Clone, Default)]
pub struct Interrupter {
    flag: Arc<AtomicBool>,
}

impl Interrupter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Fail with [`ReportError::Interrupted`] once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_interrupted() {
            Err(ReportError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let interrupter = Interrupter::new();
        let worker_side = interrupter.clone();
        assert!(worker_side.check().is_ok());

        interrupter.interrupt();
        assert!(worker_side.is_interrupted());
        assert!(matches!(worker_side.check(), Err(ReportError::Interrupted)));
    }

    #[test]
    fn test_interrupt_from_another_thread() {
        let interrupter = Interrupter::new();
        let remote = interrupter.clone();
        std::thread::spawn(move || remote.interrupt()).join().unwrap();
        assert!(interrupter.check().is_err());
    }
}
