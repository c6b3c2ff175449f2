//! Cooperative cancellation for long-running builder work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Raised when a cancellation was requested. Request handlers catch it; it
/// is never a program error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation was canceled")]
pub struct OperationCanceledError;

/// Shared flag polled at coarse boundaries. Clones observe the same flag,
/// so another thread may cancel.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    requested: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Clear a previous request so the token can be reused for the next
    /// operation.
    pub fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn throw_if_cancellation_requested(&self) -> Result<(), OperationCanceledError> {
        if self.is_cancellation_requested() {
            Err(OperationCanceledError)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(token.throw_if_cancellation_requested().is_ok());

        other.cancel();
        assert!(token.is_cancellation_requested());
        assert_eq!(
            token.throw_if_cancellation_requested(),
            Err(OperationCanceledError)
        );

        token.reset();
        assert!(!other.is_cancellation_requested());
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let token = CancellationToken::new();
        let remote = token.clone();
        std::thread::spawn(move || remote.cancel())
            .join()
            .unwrap();
        assert!(token.is_cancellation_requested());
    }
}
