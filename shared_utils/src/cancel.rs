//! Cooperative cancellation for long-running external tool invocations.
//!
//! The process runner polls the token while ffmpeg/ffprobe are running and
//! kills the child as soon as cancellation is requested.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cancellation flag shared between the caller and a worker thread.
///
/// Cloning is cheap; every clone observes the same flag.
///
/// ```
/// use shared_utils::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_side = token.clone();
/// token.cancel();
/// assert!(worker_side.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_is_not_cancelled() {
        assert!(!CancellationToken::new().is_cancelled());
    }

    #[test]
    fn test_cancel_visible_across_threads() {
        let token = CancellationToken::new();
        let remote = token.clone();
        std::thread::spawn(move || remote.cancel()).join().unwrap();
        assert!(token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
