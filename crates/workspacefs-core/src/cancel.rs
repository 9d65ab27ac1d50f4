//! Cooperative cancellation for long-running steps.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use crate::MaterializeError;
use crate::Result;

/// Cancellation handle shared between a caller and a running operation.
///
/// Clones share the same flag, so a clone handed to another thread can stop
/// an in-flight extraction. Signal handlers cannot hold a token; register
/// [`shared_flag`](Self::shared_flag) with them instead. A token may also
/// carry a deadline, after which it reports
/// [`MaterializeError::DeadlineExceeded`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use workspacefs_core::CancelToken;
///
/// let token = CancelToken::with_timeout(Duration::from_secs(30));
/// let remote = token.clone();
/// remote.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Creates a token that is never cancelled unless [`cancel`](Self::cancel)
    /// is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Creates a token that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// Requests cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns the flag behind this token.
    ///
    /// Storing `true` into it cancels the token and every clone, which makes
    /// it suitable for async-signal-safe handlers such as
    /// `signal_hook::flag::register`.
    #[must_use]
    pub fn shared_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Returns `true` once cancelled or past the deadline.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns an error if the token is cancelled or expired.
    ///
    /// Explicit cancellation takes precedence over the deadline.
    pub fn check(&self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(MaterializeError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(MaterializeError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
