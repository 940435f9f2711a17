//! Cooperative cancellation context.
//!
//! Every blocking operation in the crate takes a [`Context`]. The context
//! carries a cancellation token and an optional deadline; socket loops check
//! it at least once per second.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use wire_transport::Context;
//!
//! let ctx = Context::with_timeout(Duration::from_secs(5));
//! let child = ctx.child();
//!
//! ctx.cancel();
//! assert!(child.is_cancelled());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

// ============================================================================
// Context
// ============================================================================

/// Cancellation token plus optional deadline.
///
/// Cloning a context shares the same token; [`Context::child`] derives a
/// context that is cancelled with its parent but can also be cancelled on
/// its own.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Cancellation token.
    token: CancellationToken,
    /// Absolute deadline, if any.
    deadline: Option<Instant>,
}

// ============================================================================
// Context - Constructors
// ============================================================================

impl Context {
    /// Creates a context with no deadline that is never cancelled unless
    /// [`Context::cancel`] is called.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context whose deadline is `timeout` from now.
    #[inline]
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Creates a context with an absolute deadline.
    #[inline]
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Creates a child context.
    ///
    /// The child is cancelled when the parent is. It inherits the parent's
    /// deadline.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Creates a child context with a deadline no later than `timeout` from
    /// now.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }
}

// ============================================================================
// Context - Public API
// ============================================================================

impl Context {
    /// Cancels this context and all of its children.
    #[inline]
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` if the context was cancelled or its deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Returns the deadline, if any.
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline, if any.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns [`Error::Cancelled`] if the context is cancelled.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::cancelled(operation));
        }
        Ok(())
    }

    /// Completes when the token is cancelled or the deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Wraps an existing token, for background tasks that own their own
    /// shutdown signal.
    #[inline]
    pub(crate) fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_not_cancelled() {
        let ctx = Context::new();
        assert!(!ctx.is_cancelled());
        assert!(ctx.deadline().is_none());
        assert!(ctx.check("op").is_ok());
    }

    #[test]
    fn test_cancel_propagates_to_child() {
        let parent = Context::new();
        let child = parent.child();

        parent.cancel();

        assert!(child.is_cancelled());
        assert!(child.check("read").unwrap_err().is_cancelled());
    }

    #[test]
    fn test_child_cancel_does_not_affect_parent() {
        let parent = Context::new();
        let child = parent.child();

        child.cancel();

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = Context::with_timeout(Duration::from_secs(2));
        assert!(!ctx.is_cancelled());

        tokio::time::advance(Duration::from_secs(3)).await;

        assert!(ctx.is_cancelled());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_with_timeout_keeps_earlier_deadline() {
        let parent = Context::with_timeout(Duration::from_secs(1));
        let child = parent.child_with_timeout(Duration::from_secs(20));
        assert_eq!(child.deadline(), parent.deadline());

        let open = Context::new();
        let bounded = open.child_with_timeout(Duration::from_secs(20));
        assert!(bounded.deadline().is_some());
    }
}
