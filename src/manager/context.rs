//! Per-request context: working-directory hint and deadline.

use std::time::Duration;
use tokio::time::Instant;

/// Deadline used when the caller supplies none.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Carried by every tool call from the transport down to the stores.
#[derive(Debug, Clone)]
pub struct RequestContext {
    working_directory: Option<String>,
    deadline: Instant,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl RequestContext {
    /// Context expiring `timeout` from now.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            working_directory: None,
            deadline: Instant::now() + timeout,
        }
    }

    /// Select a working directory. Blank values are ignored.
    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        let dir = dir.into();
        self.working_directory = Some(dir).filter(|d| !d.trim().is_empty());
        self
    }

    #[must_use]
    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref()
    }

    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry() {
        let ctx = RequestContext::new(Duration::from_secs(5));
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.remaining(), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_blank_working_directory_ignored() {
        let ctx = RequestContext::default().with_working_directory("   ");
        assert_eq!(ctx.working_directory(), None);
        let ctx = RequestContext::default().with_working_directory("/tmp/project");
        assert_eq!(ctx.working_directory(), Some("/tmp/project"));
    }
}
