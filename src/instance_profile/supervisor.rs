use super::cache::Inner;
use crate::error::CredentialsError;
use crate::prelude::{debug, info, warn};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Maximum number of consecutive identical failures logged at WARN before downgrading to DEBUG.
pub(super) const MAX_CONSECUTIVE_SAME_ERROR: u32 = 3;

pub(super) const REFRESH_ERROR_DESCRIPTION: &str = "Error in credential refresh";

/// Tracks repeated failures of the same kind to keep logs readable while the metadata
/// service is unreachable for a long time.
pub(super) struct ErrorTracker {
    last_error_kind: Option<&'static str>,
    consecutive_same_error: u32,
    max_consecutive: u32,
}

impl ErrorTracker {
    pub(super) fn new(max_consecutive: u32) -> Self {
        Self {
            last_error_kind: None,
            consecutive_same_error: 0,
            max_consecutive,
        }
    }

    /// Records a failure; returns `true` if it should be logged at WARN.
    pub(super) fn record_error(&mut self, error_kind: &'static str) -> bool {
        let should_warn = self.last_error_kind != Some(error_kind)
            || self.consecutive_same_error < self.max_consecutive;

        if self.last_error_kind == Some(error_kind) {
            self.consecutive_same_error += 1;
        } else {
            self.consecutive_same_error = 1;
            self.last_error_kind = Some(error_kind);
        }

        should_warn
    }

    pub(super) fn reset(&mut self) {
        self.consecutive_same_error = 0;
        self.last_error_kind = None;
    }

    pub(super) fn consecutive_count(&self) -> u32 {
        self.consecutive_same_error
    }
}

/// Sleeps for `dur`; returns `true` if cancelled first.
pub(super) async fn sleep_or_cancel(token: &CancellationToken, dur: Duration) -> bool {
    tokio::select! {
        () = token.cancelled() => true,
        () = sleep(dur) => false,
    }
}

impl Inner {
    pub(super) async fn run_refresh_supervisor(&self, cancellation_token: CancellationToken) {
        let refresh = self.refresh();
        info!(
            "Starting credential refresh task: refresh_interval_ms={}, error_interval_ms={}",
            refresh.refresh_interval.as_millis(),
            refresh.error_interval.as_millis()
        );

        let mut error_tracker = ErrorTracker::new(MAX_CONSECUTIVE_SAME_ERROR);

        loop {
            if cancellation_token.is_cancelled() {
                debug!("Cancellation signal received; stopping credential refresh");
                return;
            }

            let delay = match self.refresh_once().await {
                Ok(()) => {
                    if error_tracker.consecutive_count() > 0 {
                        info!(
                            "Credential refresh recovered after {} consecutive failures",
                            error_tracker.consecutive_count()
                        );
                    }
                    error_tracker.reset();
                    refresh.refresh_interval
                }
                Err(e) => {
                    if error_tracker.record_error(e.kind()) {
                        warn!(
                            "Failed to refresh credentials; retrying: error={}, retry_ms={}",
                            e,
                            refresh.error_interval.as_millis()
                        );
                    } else {
                        debug!(
                            "Failed to refresh credentials (repeated); retrying: error={}, retry_ms={}, consecutive_failures={}",
                            e,
                            refresh.error_interval.as_millis(),
                            error_tracker.consecutive_count()
                        );
                    }
                    self.report_error(REFRESH_ERROR_DESCRIPTION, &e);
                    refresh.error_interval
                }
            };

            if sleep_or_cancel(&cancellation_token, delay).await {
                debug!("Cancellation signal received; stopping credential refresh");
                return;
            }
        }
    }

    /// One background fetch.
    ///
    /// Only a cold cache goes through the fetch gate; once credentials are cached,
    /// foreground callers never fetch and the refresh runs without it.
    async fn refresh_once(&self) -> Result<(), CredentialsError> {
        if !self.metadata().is_enabled() {
            return Err(CredentialsError::ServiceUnavailable);
        }

        if self.has_credentials() {
            return self.fetch_and_store().await.map(|_| ());
        }

        let _gate = self.fetch_gate().lock().await;

        // A foreground caller filled the cold cache while we waited; nothing to refresh yet.
        if self.has_credentials() {
            debug!("Credentials populated by a concurrent caller; skipping refresh");
            return Ok(());
        }

        self.fetch_and_store().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_tracker_downgrades_after_repeats() {
        let mut tracker = ErrorTracker::new(3);

        assert!(tracker.record_error("fetch"));
        assert!(tracker.record_error("fetch"));
        assert!(tracker.record_error("fetch"));
        assert!(!tracker.record_error("fetch"));
        assert_eq!(tracker.consecutive_count(), 4);

        // A different kind warns again and restarts the count.
        assert!(tracker.record_error("no_identity"));
        assert_eq!(tracker.consecutive_count(), 1);

        tracker.reset();
        assert_eq!(tracker.consecutive_count(), 0);
        assert!(tracker.record_error("no_identity"));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_or_cancel_reports_cancellation() {
        let token = CancellationToken::new();
        assert!(!sleep_or_cancel(&token, Duration::from_millis(10)).await);

        token.cancel();
        assert!(sleep_or_cancel(&token, Duration::from_secs(3600)).await);
    }
}
