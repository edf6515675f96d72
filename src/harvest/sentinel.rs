use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, UserFacingError};

/// Merges the failures of every pipeline into a single cancellation, where the first error wins.
///
/// The error slot holds a single error, any later one is dropped without blocking the failing task.
#[derive(Clone)]
pub struct Sentinel {
    token: CancellationToken,
    errors: mpsc::Sender<AppError>,
}

impl Sentinel {
    /// Creates a new sentinel, cancelled along with the given parent token.
    ///
    /// Returns the receiving end of the error slot as well.
    pub fn new(parent: &CancellationToken) -> (Self, mpsc::Receiver<AppError>) {
        let (errors, rx) = mpsc::channel(1);
        (
            Self {
                token: parent.child_token(),
                errors,
            },
            rx,
        )
    }

    /// The token cancelled on the first failure
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Records the error, unless another one was recorded first, and cancels every pipeline
    pub fn fail(&self, err: AppError) {
        match self.errors.try_send(err) {
            Ok(()) => tracing::debug!("Harvest failed, cancelling every pipeline"),
            Err(err) => tracing::debug!("Dropping error reported after the first one: {}", err.into_inner()),
        }
        self.token.cancel();
    }

    /// Fails with [UserFacingError::DeadlineExceeded] once the deadline expires, unless cancelled first
    pub async fn watch_deadline(self, deadline: Duration) {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => (),
            _ = tokio::time::sleep(deadline) => {
                tracing::warn!("Deadline of {deadline:?} exceeded");
                self.fail(UserFacingError::DeadlineExceeded(deadline).into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_first_error_wins() {
        let parent = CancellationToken::new();
        let (sentinel, mut errors) = Sentinel::new(&parent);

        sentinel.fail(UserFacingError::ApiRateLimited.into());
        sentinel.clone().fail(UserFacingError::ApiUnauthorized.into());

        assert!(sentinel.token().is_cancelled());
        assert!(!parent.is_cancelled());
        assert_eq!(
            errors.try_recv().ok().as_ref().and_then(AppError::user_facing),
            Some(&UserFacingError::ApiRateLimited)
        );
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_with_parent() {
        let parent = CancellationToken::new();
        let (sentinel, mut errors) = Sentinel::new(&parent);

        parent.cancel();

        assert!(sentinel.token().is_cancelled());
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let (sentinel, mut errors) = Sentinel::new(&CancellationToken::new());

        sentinel.clone().watch_deadline(Duration::from_secs(60)).await;

        assert!(sentinel.token().is_cancelled());
        assert_eq!(
            errors.try_recv().ok().as_ref().and_then(AppError::user_facing),
            Some(&UserFacingError::DeadlineExceeded(Duration::from_secs(60)))
        );
    }

    #[tokio::test]
    async fn test_deadline_stops_on_cancel() {
        let (sentinel, mut errors) = Sentinel::new(&CancellationToken::new());
        sentinel.token().cancel();

        sentinel.clone().watch_deadline(Duration::from_secs(3600)).await;

        assert!(errors.try_recv().is_err());
    }
}
