//! Long-running operation handles.
//!
//! ARM acknowledges mutating requests before the work is done and hands back a
//! way to poll for the outcome. An [`Operation`] hides which of the polling
//! styles is in use; [`wait_for_completion`] drives one to a terminal state.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::error::ArmError;

/// Result of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Still running; poll again after `retry_after` if the server said so.
    Running {
        /// Server-requested delay before the next poll.
        retry_after: Option<Duration>,
    },
    /// Finished successfully.
    Done,
}

/// A handle to an in-flight ARM operation.
///
/// A failed or canceled operation is reported as an error from [`Operation::poll`].
#[async_trait]
pub trait Operation: Send {
    /// Check the operation once.
    async fn poll(&mut self) -> Result<PollState, ArmError>;
}

/// An operation that finished synchronously.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompletedOperation;

#[async_trait]
impl Operation for CompletedOperation {
    async fn poll(&mut self) -> Result<PollState, ArmError> {
        Ok(PollState::Done)
    }
}

/// Poll `operation` until it finishes.
///
/// Waits `retry_after` between polls when the server supplies it and
/// `default_interval` otherwise. There is no deadline here: callers bound the
/// whole wait with `tokio::time::timeout`.
pub async fn wait_for_completion(
    operation: &mut dyn Operation,
    default_interval: Duration,
) -> Result<(), ArmError> {
    let mut polls: u32 = 0;
    loop {
        polls += 1;
        match operation.poll().await? {
            PollState::Done => {
                debug!(polls, "Long-running operation completed");
                return Ok(());
            },
            PollState::Running { retry_after } => {
                let delay = retry_after.unwrap_or(default_interval);
                debug!(polls, delay = ?delay, "Long-running operation still in progress");
                tokio::time::sleep(delay).await;
            },
        }
    }
}

/// Parse a `Retry-After` header given in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Map a provisioning or operation status string to a poll outcome.
///
/// `Succeeded` finishes, `Failed` and `Canceled` are errors, anything else
/// (`Creating`, `Updating`, `Deleting`, `InProgress`, ...) is still running.
pub fn classify_status(
    status: &str,
    retry_after: Option<Duration>,
    code: Option<String>,
    message: Option<String>,
) -> Result<PollState, ArmError> {
    if status.eq_ignore_ascii_case("Succeeded") {
        Ok(PollState::Done)
    } else if status.eq_ignore_ascii_case("Failed") || status.eq_ignore_ascii_case("Canceled") {
        Err(ArmError::OperationFailed {
            status: status.to_string(),
            code: code.unwrap_or_default(),
            message: message.unwrap_or_default(),
        })
    } else {
        Ok(PollState::Running { retry_after })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedOperation {
        steps: VecDeque<Result<PollState, ArmError>>,
        polls: usize,
    }

    #[async_trait]
    impl Operation for ScriptedOperation {
        async fn poll(&mut self) -> Result<PollState, ArmError> {
            self.polls += 1;
            self.steps.pop_front().unwrap_or(Ok(PollState::Done))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_polls_until_done() {
        let mut op = ScriptedOperation {
            steps: VecDeque::from([
                Ok(PollState::Running { retry_after: None }),
                Ok(PollState::Running {
                    retry_after: Some(Duration::from_secs(1)),
                }),
                Ok(PollState::Done),
            ]),
            polls: 0,
        };

        tokio_test::assert_ok!(wait_for_completion(&mut op, Duration::from_secs(10)).await);
        assert_eq!(op.polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_surfaces_errors() {
        let mut op = ScriptedOperation {
            steps: VecDeque::from([
                Ok(PollState::Running { retry_after: None }),
                Err(ArmError::not_found("gone")),
            ]),
            polls: 0,
        };

        let err = tokio_test::assert_err!(
            wait_for_completion(&mut op, Duration::from_millis(5)).await
        );
        assert!(err.is_not_found());
        assert_eq!(op.polls, 2);
    }

    #[tokio::test]
    async fn test_completed_operation() {
        let mut op = CompletedOperation;
        assert_eq!(op.poll().await.unwrap(), PollState::Done);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("15"), Some(Duration::from_secs(15)));
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status("Succeeded", None, None, None).unwrap(),
            PollState::Done
        );
        assert_eq!(
            classify_status("Creating", Some(Duration::from_secs(2)), None, None).unwrap(),
            PollState::Running {
                retry_after: Some(Duration::from_secs(2))
            }
        );

        let err = classify_status(
            "Failed",
            None,
            Some("InvalidSource".into()),
            Some("source does not exist".into()),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "long-running operation finished with status Failed (InvalidSource): source does not exist"
        );
        assert!(classify_status("canceled", None, None, None).is_err());
    }
}
