//! Retry pipeline state machine.
//!
//! Every transition is a pure function of the current [`Cursor`] and an
//! [`Event`] reported by the orchestrator after it has run the side effect for
//! the current stage. The orchestrator owns all I/O; this module only decides
//! what happens next.

use thiserror::Error;

use crate::core::types::FinalStatus;

/// Where a task currently is in the generate/apply/verify cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Generating,
    Prechecking,
    Applying,
    Verifying,
    /// Discarding working-tree changes, then continuing as recorded.
    RollingBack(AfterRollback),
    Committing,
    Finished(FinalStatus),
}

/// What a rollback leads to once the tree is clean again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterRollback {
    Retry,
    Fail(FinalStatus),
}

/// Outcome of the side effect performed for the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Parsed,
    ParseFailed,
    PrecheckPassed,
    PrecheckFailed,
    Applied {
        written: usize,
        declared_no_changes: bool,
    },
    ApplyFailed,
    VerifyPassed,
    VerifyFailed,
    RolledBack,
    RollbackFailed,
    Committed,
    CommitFailed,
}

/// Position in the state machine plus the attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub stage: Stage,
    /// Current attempt number (1-indexed).
    pub attempt: u32,
    pub max_attempts: u32,
    /// Whether proposals are verified in a scratch file before being applied.
    pub precheck: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} while {stage:?} (attempt {attempt})")]
pub struct TransitionError {
    pub stage: Stage,
    pub event: Event,
    pub attempt: u32,
}

impl Cursor {
    /// Initial cursor. A bound of zero is treated as one attempt.
    pub fn start(max_attempts: u32, precheck: bool) -> Self {
        Self {
            stage: Stage::Generating,
            attempt: 1,
            max_attempts: max_attempts.max(1),
            precheck,
        }
    }

    pub fn attempts_remain(&self) -> bool {
        self.attempt < self.max_attempts
    }

    pub fn finished(&self) -> Option<FinalStatus> {
        match self.stage {
            Stage::Finished(status) => Some(status),
            _ => None,
        }
    }

    fn at(self, stage: Stage) -> Self {
        Self { stage, ..self }
    }

    fn next_attempt(self) -> Self {
        Self {
            stage: Stage::Generating,
            attempt: self.attempt + 1,
            ..self
        }
    }

    fn retry_or(self, status: FinalStatus) -> Self {
        if self.attempts_remain() {
            self.next_attempt()
        } else {
            self.at(Stage::Finished(status))
        }
    }
}

/// Compute the next cursor for `event` observed in `cursor.stage`.
pub fn advance(cursor: Cursor, event: Event) -> Result<Cursor, TransitionError> {
    let next = match (cursor.stage, event) {
        (Stage::Generating, Event::Parsed) if cursor.precheck => cursor.at(Stage::Prechecking),
        (Stage::Generating, Event::Parsed) => cursor.at(Stage::Applying),
        (Stage::Generating, Event::ParseFailed) => cursor.retry_or(FinalStatus::FailedJsonParsing),

        (Stage::Prechecking, Event::PrecheckPassed) => cursor.at(Stage::Applying),
        // Nothing touched the repository yet, so no rollback is needed.
        (Stage::Prechecking, Event::PrecheckFailed) => {
            cursor.retry_or(FinalStatus::FailedVerification)
        }

        (Stage::Applying, Event::Applied { written, .. }) if written > 0 => {
            cursor.at(Stage::Verifying)
        }
        (
            Stage::Applying,
            Event::Applied {
                declared_no_changes: true,
                ..
            },
        ) => cursor.at(Stage::Finished(FinalStatus::CompletedNoChanges)),
        (Stage::Applying, Event::Applied { .. }) => {
            cursor.at(Stage::Finished(FinalStatus::FailedImplementationError))
        }
        (Stage::Applying, Event::ApplyFailed) => cursor.at(Stage::RollingBack(
            AfterRollback::Fail(FinalStatus::FailedImplementationError),
        )),

        (Stage::Verifying, Event::VerifyPassed) => cursor.at(Stage::Committing),
        (Stage::Verifying, Event::VerifyFailed) => {
            let after = if cursor.attempts_remain() {
                AfterRollback::Retry
            } else {
                AfterRollback::Fail(FinalStatus::FailedVerification)
            };
            cursor.at(Stage::RollingBack(after))
        }

        (Stage::RollingBack(AfterRollback::Retry), Event::RolledBack) => cursor.next_attempt(),
        (Stage::RollingBack(AfterRollback::Fail(status)), Event::RolledBack) => {
            cursor.at(Stage::Finished(status))
        }
        (Stage::RollingBack(_), Event::RollbackFailed) => {
            cursor.at(Stage::Finished(FinalStatus::FailedUnknown))
        }

        (Stage::Committing, Event::Committed) => {
            cursor.at(Stage::Finished(FinalStatus::CompletedSuccessfully))
        }
        // Commit failures leave whatever was staged in place.
        (Stage::Committing, Event::CommitFailed) => {
            cursor.at(Stage::Finished(FinalStatus::FailedCommit))
        }

        (stage, event) => {
            return Err(TransitionError {
                stage,
                event,
                attempt: cursor.attempt,
            });
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(stage: Stage, attempt: u32, max_attempts: u32) -> Cursor {
        Cursor {
            stage,
            attempt,
            max_attempts,
            precheck: false,
        }
    }

    #[test]
    fn parsed_goes_to_applying_without_precheck() {
        let next = advance(Cursor::start(3, false), Event::Parsed).expect("advance");
        assert_eq!(next.stage, Stage::Applying);
        assert_eq!(next.attempt, 1);
    }

    #[test]
    fn parsed_goes_to_prechecking_when_enabled() {
        let next = advance(Cursor::start(3, true), Event::Parsed).expect("advance");
        assert_eq!(next.stage, Stage::Prechecking);
    }

    #[test]
    fn parse_failure_retries_until_bound() {
        let next = advance(cursor(Stage::Generating, 1, 2), Event::ParseFailed).expect("advance");
        assert_eq!(next.stage, Stage::Generating);
        assert_eq!(next.attempt, 2);

        let last = advance(next, Event::ParseFailed).expect("advance");
        assert_eq!(last.stage, Stage::Finished(FinalStatus::FailedJsonParsing));
        assert_eq!(last.attempt, 2);
    }

    #[test]
    fn precheck_failure_skips_rollback() {
        let mut c = cursor(Stage::Prechecking, 1, 3);
        c.precheck = true;
        let next = advance(c, Event::PrecheckFailed).expect("advance");
        assert_eq!(next.stage, Stage::Generating);
        assert_eq!(next.attempt, 2);

        let exhausted = advance(cursor(Stage::Prechecking, 3, 3), Event::PrecheckFailed)
            .expect("advance");
        assert_eq!(
            exhausted.stage,
            Stage::Finished(FinalStatus::FailedVerification)
        );
    }

    #[test]
    fn empty_apply_distinguishes_declared_no_changes() {
        let no_changes = advance(
            cursor(Stage::Applying, 1, 3),
            Event::Applied {
                written: 0,
                declared_no_changes: true,
            },
        )
        .expect("advance");
        assert_eq!(
            no_changes.stage,
            Stage::Finished(FinalStatus::CompletedNoChanges)
        );

        let broken = advance(
            cursor(Stage::Applying, 1, 3),
            Event::Applied {
                written: 0,
                declared_no_changes: false,
            },
        )
        .expect("advance");
        assert_eq!(
            broken.stage,
            Stage::Finished(FinalStatus::FailedImplementationError)
        );
    }

    #[test]
    fn written_files_always_go_to_verification() {
        let next = advance(
            cursor(Stage::Applying, 1, 3),
            Event::Applied {
                written: 2,
                declared_no_changes: true,
            },
        )
        .expect("advance");
        assert_eq!(next.stage, Stage::Verifying);
    }

    #[test]
    fn apply_failure_rolls_back_then_fails() {
        let rolling = advance(cursor(Stage::Applying, 1, 3), Event::ApplyFailed).expect("advance");
        assert_eq!(
            rolling.stage,
            Stage::RollingBack(AfterRollback::Fail(FinalStatus::FailedImplementationError))
        );
        let done = advance(rolling, Event::RolledBack).expect("advance");
        assert_eq!(
            done.stage,
            Stage::Finished(FinalStatus::FailedImplementationError)
        );
    }

    #[test]
    fn verify_failure_rolls_back_before_retry() {
        let rolling =
            advance(cursor(Stage::Verifying, 1, 3), Event::VerifyFailed).expect("advance");
        assert_eq!(rolling.stage, Stage::RollingBack(AfterRollback::Retry));
        let retry = advance(rolling, Event::RolledBack).expect("advance");
        assert_eq!(retry.stage, Stage::Generating);
        assert_eq!(retry.attempt, 2);
    }

    #[test]
    fn verify_failure_on_last_attempt_rolls_back_then_fails() {
        let rolling =
            advance(cursor(Stage::Verifying, 3, 3), Event::VerifyFailed).expect("advance");
        assert_eq!(
            rolling.stage,
            Stage::RollingBack(AfterRollback::Fail(FinalStatus::FailedVerification))
        );
        let done = advance(rolling, Event::RolledBack).expect("advance");
        assert_eq!(done.finished(), Some(FinalStatus::FailedVerification));
    }

    #[test]
    fn rollback_failure_is_terminal() {
        let done = advance(
            cursor(Stage::RollingBack(AfterRollback::Retry), 1, 3),
            Event::RollbackFailed,
        )
        .expect("advance");
        assert_eq!(done.finished(), Some(FinalStatus::FailedUnknown));
    }

    #[test]
    fn commit_outcomes_are_terminal() {
        let ok = advance(cursor(Stage::Committing, 2, 3), Event::Committed).expect("advance");
        assert_eq!(ok.finished(), Some(FinalStatus::CompletedSuccessfully));
        let failed =
            advance(cursor(Stage::Committing, 2, 3), Event::CommitFailed).expect("advance");
        assert_eq!(failed.finished(), Some(FinalStatus::FailedCommit));
    }

    #[test]
    fn unexpected_event_is_rejected() {
        let err = advance(cursor(Stage::Generating, 1, 3), Event::Committed).unwrap_err();
        assert_eq!(err.stage, Stage::Generating);
        assert_eq!(err.event, Event::Committed);

        let finished = cursor(Stage::Finished(FinalStatus::FailedCommit), 1, 3);
        assert!(advance(finished, Event::Parsed).is_err());
    }

    #[test]
    fn zero_bound_still_allows_one_attempt() {
        let start = Cursor::start(0, false);
        assert_eq!(start.max_attempts, 1);
        assert!(!start.attempts_remain());
    }

    #[test]
    fn attempt_never_exceeds_bound() {
        for max in 1..=5 {
            let mut c = Cursor::start(max, false);
            while c.finished().is_none() {
                c = match c.stage {
                    Stage::Generating => advance(c, Event::Parsed),
                    Stage::Applying => advance(
                        c,
                        Event::Applied {
                            written: 1,
                            declared_no_changes: false,
                        },
                    ),
                    Stage::Verifying => advance(c, Event::VerifyFailed),
                    Stage::RollingBack(_) => advance(c, Event::RolledBack),
                    other => panic!("unexpected stage {other:?}"),
                }
                .expect("advance");
                assert!(c.attempt <= max);
            }
            assert_eq!(c.attempt, max);
            assert_eq!(c.finished(), Some(FinalStatus::FailedVerification));
        }
    }
}
