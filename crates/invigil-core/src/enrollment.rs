//! Enrollment session state machine.
//!
//! Walks a user through the fixed pose sequence (front, left, right),
//! accepting each capture only when the detection checkpoint reports exactly
//! one face. The accepted still set is handed over atomically on save;
//! partial sets never leave the session.

use thiserror::Error;

use crate::types::{StepKind, Still};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnrollmentError {
    #[error("enrollment has not been started")]
    NotStarted,
    #[error("not currently capturing a step")]
    NotCapturing,
    #[error("current step has not been accepted yet")]
    StepNotAccepted,
    #[error("capture sequence is not complete")]
    NotComplete,
    #[error("enrollment already finished")]
    Finished,
}

/// Where the session is in the capture sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentPhase {
    Idle,
    /// Waiting for an acceptable capture of step `i`.
    Capturing(usize),
    /// Step `i` accepted; waiting for the user to advance.
    StepAccepted(usize),
    /// Every step accepted; the record may be saved.
    AllStepsAccepted,
    Saved,
    Cancelled,
}

/// Outcome of offering one capture to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Capture stored at the given step index.
    Accepted { step: usize, complete: bool },
    /// Face count was not exactly one; the step index did not advance.
    Rejected { reason: String },
}

/// One in-progress enrollment attempt.
///
/// All captured stills are held in memory until [`finish`](Self::finish);
/// cancelling at any point discards them.
pub struct EnrollmentSession {
    user: String,
    stills: [Option<Still>; StepKind::COUNT],
    phase: EnrollmentPhase,
}

impl EnrollmentSession {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            stills: Default::default(),
            phase: EnrollmentPhase::Idle,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn phase(&self) -> EnrollmentPhase {
        self.phase
    }

    /// The pose currently being captured, if any.
    pub fn current_step(&self) -> Option<StepKind> {
        match self.phase {
            EnrollmentPhase::Capturing(i) | EnrollmentPhase::StepAccepted(i) => {
                Some(StepKind::ALL[i])
            }
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.phase,
            EnrollmentPhase::Saved | EnrollmentPhase::Cancelled
        )
    }

    /// Begin the capture sequence at the first pose.
    pub fn start(&mut self) -> Result<StepKind, EnrollmentError> {
        match self.phase {
            EnrollmentPhase::Idle => {
                self.phase = EnrollmentPhase::Capturing(0);
                Ok(StepKind::ALL[0])
            }
            EnrollmentPhase::Saved | EnrollmentPhase::Cancelled => Err(EnrollmentError::Finished),
            _ => Err(EnrollmentError::NotCapturing),
        }
    }

    /// Offer a capture for the current step along with the checkpoint's
    /// detected face count.
    ///
    /// Exactly one face accepts the capture; anything else rejects it and
    /// leaves the step index unchanged. Accepting the final step moves the
    /// session straight to [`EnrollmentPhase::AllStepsAccepted`] — there is
    /// no user-gated advance after the last pose.
    pub fn offer_capture(
        &mut self,
        still: Still,
        face_count: u32,
        reason: &str,
    ) -> Result<CaptureOutcome, EnrollmentError> {
        let EnrollmentPhase::Capturing(i) = self.phase else {
            return Err(EnrollmentError::NotCapturing);
        };

        if face_count != 1 {
            tracing::debug!(user = %self.user, step = i, face_count, "capture rejected");
            return Ok(CaptureOutcome::Rejected {
                reason: reason.to_string(),
            });
        }

        self.stills[i] = Some(still);
        let complete = i + 1 == StepKind::COUNT;
        self.phase = if complete {
            EnrollmentPhase::AllStepsAccepted
        } else {
            EnrollmentPhase::StepAccepted(i)
        };
        tracing::debug!(user = %self.user, step = i, complete, "capture accepted");
        Ok(CaptureOutcome::Accepted { step: i, complete })
    }

    /// Move to the next pose. Only legal after the current step was accepted.
    pub fn advance(&mut self) -> Result<StepKind, EnrollmentError> {
        match self.phase {
            EnrollmentPhase::StepAccepted(i) => {
                self.phase = EnrollmentPhase::Capturing(i + 1);
                Ok(StepKind::ALL[i + 1])
            }
            EnrollmentPhase::Capturing(_) => Err(EnrollmentError::StepNotAccepted),
            EnrollmentPhase::Idle => Err(EnrollmentError::NotStarted),
            _ => Err(EnrollmentError::Finished),
        }
    }

    /// Hand over the full ordered still set and mark the session saved.
    ///
    /// Legal only once every step has an accepted capture; the caller writes
    /// the whole set as one record.
    pub fn finish(&mut self) -> Result<Vec<Still>, EnrollmentError> {
        if self.phase != EnrollmentPhase::AllStepsAccepted {
            return Err(EnrollmentError::NotComplete);
        }
        let stills: Vec<Still> = self
            .stills
            .iter_mut()
            .map(|s| s.take())
            .collect::<Option<Vec<_>>>()
            .ok_or(EnrollmentError::NotComplete)?;
        self.phase = EnrollmentPhase::Saved;
        Ok(stills)
    }

    /// Abort the attempt and discard every captured still.
    pub fn cancel(&mut self) {
        if !self.is_terminal() {
            self.stills = Default::default();
            self.phase = EnrollmentPhase::Cancelled;
        }
    }
}
