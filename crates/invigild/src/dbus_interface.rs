//! D-Bus interface for the Invigil session daemon.
//!
//! Bus name: org.academicverse.Invigil1
//! Object path: /org/academicverse/Invigil1
//!
//! Structured results travel as JSON strings; every engine error becomes a
//! `zbus::fdo::Error::Failed` with the user-facing message. Attendance
//! rejections are not errors — they come back as a `marked: false` payload
//! with the reason, so clients can tell "confidently rejected" from
//! "service failed, try again".

use invigil_checkpoint::RosterEntry;
use invigil_core::proctor::Question;
use invigil_core::CaptureOutcome;
use zbus::interface;

use crate::engine::{AttendanceScope, AttendReply, EngineError, EngineHandle};

pub struct InvigilService {
    handle: EngineHandle,
    default_quiz_duration_secs: u32,
}

impl InvigilService {
    pub fn new(handle: EngineHandle, default_quiz_duration_secs: u32) -> Self {
        Self {
            handle,
            default_quiz_duration_secs,
        }
    }
}

fn failed(e: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn invalid(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::InvalidArgs(e.to_string())
}

#[interface(name = "org.academicverse.Invigil1")]
impl InvigilService {
    /// Begin (or restart) the enrollment walk-through for a user.
    async fn enroll_start(&self, user: &str) -> zbus::fdo::Result<String> {
        tracing::info!(user, "enroll_start requested");
        let started = self
            .handle
            .enroll_start(user.to_string())
            .await
            .map_err(failed)?;
        Ok(serde_json::to_string(&started).map_err(invalid)?)
    }

    /// Capture the current step and gate it through face detection.
    async fn enroll_capture(&self, user: &str) -> zbus::fdo::Result<String> {
        let outcome = self
            .handle
            .enroll_capture(user.to_string())
            .await
            .map_err(failed)?;
        let payload = match outcome {
            CaptureOutcome::Accepted { step, complete } => {
                serde_json::json!({ "accepted": true, "step": step, "complete": complete })
            }
            CaptureOutcome::Rejected { reason } => {
                serde_json::json!({ "accepted": false, "reason": reason })
            }
        };
        Ok(payload.to_string())
    }

    /// Explicit user-gated advance to the next capture step.
    async fn enroll_advance(&self, user: &str) -> zbus::fdo::Result<String> {
        let step = self
            .handle
            .enroll_advance(user.to_string())
            .await
            .map_err(failed)?;
        Ok(serde_json::json!({ "step": step.index(), "label": step.label() }).to_string())
    }

    /// Persist the completed enrollment wholesale.
    async fn enroll_save(&self, user: &str) -> zbus::fdo::Result<String> {
        let record = self
            .handle
            .enroll_save(user.to_string())
            .await
            .map_err(failed)?;
        tracing::info!(user, "enrollment saved");
        Ok(serde_json::to_string(&record).map_err(invalid)?)
    }

    /// Abort enrollment and discard all captured stills.
    async fn enroll_cancel(&self, user: &str) -> zbus::fdo::Result<bool> {
        self.handle
            .enroll_cancel(user.to_string())
            .await
            .map_err(failed)
    }

    /// Run one attendance capture. Empty `session` means the daily variant.
    async fn attend(&self, user: &str, session: &str) -> zbus::fdo::Result<String> {
        let scope = if session.is_empty() {
            AttendanceScope::Daily
        } else {
            AttendanceScope::Session(session.to_string())
        };
        let reply = self
            .handle
            .attend(user.to_string(), scope)
            .await
            .map_err(failed)?;
        let payload = match reply {
            AttendReply::Marked { event } => serde_json::json!({
                "marked": true,
                "confidence": event.confidence,
                "sessionKey": event.session_key,
            }),
            AttendReply::Rejected { reason } => {
                serde_json::json!({ "marked": false, "reason": reason })
            }
        };
        Ok(payload.to_string())
    }

    /// Start a proctored quiz session. `questions_json` is a JSON array of
    /// question objects; `duration_secs` of 0 means the configured default.
    async fn quiz_start(
        &self,
        user: &str,
        quiz_id: &str,
        questions_json: &str,
        duration_secs: u32,
    ) -> zbus::fdo::Result<String> {
        let questions: Vec<Question> = serde_json::from_str(questions_json).map_err(invalid)?;
        let duration = if duration_secs == 0 {
            self.default_quiz_duration_secs
        } else {
            duration_secs
        };
        let started = self
            .handle
            .quiz_start(user.to_string(), quiz_id.to_string(), questions, duration)
            .await
            .map_err(failed)?;
        Ok(serde_json::to_string(&started).map_err(invalid)?)
    }

    /// Record an answer by question index.
    async fn quiz_answer(&self, user: &str, question: u32, choice: u32) -> zbus::fdo::Result<()> {
        self.handle
            .quiz_answer(user.to_string(), question as usize, choice as usize)
            .await
            .map_err(failed)
    }

    /// The assessment page became hidden; returns the running tab-switch
    /// count so the client can surface it immediately.
    async fn quiz_hidden(&self, user: &str) -> zbus::fdo::Result<u32> {
        self.handle.quiz_hidden(user.to_string()).await.map_err(failed)
    }

    /// Note an external resource the student opened during the attempt.
    async fn quiz_note_resource(&self, user: &str, resource: &str) -> zbus::fdo::Result<()> {
        self.handle
            .quiz_note_resource(user.to_string(), resource.to_string())
            .await
            .map_err(failed)
    }

    /// Remaining time, tab switches, and answer progress.
    async fn quiz_status(&self, user: &str) -> zbus::fdo::Result<String> {
        let status = self
            .handle
            .quiz_status(user.to_string())
            .await
            .map_err(failed)?;
        Ok(serde_json::to_string(&status).map_err(invalid)?)
    }

    /// User-initiated submission.
    async fn quiz_submit(&self, user: &str) -> zbus::fdo::Result<String> {
        let submitted = self
            .handle
            .quiz_submit(user.to_string())
            .await
            .map_err(failed)?;
        Ok(serde_json::to_string(&submitted).map_err(invalid)?)
    }

    /// Photograph the classroom and identify enrolled students from a roster
    /// (JSON array of roster entries).
    async fn scan_classroom(&self, roster_json: &str) -> zbus::fdo::Result<String> {
        let roster: Vec<RosterEntry> = serde_json::from_str(roster_json).map_err(invalid)?;
        let ids = self.handle.scan_classroom(roster).await.map_err(failed)?;
        Ok(serde_json::to_string(&ids).map_err(invalid)?)
    }

    /// Generate feedback questions for a subject.
    async fn feedback_questions(&self, subject: &str) -> zbus::fdo::Result<Vec<String>> {
        self.handle
            .feedback_questions(subject.to_string())
            .await
            .map_err(failed)
    }

    /// Daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
        })
        .to_string())
    }
}
