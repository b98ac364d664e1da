//! invigil-checkpoint — Client for the hosted face/analysis service.
//!
//! Every call here is a "checkpoint": a single round trip to the external
//! model endpoint. The service is a black box; this crate owns the wire
//! schemas, the trait the engine is generic over, and the reqwest-backed
//! implementation. A network or service failure is a [`CheckpointError`] —
//! distinct from a confident negative decision, which is ordinary data.

use std::future::Future;

use invigil_core::{Still, VerificationDecision};
use thiserror::Error;

pub mod remote;
pub mod types;

pub use remote::RemoteCheckpoint;
pub use types::{BehaviorAnalysis, BehaviorReport, Detection, RosterEntry};

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("checkpoint service returned a malformed response: {0}")]
    BadResponse(String),
    #[error("checkpoint service rejected the request: {0}")]
    ServiceError(String),
}

/// The external verification/analysis service.
///
/// Methods return `Send` futures so the engine task can stay spawnable;
/// implementations just write `async fn`.
pub trait Checkpoint: Send + Sync + 'static {
    /// Capture-time gate: how many faces are in this still?
    fn detect(
        &self,
        still: &Still,
    ) -> impl Future<Output = Result<Detection, CheckpointError>> + Send;

    /// Decision-point check: does the probe match the enrolled references?
    ///
    /// The returned decision is already normalized — the single-face rule is
    /// the service's contract, but the client never trusts it blindly.
    fn verify(
        &self,
        probe: &Still,
        references: &[Vec<u8>],
    ) -> impl Future<Output = Result<VerificationDecision, CheckpointError>> + Send;

    /// Identify enrolled students present in one classroom photo.
    fn scan_classroom(
        &self,
        photo: &Still,
        roster: &[RosterEntry],
    ) -> impl Future<Output = Result<Vec<String>, CheckpointError>> + Send;

    /// Post-submission anti-cheating analysis of one quiz attempt.
    fn analyze_behavior(
        &self,
        report: &BehaviorReport,
    ) -> impl Future<Output = Result<BehaviorAnalysis, CheckpointError>> + Send;

    /// Generate 5–7 feedback questions for a subject.
    fn feedback_questions(
        &self,
        subject: &str,
    ) -> impl Future<Output = Result<Vec<String>, CheckpointError>> + Send;
}
