//! reqwest-backed implementation of the [`Checkpoint`] trait.
//!
//! Stills travel as multipart JPEG parts; structured inputs and every
//! response are JSON. Timeouts and non-2xx statuses surface as
//! [`CheckpointError`], never as a silent rejection.

use std::time::Duration;

use invigil_core::{Still, VerificationDecision};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;

use crate::types::{
    BehaviorAnalysis, BehaviorReport, Detection, FeedbackResponse, RosterEntry, ScanResponse,
};
use crate::{Checkpoint, CheckpointError};

/// Client for the hosted checkpoint endpoint.
#[derive(Clone)]
pub struct RemoteCheckpoint {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteCheckpoint {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CheckpointError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn jpeg_part(still: &Still) -> Result<Part, CheckpointError> {
        Ok(Part::bytes(still.jpeg.clone())
            .file_name("still.jpg")
            .mime_str("image/jpeg")?)
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CheckpointError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CheckpointError::ServiceError(format!("{status}: {body}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| CheckpointError::BadResponse(e.to_string()))
    }
}

impl Checkpoint for RemoteCheckpoint {
    async fn detect(&self, still: &Still) -> Result<Detection, CheckpointError> {
        let form = Form::new().part("image", Self::jpeg_part(still)?);
        let response = self.http.post(self.url("detect")).multipart(form).send().await?;
        let detection: Detection = Self::read_json(response).await?;
        tracing::debug!(face_count = detection.face_count, "detect checkpoint");
        Ok(detection)
    }

    async fn verify(
        &self,
        probe: &Still,
        references: &[Vec<u8>],
    ) -> Result<VerificationDecision, CheckpointError> {
        let mut form = Form::new().part("probe", Self::jpeg_part(probe)?);
        for (i, reference) in references.iter().enumerate() {
            form = form.part(
                format!("reference{i}"),
                Part::bytes(reference.clone())
                    .file_name(format!("reference{i}.jpg"))
                    .mime_str("image/jpeg")?,
            );
        }
        let response = self.http.post(self.url("verify")).multipart(form).send().await?;
        let decision: VerificationDecision = Self::read_json(response).await?;
        // The single-face rule is the service's contract, but it is enforced
        // again here so a violating payload never enters the process.
        let decision = decision.normalize();
        tracing::debug!(
            face_count = decision.face_count,
            is_verified = decision.is_verified,
            confidence = decision.confidence,
            "verify checkpoint"
        );
        Ok(decision)
    }

    async fn scan_classroom(
        &self,
        photo: &Still,
        roster: &[RosterEntry],
    ) -> Result<Vec<String>, CheckpointError> {
        // Empty roster can never identify anyone; skip the round trip.
        if roster.is_empty() {
            return Ok(Vec::new());
        }
        let roster_json = serde_json::to_string(roster)
            .map_err(|e| CheckpointError::BadResponse(e.to_string()))?;
        let form = Form::new()
            .part("photo", Self::jpeg_part(photo)?)
            .text("roster", roster_json);
        let response = self
            .http
            .post(self.url("classroom-scan"))
            .multipart(form)
            .send()
            .await?;
        let scan: ScanResponse = Self::read_json(response).await?;
        Ok(scan.identified_ids)
    }

    async fn analyze_behavior(
        &self,
        report: &BehaviorReport,
    ) -> Result<BehaviorAnalysis, CheckpointError> {
        let response = self
            .http
            .post(self.url("behavior-analysis"))
            .json(report)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn feedback_questions(&self, subject: &str) -> Result<Vec<String>, CheckpointError> {
        let response = self
            .http
            .post(self.url("feedback-questions"))
            .json(&serde_json::json!({ "subject": subject }))
            .send()
            .await?;
        let feedback: FeedbackResponse = Self::read_json(response).await?;
        Ok(feedback.questions)
    }
}
