use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single encoded still image captured from the camera.
///
/// Always JPEG at the adapter's fixed target resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Still {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// The fixed, ordered set of enrollment capture poses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    Front,
    LeftProfile,
    RightProfile,
}

impl StepKind {
    /// All poses, in capture order.
    pub const ALL: [StepKind; 3] = [
        StepKind::Front,
        StepKind::LeftProfile,
        StepKind::RightProfile,
    ];

    /// Number of capture steps in a full enrollment.
    pub const COUNT: usize = Self::ALL.len();

    /// Zero-based position in the capture order.
    pub fn index(self) -> usize {
        match self {
            StepKind::Front => 0,
            StepKind::LeftProfile => 1,
            StepKind::RightProfile => 2,
        }
    }

    /// Human-facing label shown while capturing this pose.
    pub fn label(self) -> &'static str {
        match self {
            StepKind::Front => "face the camera directly",
            StepKind::LeftProfile => "turn your head to the left",
            StepKind::RightProfile => "turn your head to the right",
        }
    }
}

/// Result of a single verification checkpoint call.
///
/// `is_verified` is meaningful only when exactly one face was detected;
/// [`normalize`](Self::normalize) enforces that at the trust boundary so a
/// misbehaving service can never produce a violating value in-process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDecision {
    pub face_count: u32,
    pub is_verified: bool,
    pub confidence: f32,
    pub reason: String,
}

impl VerificationDecision {
    /// Enforce the single-face invariant and clamp confidence to [0, 1].
    ///
    /// Whenever `face_count != 1`, the match flag is forced false and the
    /// confidence zeroed, regardless of what the service reported.
    pub fn normalize(mut self) -> Self {
        if self.face_count != 1 {
            self.is_verified = false;
            self.confidence = 0.0;
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

/// The accepted still set for one user, one image reference per capture step.
///
/// Can only be constructed with exactly [`StepKind::COUNT`] references, so a
/// partial record is unrepresentable and can never reach the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub user: String,
    /// Ordered image references, one per pose in [`StepKind::ALL`] order.
    pub image_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl EnrollmentRecord {
    /// Build a record from a full ordered reference set.
    ///
    /// Returns `None` unless exactly one reference per capture step is given.
    pub fn new(user: impl Into<String>, image_refs: Vec<String>) -> Option<Self> {
        if image_refs.len() != StepKind::COUNT {
            return None;
        }
        Some(Self {
            user: user.into(),
            image_refs,
            created_at: Utc::now(),
        })
    }
}

/// A single accepted presence assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: Uuid,
    pub user: String,
    /// Calendar day (`YYYY-MM-DD`) for the daily variant, or an explicit
    /// session id for the session-based variant.
    pub session_key: String,
    pub recorded_at: DateTime<Utc>,
    pub confidence: f32,
    pub present: bool,
}

impl AttendanceEvent {
    /// Event for the daily-attendance variant, keyed by calendar day.
    pub fn daily(user: impl Into<String>, day: NaiveDate, confidence: f32) -> Self {
        Self::for_session(user, day.format("%Y-%m-%d").to_string(), confidence)
    }

    /// Event keyed by an explicit session id.
    pub fn for_session(
        user: impl Into<String>,
        session_key: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            session_key: session_key.into(),
            recorded_at: Utc::now(),
            confidence,
            present: true,
        }
    }
}
