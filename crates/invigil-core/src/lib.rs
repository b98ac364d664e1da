//! invigil-core — Domain logic for face enrollment, attendance marking,
//! and proctored assessment sessions.
//!
//! Pure state machines and decision types. All I/O (camera, checkpoint
//! service, storage) lives in the other crates; this one must stay
//! deterministic and unit-testable.

pub mod attendance;
pub mod enrollment;
pub mod proctor;
pub mod types;

pub use attendance::{evaluate, AttendanceOutcome, CONFIDENCE_THRESHOLD};
pub use enrollment::{CaptureOutcome, EnrollmentPhase, EnrollmentSession};
pub use proctor::{Question, QuizSession, Submission, TickOutcome};
pub use types::{AttendanceEvent, EnrollmentRecord, StepKind, Still, VerificationDecision};
