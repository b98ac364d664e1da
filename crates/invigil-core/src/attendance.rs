//! Attendance decision evaluation.
//!
//! Turns a (normalized) verification decision into one of three outcomes.
//! A rejection here is a confident negative result, not an error — service
//! failures never reach this module.

use crate::types::VerificationDecision;

/// Minimum verification confidence for an accepted match.
pub const CONFIDENCE_THRESHOLD: f32 = 0.8;

/// Branch taken for one attendance capture attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceOutcome {
    /// Persist the event and show the numeric confidence.
    Accepted { confidence: f32 },
    /// Verified identity but the score missed the threshold.
    LowConfidence { confidence: f32 },
    /// Wrong face count or no match; carries the service reason verbatim.
    NotVerified { reason: String },
}

/// Evaluate a verification decision against the acceptance threshold.
///
/// The decision is normalized first, so the single-face invariant holds even
/// if the caller forgot to do it.
pub fn evaluate(decision: VerificationDecision, threshold: f32) -> AttendanceOutcome {
    let d = decision.normalize();
    if d.face_count != 1 || !d.is_verified {
        return AttendanceOutcome::NotVerified { reason: d.reason };
    }
    if d.confidence >= threshold {
        AttendanceOutcome::Accepted {
            confidence: d.confidence,
        }
    } else {
        AttendanceOutcome::LowConfidence {
            confidence: d.confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(face_count: u32, is_verified: bool, confidence: f32) -> VerificationDecision {
        VerificationDecision {
            face_count,
            is_verified,
            confidence,
            reason: "service reason".into(),
        }
    }

    #[test]
    fn test_confident_match_is_accepted() {
        let out = evaluate(decision(1, true, 0.95), CONFIDENCE_THRESHOLD);
        assert_eq!(out, AttendanceOutcome::Accepted { confidence: 0.95 });
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let out = evaluate(decision(1, true, 0.8), CONFIDENCE_THRESHOLD);
        assert_eq!(out, AttendanceOutcome::Accepted { confidence: 0.8 });
    }

    #[test]
    fn test_low_confidence_is_rejected() {
        let out = evaluate(decision(1, true, 0.5), CONFIDENCE_THRESHOLD);
        assert_eq!(out, AttendanceOutcome::LowConfidence { confidence: 0.5 });
    }

    #[test]
    fn test_unmatched_face_carries_reason_verbatim() {
        let out = evaluate(decision(1, false, 0.9), CONFIDENCE_THRESHOLD);
        assert_eq!(
            out,
            AttendanceOutcome::NotVerified {
                reason: "service reason".into()
            }
        );
    }

    #[test]
    fn test_multiple_faces_never_accepted() {
        // Even a lying service (verified + high confidence with 2 faces)
        // cannot produce an acceptance.
        let out = evaluate(decision(2, true, 0.99), CONFIDENCE_THRESHOLD);
        assert!(matches!(out, AttendanceOutcome::NotVerified { .. }));
    }

    #[test]
    fn test_zero_faces_never_accepted() {
        let out = evaluate(decision(0, true, 0.99), CONFIDENCE_THRESHOLD);
        assert!(matches!(out, AttendanceOutcome::NotVerified { .. }));
    }
}
