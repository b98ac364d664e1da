//! Wire schemas for the hosted service. The endpoint speaks camelCase JSON.

use serde::{Deserialize, Serialize};

/// Response of the capture-time detection call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub face_count: u32,
    pub reason: String,
}

/// One student in a classroom-scan roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    /// References to the student's enrolled images.
    pub reference_refs: Vec<String>,
}

/// Input of the behavior-analysis call for one quiz attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorReport {
    pub student_id: String,
    pub quiz_id: String,
    pub tab_switch_count: u32,
    pub resource_access_log: Vec<String>,
    pub time_taken_secs: u32,
}

/// Output of the behavior-analysis call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorAnalysis {
    pub is_suspicious: bool,
    pub suspicious_reasons: Vec<String>,
    pub recommendation: String,
}

/// Response of the classroom-scan call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScanResponse {
    pub identified_ids: Vec<String>,
}

/// Response of the feedback-question call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeedbackResponse {
    pub questions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_wire_shape() {
        let json = r#"{"faceCount":2,"reason":"multiple faces detected"}"#;
        let d: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(d.face_count, 2);
    }

    #[test]
    fn test_behavior_report_serializes_camel_case() {
        let r = BehaviorReport {
            student_id: "s1".into(),
            quiz_id: "q1".into(),
            tab_switch_count: 3,
            resource_access_log: vec![],
            time_taken_secs: 540,
        };
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("tabSwitchCount").is_some());
        assert!(json.get("timeTakenSecs").is_some());
    }

    #[test]
    fn test_behavior_analysis_wire_shape() {
        let json = r#"{"isSuspicious":true,"suspiciousReasons":["frequent tab switching"],"recommendation":"review manually"}"#;
        let a: BehaviorAnalysis = serde_json::from_str(json).unwrap();
        assert!(a.is_suspicious);
        assert_eq!(a.suspicious_reasons.len(), 1);
    }
}
