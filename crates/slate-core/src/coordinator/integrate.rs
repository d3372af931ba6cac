//! Result integration: conflict scanning, confidence fusion, and the final
//! governance decision over per-task outputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{GovernanceRequest, RequestType};
use crate::models::ConflictSeverity;
use crate::payload;
use crate::validator::ValidationOutcome;
use crate::CONSTITUTIONAL_HASH;

/// Confidence assumed for outputs that do not report one.
const DEFAULT_CONFIDENCE: f64 = 0.7;

/// A disagreement found while scanning task outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedConflict {
    /// `approval_conflict` or `risk_assessment_conflict`.
    pub kind: String,
    pub description: String,
    pub severity: ConflictSeverity,
    pub involved_tasks: Vec<String>,
}

/// The fused decision for a governance request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegratedResult {
    pub success: bool,
    pub request_id: String,
    pub request_type: RequestType,
    pub conflicts: Vec<DetectedConflict>,
    pub constitutional_compliance: ValidationOutcome,
    pub recommendations: Vec<String>,
    pub confidence_score: f64,
    /// Request-type specific fields (`deployment_approved`, per-task
    /// assessments, ...), passed through untyped.
    pub assessments: Value,
    pub constitutional_hash: String,
}

/// Scan outputs keyed by task type for disagreements.
///
/// Two findings are possible: approval booleans that disagree, and risk
/// levels whose ordinal distance exceeds one step.
#[must_use]
pub fn detect_result_conflicts(task_results: &BTreeMap<String, Value>) -> Vec<DetectedConflict> {
    let mut conflicts = Vec::new();

    let approvals: BTreeMap<&str, bool> = task_results
        .iter()
        .filter_map(|(task_type, output)| {
            payload::approved(output).map(|a| (task_type.as_str(), a))
        })
        .collect();
    let approved_count = approvals.values().filter(|a| **a).count();
    if approved_count > 0 && approved_count < approvals.len() {
        conflicts.push(DetectedConflict {
            kind: "approval_conflict".to_owned(),
            description: format!("Conflicting approval decisions: {approvals:?}"),
            severity: ConflictSeverity::High,
            involved_tasks: approvals.keys().map(|t| (*t).to_owned()).collect(),
        });
    }

    let risk_levels: BTreeMap<&str, payload::RiskLevel> = task_results
        .iter()
        .filter_map(|(task_type, output)| {
            payload::risk_level(output).map(|r| (task_type.as_str(), r))
        })
        .collect();
    let ordinals: Vec<i32> = risk_levels.values().map(|r| r.ordinal()).collect();
    if let (Some(max), Some(min)) = (ordinals.iter().max(), ordinals.iter().min()) {
        if max - min > 1 {
            let described: BTreeMap<&str, String> = risk_levels
                .iter()
                .map(|(task_type, risk)| (*task_type, risk.to_string()))
                .collect();
            conflicts.push(DetectedConflict {
                kind: "risk_assessment_conflict".to_owned(),
                description: format!("Conflicting risk assessments: {described:?}"),
                severity: ConflictSeverity::Medium,
                involved_tasks: risk_levels.keys().map(|t| (*t).to_owned()).collect(),
            });
        }
    }

    conflicts
}

/// Harmonic mean of reported confidences, the conservative fusion: one low
/// score drags the whole estimate down. Outputs without a positive
/// confidence contribute nothing; no scores at all yields the default.
#[must_use]
pub fn fused_confidence(task_results: &BTreeMap<String, Value>) -> f64 {
    let scores: Vec<f64> = task_results
        .values()
        .filter_map(payload::confidence)
        .filter(|score| *score > 0.0)
        .collect();
    if scores.is_empty() {
        return DEFAULT_CONFIDENCE;
    }
    let harmonic = scores.len() as f64 / scores.iter().map(|s| 1.0 / s).sum::<f64>();
    harmonic.min(1.0)
}

/// Concatenate per-output recommendations and append coordination-level
/// ones for known patterns.
#[must_use]
pub fn gather_recommendations(
    request: &GovernanceRequest,
    task_results: &BTreeMap<String, Value>,
) -> Vec<String> {
    let mut recommendations: Vec<String> = task_results
        .values()
        .flat_map(|output| payload::recommendations(output))
        .collect();

    if request.request_type == RequestType::ModelDeployment {
        if task_results
            .get("ethical_analysis")
            .is_some_and(|r| payload::flag(r, "bias_detected"))
        {
            recommendations.push("Consider bias mitigation strategies before deployment".into());
        }
        if task_results
            .get("operational_validation")
            .is_some_and(|r| payload::flag(r, "performance_concerns"))
        {
            recommendations.push("Address performance concerns before full deployment".into());
        }
    }

    recommendations
}

/// Build the fused decision for a request.
#[must_use]
pub fn integrate(
    request: &GovernanceRequest,
    task_results: &BTreeMap<String, Value>,
    compliance: ValidationOutcome,
) -> IntegratedResult {
    let conflicts = detect_result_conflicts(task_results);
    let success = conflicts.is_empty() && compliance.compliant;

    let output_for = |task_type: &str| -> Value {
        task_results.get(task_type).cloned().unwrap_or_else(|| json!({}))
    };

    let mut assessments = Map::new();
    match request.request_type {
        RequestType::ModelDeployment => {
            assessments.insert("deployment_approved".into(), json!(success));
            assessments.insert("ethical_assessment".into(), output_for("ethical_analysis"));
            assessments.insert("legal_assessment".into(), output_for("legal_compliance"));
            assessments
                .insert("operational_assessment".into(), output_for("operational_validation"));
        }
        RequestType::PolicyEnforcement => {
            assessments.insert("enforcement_approved".into(), json!(success));
            assessments.insert("policy_analysis".into(), output_for("policy_analysis"));
            assessments
                .insert("implementation_plan".into(), output_for("implementation_planning"));
            assessments.insert("monitoring_plan".into(), output_for("compliance_monitoring"));
        }
        RequestType::ComplianceAudit => {
            assessments.insert("audit_passed".into(), json!(success));
            assessments.insert("data_audit".into(), output_for("data_compliance_audit"));
            assessments.insert("system_audit".into(), output_for("system_compliance_audit"));
            assessments
                .insert("governance_audit".into(), output_for("governance_compliance_audit"));
        }
    }

    IntegratedResult {
        success,
        request_id: request.id.clone(),
        request_type: request.request_type,
        conflicts,
        constitutional_compliance: compliance,
        recommendations: gather_recommendations(request, task_results),
        confidence_score: fused_confidence(task_results),
        assessments: Value::Object(assessments),
        constitutional_hash: CONSTITUTIONAL_HASH.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
        entries
            .iter()
            .map(|(task_type, output)| ((*task_type).to_owned(), output.clone()))
            .collect()
    }

    fn request() -> GovernanceRequest {
        GovernanceRequest::new(RequestType::ModelDeployment, "requester-1", json!({}))
    }

    #[test]
    fn test_agreeing_approvals_raise_no_conflict() {
        let conflicts = detect_result_conflicts(&results(&[
            ("ethical_analysis", json!({"approved": true})),
            ("legal_compliance", json!({"approved": true})),
        ]));
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_disagreeing_approvals_are_high_severity() {
        let conflicts = detect_result_conflicts(&results(&[
            ("ethical_analysis", json!({"approved": true})),
            ("legal_compliance", json!({"approved": false})),
        ]));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, "approval_conflict");
        assert_eq!(conflicts[0].severity, ConflictSeverity::High);
    }

    #[test]
    fn test_adjacent_risk_levels_are_tolerated() {
        let conflicts = detect_result_conflicts(&results(&[
            ("ethical_analysis", json!({"risk_level": "low"})),
            ("legal_compliance", json!({"risk_level": "medium"})),
        ]));
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_distant_risk_levels_conflict_at_medium_severity() {
        let conflicts = detect_result_conflicts(&results(&[
            ("ethical_analysis", json!({"risk_level": "low"})),
            ("legal_compliance", json!({"risk_level": "critical"})),
        ]));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, "risk_assessment_conflict");
        assert_eq!(conflicts[0].severity, ConflictSeverity::Medium);
    }

    #[test]
    fn test_fused_confidence_is_harmonic_mean() {
        let confidence = fused_confidence(&results(&[
            ("a", json!({"confidence": 0.9})),
            ("b", json!({"confidence": 0.85})),
            ("c", json!({"confidence": 0.8})),
        ]));
        // 3 / (1/0.9 + 1/0.85 + 1/0.8) ~= 0.8486
        assert!((confidence - 0.8486).abs() < 0.001);
    }

    #[test]
    fn test_fused_confidence_defaults_without_scores() {
        let confidence = fused_confidence(&results(&[("a", json!({}))]));
        assert_eq!(confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_fused_confidence_ignores_non_positive() {
        let confidence = fused_confidence(&results(&[
            ("a", json!({"confidence": 0.0})),
            ("b", json!({"confidence": 0.8})),
        ]));
        assert!((confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_bias_pattern_appends_recommendation() {
        let recommendations = gather_recommendations(
            &request(),
            &results(&[(
                "ethical_analysis",
                json!({"bias_detected": true, "recommendations": ["re-sample training data"]}),
            )]),
        );
        assert_eq!(recommendations.len(), 2);
        assert!(recommendations[1].contains("bias mitigation"));
    }

    #[test]
    fn test_integrate_success_requires_no_conflicts_and_compliance() {
        let outputs = results(&[
            ("ethical_analysis", json!({"approved": true, "confidence": 0.9})),
            ("legal_compliance", json!({"approved": true, "confidence": 0.85})),
            ("operational_validation", json!({"approved": true, "confidence": 0.8})),
        ]);
        let result = integrate(&request(), &outputs, ValidationOutcome::framework_absent());
        assert!(result.success);
        assert_eq!(result.assessments["deployment_approved"], true);
        assert_eq!(result.constitutional_hash, CONSTITUTIONAL_HASH);

        let failed = integrate(
            &request(),
            &outputs,
            ValidationOutcome::violation(vec!["consent basis missing".into()]),
        );
        assert!(!failed.success);
        assert_eq!(failed.assessments["deployment_approved"], false);
    }
}
