//! Per-request-type decomposition strategies.
//!
//! Each strategy emits an ordered list of task templates; dependencies are
//! declared by task type and resolved to concrete ids after creation.

use serde_json::{json, Value};

use super::{GovernanceRequest, RequestType};

/// A task to be created on the blackboard for a request.
#[derive(Debug, Clone)]
pub struct TaskTemplate {
    pub task_type: String,
    pub priority: i32,
    pub requirements: Value,
    pub input_data: Value,
    /// Dependencies by task type, resolved to ids after creation.
    pub depends_on: Vec<String>,
}

impl TaskTemplate {
    fn new(task_type: &str, priority: i32, requirements: Value, input_data: Value) -> Self {
        Self {
            task_type: task_type.to_owned(),
            priority,
            requirements,
            input_data,
            depends_on: Vec::new(),
        }
    }

    fn depends_on(mut self, task_types: &[&str]) -> Self {
        self.depends_on = task_types.iter().map(|t| (*t).to_owned()).collect();
        self
    }
}

/// Decompose a request into its task templates.
#[must_use]
pub fn decompose(request: &GovernanceRequest) -> Vec<TaskTemplate> {
    match request.request_type {
        RequestType::ModelDeployment => model_deployment(request),
        RequestType::PolicyEnforcement => policy_enforcement(request),
        RequestType::ComplianceAudit => compliance_audit(request),
    }
}

fn input_field(request: &GovernanceRequest, field: &str) -> Value {
    request.input_data.get(field).cloned().unwrap_or_else(|| json!({}))
}

fn model_deployment(request: &GovernanceRequest) -> Vec<TaskTemplate> {
    let jurisdictions = request
        .input_data
        .get("jurisdictions")
        .cloned()
        .unwrap_or_else(|| json!(["US", "EU"]));

    vec![
        TaskTemplate::new(
            "ethical_analysis",
            1,
            json!({
                "analysis_types": ["bias_assessment", "fairness_evaluation", "harm_potential"],
                "constitutional_principles": ["safety", "transparency", "consent"],
            }),
            json!({
                "model_info": input_field(request, "model_info"),
                "deployment_context": input_field(request, "deployment_context"),
                "stakeholder_impact": input_field(request, "stakeholder_impact"),
            }),
        ),
        TaskTemplate::new(
            "legal_compliance",
            1,
            json!({
                "jurisdictions": jurisdictions,
                "compliance_frameworks": ["GDPR", "CCPA", "AI_Act"],
                "constitutional_principles": ["data_privacy", "consent", "transparency"],
            }),
            json!({
                "model_info": input_field(request, "model_info"),
                "data_sources": input_field(request, "data_sources"),
                "user_interactions": input_field(request, "user_interactions"),
            }),
        ),
        TaskTemplate::new(
            "operational_validation",
            2,
            json!({
                "performance_thresholds": input_field(request, "performance_requirements"),
                "scalability_requirements": input_field(request, "scalability_requirements"),
                "constitutional_principles": ["resource_limits", "reversibility"],
            }),
            json!({
                "model_info": input_field(request, "model_info"),
                "infrastructure_constraints": input_field(request, "infrastructure_constraints"),
                "performance_benchmarks": input_field(request, "performance_benchmarks"),
            }),
        )
        .depends_on(&["ethical_analysis"]),
    ]
}

fn policy_enforcement(request: &GovernanceRequest) -> Vec<TaskTemplate> {
    let policy_scope = request
        .input_data
        .get("policy_scope")
        .cloned()
        .unwrap_or_else(|| json!("organizational"));

    vec![
        TaskTemplate::new(
            "policy_analysis",
            1,
            json!({
                "policy_scope": policy_scope,
                "stakeholder_analysis": true,
                "constitutional_principles": ["transparency", "consent", "least_privilege"],
            }),
            json!({
                "policy_document": input_field(request, "policy_document"),
                "enforcement_context": input_field(request, "enforcement_context"),
                "affected_systems": request
                    .input_data
                    .get("affected_systems")
                    .cloned()
                    .unwrap_or_else(|| json!([])),
            }),
        ),
        TaskTemplate::new(
            "implementation_planning",
            2,
            json!({
                "rollout_strategy": "phased",
                "monitoring_requirements": true,
                "constitutional_principles": ["reversibility", "least_privilege"],
            }),
            json!({
                "policy_requirements": input_field(request, "policy_requirements"),
                "system_architecture": input_field(request, "system_architecture"),
                "resource_constraints": input_field(request, "resource_constraints"),
            }),
        )
        .depends_on(&["policy_analysis"]),
        TaskTemplate::new(
            "compliance_monitoring",
            3,
            json!({
                "monitoring_frequency": "continuous",
                "alert_thresholds": input_field(request, "alert_thresholds"),
                "constitutional_principles": ["transparency", "consent"],
            }),
            json!({
                "monitoring_scope": input_field(request, "monitoring_scope"),
                "compliance_metrics": input_field(request, "compliance_metrics"),
                "reporting_requirements": input_field(request, "reporting_requirements"),
            }),
        )
        .depends_on(&["implementation_planning"]),
    ]
}

fn compliance_audit(request: &GovernanceRequest) -> Vec<TaskTemplate> {
    let frameworks = request
        .input_data
        .get("frameworks")
        .cloned()
        .unwrap_or_else(|| json!(["GDPR", "CCPA"]));
    let audit_scope = request
        .input_data
        .get("audit_scope")
        .cloned()
        .unwrap_or_else(|| json!("full"));

    vec![
        TaskTemplate::new(
            "data_compliance_audit",
            1,
            json!({
                "audit_scope": audit_scope,
                "compliance_frameworks": frameworks,
                "constitutional_principles": ["data_privacy", "transparency", "consent"],
            }),
            json!({
                "data_sources": input_field(request, "data_sources"),
                "processing_activities": input_field(request, "processing_activities"),
                "data_subject_rights": input_field(request, "data_subject_rights"),
            }),
        ),
        TaskTemplate::new(
            "system_compliance_audit",
            2,
            json!({
                "system_scope": input_field(request, "system_scope"),
                "security_requirements": input_field(request, "security_requirements"),
                "constitutional_principles": ["safety", "least_privilege", "reversibility"],
            }),
            json!({
                "system_architecture": input_field(request, "system_architecture"),
                "access_controls": input_field(request, "access_controls"),
                "audit_logs": input_field(request, "audit_logs"),
            }),
        ),
        TaskTemplate::new(
            "governance_compliance_audit",
            3,
            json!({
                "policy_compliance": true,
                "constitutional_principles": ["transparency", "consent", "safety"],
            }),
            json!({
                "governance_policies": input_field(request, "governance_policies"),
                "decision_logs": input_field(request, "decision_logs"),
                "stakeholder_feedback": input_field(request, "stakeholder_feedback"),
            }),
        )
        .depends_on(&["data_compliance_audit", "system_compliance_audit"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(request_type: RequestType) -> GovernanceRequest {
        GovernanceRequest::new(request_type, "requester-1", json!({}))
    }

    #[test]
    fn test_model_deployment_graph_shape() {
        let templates = decompose(&request(RequestType::ModelDeployment));
        assert_eq!(templates.len(), 3);
        assert_eq!(templates[0].task_type, "ethical_analysis");
        assert_eq!(templates[0].priority, 1);
        assert!(templates[0].depends_on.is_empty());
        assert_eq!(templates[1].task_type, "legal_compliance");
        assert!(templates[1].depends_on.is_empty());
        assert_eq!(templates[2].task_type, "operational_validation");
        assert_eq!(templates[2].priority, 2);
        assert_eq!(templates[2].depends_on, vec!["ethical_analysis".to_owned()]);
    }

    #[test]
    fn test_policy_enforcement_is_a_chain() {
        let templates = decompose(&request(RequestType::PolicyEnforcement));
        assert_eq!(templates.len(), 3);
        assert_eq!(templates[1].depends_on, vec!["policy_analysis".to_owned()]);
        assert_eq!(templates[2].depends_on, vec!["implementation_planning".to_owned()]);
    }

    #[test]
    fn test_compliance_audit_fans_in() {
        let templates = decompose(&request(RequestType::ComplianceAudit));
        assert_eq!(templates.len(), 3);
        assert_eq!(
            templates[2].depends_on,
            vec!["data_compliance_audit".to_owned(), "system_compliance_audit".to_owned()]
        );
    }

    #[test]
    fn test_input_projection_defaults_to_empty_objects() {
        let templates = decompose(&request(RequestType::ModelDeployment));
        assert_eq!(templates[0].input_data["model_info"], json!({}));
        assert_eq!(templates[1].requirements["jurisdictions"], json!(["US", "EU"]));
    }

    #[test]
    fn test_input_projection_passes_through_provided_fields() {
        let req = GovernanceRequest::new(
            RequestType::ModelDeployment,
            "requester-1",
            json!({"model_info": {"name": "gpt-x"}, "jurisdictions": ["UK"]}),
        );
        let templates = decompose(&req);
        assert_eq!(templates[0].input_data["model_info"]["name"], "gpt-x");
        assert_eq!(templates[1].requirements["jurisdictions"], json!(["UK"]));
    }
}
