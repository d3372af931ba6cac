//! Narrow typed surface over opaque result payloads.
//!
//! Task outputs, knowledge content, and consensus results are carried as
//! `serde_json::Value` end to end; the coordination core only ever
//! interprets the handful of well-known fields exposed here.

use serde_json::Value;
use std::str::FromStr;
use strum::{Display, EnumString};

/// Ordinal risk scale used for conflict detection: low=1 ... critical=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Fixed ordinal; distances over this scale drive conflict filing.
    #[must_use]
    pub const fn ordinal(self) -> i32 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

/// The `approved` boolean, if the payload carries one.
#[must_use]
pub fn approved(payload: &Value) -> Option<bool> {
    payload.get("approved").and_then(Value::as_bool)
}

/// The `risk_level` field parsed onto the ordinal scale.
#[must_use]
pub fn risk_level(payload: &Value) -> Option<RiskLevel> {
    payload
        .get("risk_level")
        .and_then(Value::as_str)
        .and_then(|s| RiskLevel::from_str(s).ok())
}

/// The `confidence` field, if present and numeric.
#[must_use]
pub fn confidence(payload: &Value) -> Option<f64> {
    payload.get("confidence").and_then(Value::as_f64)
}

/// The `recommendations` list, flattened to strings.
#[must_use]
pub fn recommendations(payload: &Value) -> Vec<String> {
    payload
        .get("recommendations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// The governance request a payload belongs to, checking both field
/// spellings that appear in task requirements and knowledge content.
#[must_use]
pub fn governance_request_id(payload: &Value) -> Option<&str> {
    payload
        .get("governance_request_id")
        .or_else(|| payload.get("request_id"))
        .and_then(Value::as_str)
}

/// Whether a boolean flag field is set true.
#[must_use]
pub fn flag(payload: &Value, field: &str) -> bool {
    payload.get(field).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_risk_level_ordinals() {
        assert_eq!(RiskLevel::Low.ordinal(), 1);
        assert_eq!(RiskLevel::Critical.ordinal(), 4);
        assert_eq!(RiskLevel::Critical.ordinal() - RiskLevel::Low.ordinal(), 3);
    }

    #[test]
    fn test_risk_level_parses_snake_case() {
        assert_eq!(risk_level(&json!({"risk_level": "low"})), Some(RiskLevel::Low));
        assert_eq!(
            risk_level(&json!({"risk_level": "critical"})),
            Some(RiskLevel::Critical)
        );
        assert_eq!(risk_level(&json!({"risk_level": "unknown"})), None);
        assert_eq!(risk_level(&json!({})), None);
    }

    #[test]
    fn test_approved_and_confidence() {
        let payload = json!({"approved": true, "confidence": 0.85});
        assert_eq!(approved(&payload), Some(true));
        assert_eq!(confidence(&payload), Some(0.85));
        assert_eq!(approved(&json!({"approved": "yes"})), None);
    }

    #[test]
    fn test_recommendations_skips_non_strings() {
        let payload = json!({"recommendations": ["a", 2, "b"]});
        assert_eq!(recommendations(&payload), vec!["a".to_owned(), "b".to_owned()]);
        assert!(recommendations(&json!({})).is_empty());
    }

    #[test]
    fn test_governance_request_id_both_spellings() {
        assert_eq!(
            governance_request_id(&json!({"governance_request_id": "req-1"})),
            Some("req-1")
        );
        assert_eq!(governance_request_id(&json!({"request_id": "req-2"})), Some("req-2"));
        assert_eq!(governance_request_id(&json!({})), None);
    }
}
