//! External constitutional-validator contract.
//!
//! The validator's internal rules are out of scope; the coordinator only
//! consumes this trait. Absence of a validator is always safe: the default
//! implementation reports compliance with `framework_available = false`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, CONSTITUTIONAL_HASH};

/// Verdict returned by a constitutional validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub compliant: bool,
    pub violations: Vec<String>,
    pub principle_adherence: BTreeMap<String, bool>,
    /// Validator confidence in [0, 1].
    pub confidence: f64,
    /// `false` when no real validator backed this verdict.
    pub framework_available: bool,
    pub validation_timestamp: String,
    pub constitutional_hash: String,
}

impl ValidationOutcome {
    /// The verdict used when no validator is configured: compliant, with
    /// the default principle set and the framework flagged absent.
    #[must_use]
    pub fn framework_absent() -> Self {
        let principle_adherence = ["safety", "transparency", "consent", "data_privacy"]
            .into_iter()
            .map(|p| (p.to_owned(), true))
            .collect();
        Self {
            compliant: true,
            violations: Vec::new(),
            principle_adherence,
            confidence: 0.8,
            framework_available: false,
            validation_timestamp: Utc::now().to_rfc3339(),
            constitutional_hash: CONSTITUTIONAL_HASH.to_owned(),
        }
    }

    /// A non-compliant verdict with the given violations.
    #[must_use]
    pub fn violation(violations: Vec<String>) -> Self {
        Self {
            compliant: false,
            violations,
            principle_adherence: BTreeMap::new(),
            confidence: 0.0,
            framework_available: true,
            validation_timestamp: Utc::now().to_rfc3339(),
            constitutional_hash: CONSTITUTIONAL_HASH.to_owned(),
        }
    }
}

/// A compliance oracle over request and result payloads.
#[async_trait]
pub trait ConstitutionalValidator: Send + Sync {
    /// Validate a payload against constitutional requirements.
    async fn validate(
        &self,
        request_type: &str,
        input_data: &Value,
        requirements: &[String],
    ) -> Result<ValidationOutcome>;
}

/// The absent validator: every payload is compliant.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbsentValidator;

#[async_trait]
impl ConstitutionalValidator for AbsentValidator {
    async fn validate(
        &self,
        _request_type: &str,
        _input_data: &Value,
        _requirements: &[String],
    ) -> Result<ValidationOutcome> {
        Ok(ValidationOutcome::framework_absent())
    }
}
