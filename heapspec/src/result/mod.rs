//! Verification results
//!
//! The engine's verdict on one contract. A `Failure` means the engine ran and
//! found the contract does not hold; transport problems never end up here.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verification outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum VerificationResult {
    /// Contract holds
    Success,
    /// Contract does not hold
    Failure { diagnostic: Diagnostic },
}

impl VerificationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, VerificationResult::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, VerificationResult::Failure { .. })
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            VerificationResult::Success => None,
            VerificationResult::Failure { diagnostic } => Some(diagnostic),
        }
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationResult::Success => write!(f, "verified"),
            VerificationResult::Failure { diagnostic } => {
                write!(f, "failed")?;
                if let Some(message) = diagnostic.message() {
                    write!(f, ": {message}")?;
                }
                if let Some(cex) = diagnostic.counterexample() {
                    write!(f, " (counterexample: {cex})")?;
                }
                Ok(())
            }
        }
    }
}

/// Engine explanation of a failure, passed through unmodified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostic(Value);

impl Diagnostic {
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// `message` field, or the whole payload when it is a plain string
    pub fn message(&self) -> Option<&str> {
        match &self.0 {
            Value::String(message) => Some(message),
            other => other.get("message").and_then(Value::as_str),
        }
    }

    /// Counterexample bindings from the `counterexample: [{name, value}]` field
    pub fn counterexample(&self) -> Option<Counterexample> {
        let entries = self.0.get("counterexample")?.as_array()?;
        let assignments = entries
            .iter()
            .filter_map(|entry| {
                let name = entry.get("name")?.as_str()?.to_string();
                let value = entry.get("value")?.clone();
                Some((name, value))
            })
            .collect();
        Some(Counterexample { assignments })
    }
}

/// Concrete inputs for which the contract does not hold
#[derive(Debug, Clone, PartialEq)]
pub struct Counterexample {
    pub assignments: Vec<(String, Value)>,
}

impl Counterexample {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.assignments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name} = {value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_wire_form() {
        let result: VerificationResult = serde_json::from_value(json!({ "status": "success" })).unwrap();
        assert!(result.is_success());
        assert!(result.diagnostic().is_none());
        assert_eq!(result.to_string(), "verified");
    }

    #[test]
    fn test_failure_with_counterexample() {
        let result: VerificationResult = serde_json::from_value(json!({
            "status": "failure",
            "diagnostic": {
                "message": "postcondition alloc0[0] does not hold",
                "counterexample": [
                    { "name": "a0", "value": 0 },
                    { "name": "a1", "value": 1 }
                ],
                "engine": { "goals": 2 }
            }
        }))
        .unwrap();

        assert!(result.is_failure());
        let diagnostic = result.diagnostic().unwrap();
        assert_eq!(diagnostic.message(), Some("postcondition alloc0[0] does not hold"));
        assert_eq!(diagnostic.raw()["engine"]["goals"], json!(2));

        let cex = diagnostic.counterexample().unwrap();
        assert_eq!(cex.get("a1"), Some(&json!(1)));
        assert_eq!(cex.to_string(), "a0 = 0, a1 = 1");
    }

    #[test]
    fn test_opaque_diagnostic() {
        let result: VerificationResult = serde_json::from_value(json!({
            "status": "failure",
            "diagnostic": "symbolic execution failed"
        }))
        .unwrap();
        let diagnostic = result.diagnostic().unwrap();
        assert_eq!(diagnostic.message(), Some("symbolic execution failed"));
        assert!(diagnostic.counterexample().is_none());
    }

    #[test]
    fn test_unknown_status_rejected() {
        let parsed = serde_json::from_value::<VerificationResult>(json!({ "status": "maybe" }));
        assert!(parsed.is_err());
    }
}
