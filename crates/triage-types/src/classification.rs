//! Classification result and routing precedence.
//!
//! The classifier is a language model and does not promise mutually
//! exclusive flags, so [`Classification::route`] resolves any flag
//! combination with a fixed precedence:
//! administrative > safety-critical > complex > direct.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered urgency scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    #[serde(alias = "Low", alias = "LOW")]
    Low,
    #[serde(alias = "Medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "High", alias = "HIGH")]
    High,
    #[serde(alias = "Emergency", alias = "EMERGENCY")]
    Emergency,
}

impl fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

/// Structured routing decision produced once per query.
///
/// `is_complex` and `urgency_level` are required for a payload to count
/// as a classification; the remaining fields default when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub is_complex: bool,

    #[serde(default)]
    pub is_administrative: bool,

    #[serde(default)]
    pub is_safety_critical: bool,

    /// Clinical category label (e.g. "respiratory").
    #[serde(default)]
    pub category: String,

    pub urgency_level: UrgencyLevel,

    /// The classifier's free-text justification.
    #[serde(default)]
    pub reasoning: String,

    /// Whether the classifier believes retrieval is needed. Informational;
    /// routing is decided by [`Classification::route`].
    #[serde(default)]
    pub requires_rag: bool,
}

impl Classification {
    /// A classification with every flag cleared.
    pub fn simple(urgency_level: UrgencyLevel) -> Self {
        Self {
            is_complex: false,
            is_administrative: false,
            is_safety_critical: false,
            category: "general".into(),
            urgency_level,
            reasoning: String::new(),
            requires_rag: false,
        }
    }

    /// Select exactly one branch for this classification.
    pub fn route(&self) -> Route {
        if self.is_administrative {
            Route::Administrative
        } else if self.is_safety_critical {
            Route::SafetyCritical
        } else if self.is_complex {
            Route::Complex
        } else {
            Route::Direct
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.urgency_level == UrgencyLevel::Emergency
    }
}

/// The statically known set of response branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Administrative question: direct answer, no retrieval.
    Administrative,
    /// Medication / treatment safety: safety specialist with focused retrieval.
    SafetyCritical,
    /// Complex clinical question: retrieval followed by grounded generation.
    Complex,
    /// Everything else: direct answer, no retrieval.
    Direct,
}

impl Route {
    /// Whether this branch runs the general retrieval + generation path.
    pub fn uses_rag(self) -> bool {
        matches!(self, Self::Complex)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Administrative => "administrative",
            Self::SafetyCritical => "safety_critical",
            Self::Complex => "complex",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(admin: bool, safety: bool, complex: bool) -> Classification {
        Classification {
            is_administrative: admin,
            is_safety_critical: safety,
            is_complex: complex,
            ..Classification::simple(UrgencyLevel::Low)
        }
    }

    #[test]
    fn route_precedence_covers_every_flag_combination() {
        for admin in [false, true] {
            for safety in [false, true] {
                for complex in [false, true] {
                    let expected = if admin {
                        Route::Administrative
                    } else if safety {
                        Route::SafetyCritical
                    } else if complex {
                        Route::Complex
                    } else {
                        Route::Direct
                    };
                    assert_eq!(
                        flags(admin, safety, complex).route(),
                        expected,
                        "admin={admin} safety={safety} complex={complex}"
                    );
                }
            }
        }
    }

    #[test]
    fn administrative_beats_complex() {
        assert_eq!(flags(true, false, true).route(), Route::Administrative);
    }

    #[test]
    fn urgency_is_ordered() {
        assert!(UrgencyLevel::Low < UrgencyLevel::Medium);
        assert!(UrgencyLevel::Medium < UrgencyLevel::High);
        assert!(UrgencyLevel::High < UrgencyLevel::Emergency);
    }

    #[test]
    fn deserialize_minimal_payload() {
        let c: Classification =
            serde_json::from_str(r#"{"is_complex": true, "urgency_level": "High"}"#).unwrap();
        assert!(c.is_complex);
        assert!(!c.is_administrative);
        assert_eq!(c.urgency_level, UrgencyLevel::High);
        assert_eq!(c.route(), Route::Complex);
    }

    #[test]
    fn deserialize_rejects_missing_required_fields() {
        let err = serde_json::from_str::<Classification>(r#"{"category": "respiratory"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn deserialize_rejects_unknown_urgency() {
        let err = serde_json::from_str::<Classification>(
            r#"{"is_complex": false, "urgency_level": "whenever"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn route_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Route::SafetyCritical).unwrap(),
            "\"safety_critical\""
        );
        assert!(Route::Complex.uses_rag());
        assert!(!Route::SafetyCritical.uses_rag());
    }
}
