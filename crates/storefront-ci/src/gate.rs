//! Merge gate evaluation over recorded run events.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use storefront_state::RunEvent;

use crate::stage::{ACCEPTANCE_STAGE, DEPLOY_STAGE};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Merge gate rules.
pub struct MergeGate;

impl MergeGate {
    /// Evaluate a run's events.
    ///
    /// Gate rule:
    /// - Every `stage_started` must be followed by `stage_passed` or
    ///   `stage_failed` for the same stage
    /// - Any `stage_failed` is a violation
    /// - Each stage in `required` must have passed, and their passes must
    ///   appear in the order given
    pub fn evaluate(events: &[RunEvent], required: &[&str]) -> GateVerdict {
        let mut violations = Vec::new();

        let mut started = Vec::new();
        let mut completed = HashSet::new();
        let mut passed_at: HashMap<String, u64> = HashMap::new();

        for event in events {
            let stage = event.payload["stage"].as_str().unwrap_or("unknown").to_string();
            match event.kind.as_str() {
                "stage_started" => {
                    if !started.contains(&stage) {
                        started.push(stage);
                    }
                }
                "stage_passed" => {
                    completed.insert(stage.clone());
                    passed_at.entry(stage).or_insert(event.seq);
                }
                "stage_failed" => {
                    let error = event.payload["error"].as_str().unwrap_or("unknown error");
                    violations.push(format!("Stage '{}' failed: {}", stage, error));
                    completed.insert(stage);
                }
                _ => {}
            }
        }

        for stage in &started {
            if !completed.contains(stage) {
                violations.push(format!("Stage '{}' was started but never completed", stage));
            }
        }

        let mut last: Option<(&str, u64)> = None;
        for &stage in required {
            match passed_at.get(stage) {
                None => {
                    if !violations.iter().any(|v| v.contains(&format!("'{}'", stage))) {
                        violations.push(format!("Required stage '{}' did not pass", stage));
                    }
                }
                Some(&seq) => {
                    if let Some((prev, prev_seq)) = last {
                        if seq < prev_seq {
                            violations.push(format!(
                                "Stage '{}' passed before required predecessor '{}'",
                                stage, prev
                            ));
                        }
                    }
                    last = Some((stage, seq));
                }
            }
        }

        let passed = violations.is_empty();
        let message = if passed {
            "All stages passed".to_string()
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }

    /// Evaluate a production run: verification stages, then a recorded
    /// deployment, then acceptance.
    pub fn evaluate_production(events: &[RunEvent], verification: &[String]) -> GateVerdict {
        let mut required: Vec<&str> = verification.iter().map(String::as_str).collect();
        required.push(DEPLOY_STAGE);
        required.push(ACCEPTANCE_STAGE);
        let mut verdict = Self::evaluate(events, &required);

        let deployed_at = events
            .iter()
            .find(|e| e.kind == "deployment_recorded")
            .map(|e| e.seq);
        let acceptance_at = events
            .iter()
            .find(|e| e.payload["stage"] == ACCEPTANCE_STAGE)
            .map(|e| e.seq);

        let ordering = match (deployed_at, acceptance_at) {
            (None, _) => Some("No deployment was recorded".to_string()),
            (Some(d), Some(a)) if a < d => {
                Some("Acceptance began before the deployment was recorded".to_string())
            }
            _ => None,
        };
        if let Some(violation) = ordering {
            verdict.violations.push(violation);
            verdict.passed = false;
            verdict.message = format!("Gate failed with {} violation(s)", verdict.violations.len());
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn event(seq: u64, kind: &str, stage: &str) -> RunEvent {
        RunEvent {
            seq,
            kind: kind.to_string(),
            payload: json!({ "stage": stage }),
            timestamp: Utc::now(),
        }
    }

    fn deployed(seq: u64) -> RunEvent {
        RunEvent {
            seq,
            kind: "deployment_recorded".to_string(),
            payload: json!({ "environment": "production" }),
            timestamp: Utc::now(),
        }
    }

    fn production_events() -> Vec<RunEvent> {
        vec![
            event(1, "stage_started", "lint"),
            event(2, "stage_passed", "lint"),
            event(3, "stage_started", "build"),
            event(4, "stage_passed", "build"),
            event(5, "stage_started", "deploy"),
            deployed(6),
            event(7, "stage_passed", "deploy"),
            event(8, "stage_started", "acceptance"),
            event(9, "stage_passed", "acceptance"),
        ]
    }

    fn verification() -> Vec<String> {
        vec!["lint".to_string(), "build".to_string()]
    }

    #[test]
    fn test_empty_events_passes() {
        let verdict = MergeGate::evaluate(&[], &[]);
        assert!(verdict.passed);
    }

    #[test]
    fn test_single_failed_stage() {
        let mut failed = event(2, "stage_failed", "lint");
        failed.payload["error"] = json!("exited with code 1");
        let events = vec![event(1, "stage_started", "lint"), failed];

        let verdict = MergeGate::evaluate(&events, &[]);
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 1);
        assert!(verdict.violations[0].contains("exited with code 1"));
    }

    #[test]
    fn test_stage_started_but_never_completed() {
        let events = vec![event(1, "stage_started", "build")];
        let verdict = MergeGate::evaluate(&events, &[]);
        assert!(!verdict.passed);
        assert!(verdict.violations[0].contains("never completed"));
    }

    #[test]
    fn skipped_stage_is_not_a_violation() {
        let events = vec![
            event(1, "stage_started", "lint"),
            event(2, "stage_passed", "lint"),
            event(3, "stage_skipped", "acceptance"),
        ];
        assert!(MergeGate::evaluate(&events, &["lint"]).passed);
    }

    #[test]
    fn required_stage_that_was_skipped_fails() {
        let events = vec![event(1, "stage_skipped", "acceptance")];
        let verdict = MergeGate::evaluate(&events, &["acceptance"]);
        assert!(!verdict.passed);
        assert!(verdict.violations[0].contains("did not pass"));
    }

    #[test]
    fn production_in_order_passes() {
        let verdict = MergeGate::evaluate_production(&production_events(), &verification());
        assert!(verdict.passed, "{:?}", verdict.violations);
        assert_eq!(verdict.message, "All stages passed");
    }

    #[test]
    fn production_out_of_order_fails() {
        let events = vec![
            event(1, "stage_started", "deploy"),
            deployed(2),
            event(3, "stage_passed", "deploy"),
            event(4, "stage_started", "lint"),
            event(5, "stage_passed", "lint"),
            event(6, "stage_started", "build"),
            event(7, "stage_passed", "build"),
            event(8, "stage_started", "acceptance"),
            event(9, "stage_passed", "acceptance"),
        ];
        let verdict = MergeGate::evaluate_production(&events, &verification());
        assert!(!verdict.passed);
        assert!(verdict
            .violations
            .iter()
            .any(|v| v.contains("before required predecessor")));
    }

    #[test]
    fn production_without_deployment_record_fails() {
        let events: Vec<RunEvent> = production_events()
            .into_iter()
            .filter(|e| e.kind != "deployment_recorded")
            .collect();
        let verdict = MergeGate::evaluate_production(&events, &verification());
        assert!(!verdict.passed);
        assert!(verdict.violations.iter().any(|v| v.contains("No deployment")));
    }

    #[test]
    fn production_with_failed_acceptance_fails_once() {
        let mut events = production_events();
        events[8] = event(9, "stage_failed", "acceptance");
        let verdict = MergeGate::evaluate_production(&events, &verification());
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 1);
    }
}
