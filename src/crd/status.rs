//! Status types shared by every role kind

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type recorded when the role could not be written to Vault
pub const CONDITION_FAILURE: &str = "Failure";

/// Reason recorded when `create_role` fails
pub const REASON_FAILED_TO_CREATE_ROLE: &str = "FailedToCreateRole";

/// Role reconciliation phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum RolePhase {
    #[default]
    Unknown,
    Success,
    Failure,
}

/// Condition status (True, False, Unknown)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// Status condition
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: ConditionStatus,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,

    /// Machine-readable reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    /// A `Failure=True` condition stamped with the current time
    pub fn failure(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_: CONDITION_FAILURE.to_string(),
            status: ConditionStatus::True,
            last_transition_time: Utc::now(),
            reason: Some(reason.into()),
            message: Some(message.into()),
        }
    }

    /// Same observation, ignoring when it was made
    pub fn same_observation(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Status of a role resource
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleStatus {
    /// Current phase (Unknown, Success, Failure)
    #[serde(default)]
    pub phase: RolePhase,

    /// Generation the status was computed from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl RoleStatus {
    /// Replace the conditions with a single failure, keeping the original
    /// transition time when the failure is unchanged
    pub fn set_failure(&mut self, condition: Condition) {
        let condition = match self.conditions.as_slice() {
            [existing] if existing.same_observation(&condition) => existing.clone(),
            _ => condition,
        };
        self.phase = RolePhase::Failure;
        self.conditions = vec![condition];
    }

    /// Mark the given generation as successfully applied
    pub fn set_success(&mut self, generation: Option<i64>) {
        self.conditions.clear();
        self.phase = RolePhase::Success;
        self.observed_generation = generation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn repeated_failure_keeps_transition_time() {
        let mut status = RoleStatus::default();
        let mut first = Condition::failure(REASON_FAILED_TO_CREATE_ROLE, "vault sealed");
        first.last_transition_time -= Duration::minutes(10);
        status.set_failure(first.clone());

        status.set_failure(Condition::failure(REASON_FAILED_TO_CREATE_ROLE, "vault sealed"));

        assert_eq!(status.conditions, vec![first]);
        assert_eq!(status.phase, RolePhase::Failure);
    }

    #[test]
    fn new_failure_message_replaces_condition() {
        let mut status = RoleStatus::default();
        status.set_failure(Condition::failure(REASON_FAILED_TO_CREATE_ROLE, "vault sealed"));
        status.set_failure(Condition::failure(REASON_FAILED_TO_CREATE_ROLE, "permission denied"));

        assert_eq!(status.conditions.len(), 1);
        assert_eq!(
            status.conditions[0].message.as_deref(),
            Some("permission denied")
        );
    }

    #[test]
    fn success_clears_conditions() {
        let mut status = RoleStatus::default();
        status.set_failure(Condition::failure(REASON_FAILED_TO_CREATE_ROLE, "boom"));
        status.set_success(Some(3));

        assert!(status.conditions.is_empty());
        assert_eq!(status.phase, RolePhase::Success);
        assert_eq!(status.observed_generation, Some(3));
    }

    #[test]
    fn condition_serializes_type_field() {
        let json = serde_json::to_value(Condition::failure("R", "M")).unwrap();
        assert_eq!(json["type"], "Failure");
        assert_eq!(json["status"], "True");
        assert!(json.get("lastTransitionTime").is_some());
    }
}
