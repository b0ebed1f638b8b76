//! Status conditions.
//!
//! A condition is a tri-state flag with bookkeeping. `last_transition_time`
//! only moves when the status changes; `last_update_time` moves on every
//! write through the setters below.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// Not yet determined.
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        })
    }
}

/// A single status condition as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. `assigned`.
    #[serde(rename = "type")]
    pub type_: String,
    /// Current status.
    pub status: ConditionStatus,
    /// Last time the condition was written (RFC 3339).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_update_time: String,
    /// Last time the status changed (RFC 3339).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_transition_time: String,
    /// Machine-readable reason for the last transition.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Human-readable details.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Set once a template version has been given its permanent number.
pub const VERSION_ASSIGNED: ConditionType = ConditionType("assigned");

/// Named accessor over a condition list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionType(pub &'static str);

impl ConditionType {
    /// Returns the condition name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }

    /// Finds this condition in `conditions`.
    #[must_use]
    pub fn find(self, conditions: &[Condition]) -> Option<&Condition> {
        conditions.iter().find(|c| c.type_ == self.0)
    }

    /// Returns the status, `Unknown` when the condition is absent.
    #[must_use]
    pub fn status(self, conditions: &[Condition]) -> ConditionStatus {
        self.find(conditions)
            .map_or(ConditionStatus::Unknown, |c| c.status)
    }

    /// Returns `true` if the condition is present with status `True`.
    #[must_use]
    pub fn is_true(self, conditions: &[Condition]) -> bool {
        self.status(conditions) == ConditionStatus::True
    }

    /// Returns `true` if the condition is present with status `False`.
    #[must_use]
    pub fn is_false(self, conditions: &[Condition]) -> bool {
        self.status(conditions) == ConditionStatus::False
    }

    /// Returns `true` if the condition is absent or `Unknown`.
    #[must_use]
    pub fn is_unknown(self, conditions: &[Condition]) -> bool {
        self.status(conditions) == ConditionStatus::Unknown
    }

    /// Returns the reason of the condition, empty when absent.
    #[must_use]
    pub fn reason(self, conditions: &[Condition]) -> &str {
        self.find(conditions).map_or("", |c| c.reason.as_str())
    }

    /// Returns the message of the condition, empty when absent.
    #[must_use]
    pub fn message(self, conditions: &[Condition]) -> &str {
        self.find(conditions).map_or("", |c| c.message.as_str())
    }

    /// Marks the condition `True` and clears reason and message.
    pub fn set_true(self, conditions: &mut Vec<Condition>) {
        self.set(conditions, ConditionStatus::True, "", "");
    }

    /// Marks the condition `False` with a reason and message.
    pub fn set_false(self, conditions: &mut Vec<Condition>, reason: &str, message: &str) {
        self.set(conditions, ConditionStatus::False, reason, message);
    }

    /// Returns `true` if writing `status`/`reason`/`message` would change
    /// anything besides timestamps.
    #[must_use]
    pub fn differs(
        self,
        conditions: &[Condition],
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> bool {
        self.find(conditions)
            .is_none_or(|c| c.status != status || c.reason != reason || c.message != message)
    }

    fn set(
        self,
        conditions: &mut Vec<Condition>,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == self.0) {
            if existing.status != status {
                existing.last_transition_time.clone_from(&now);
            }
            existing.status = status;
            existing.last_update_time = now;
            existing.reason = reason.to_string();
            existing.message = message.to_string();
        } else {
            conditions.push(Condition {
                type_: self.0.to_string(),
                status,
                last_update_time: now.clone(),
                last_transition_time: now,
                reason: reason.to_string(),
                message: message.to_string(),
            });
        }
    }
}
