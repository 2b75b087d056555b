//! Status conditions reported on the managed machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition kinds. One entry per kind is kept in [`Conditions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    #[serde(rename = "VMProvisioned")]
    VmProvisioned,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::VmProvisioned => "VMProvisioned",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Machine-readable reason attached to a `False` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionReason {
    PoweringOn,
    PoweringOnFailed,
    PoweringOff,
    PoweringOffFailed,
}

impl ConditionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionReason::PoweringOn => "PoweringOn",
            ConditionReason::PoweringOnFailed => "PoweringOnFailed",
            ConditionReason::PoweringOff => "PoweringOff",
            ConditionReason::PoweringOffFailed => "PoweringOffFailed",
        }
    }
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
    #[serde(rename = "")]
    None,
}

/// A single observable status entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ConditionReason>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn false_condition(
        kind: ConditionType,
        reason: ConditionReason,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            status: ConditionStatus::False,
            reason: Some(reason),
            severity,
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Set of conditions keyed by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the condition of the same kind.
    ///
    /// `last_transition_time` only moves when the status flips.
    pub fn set(&mut self, mut condition: Condition) {
        match self.0.iter_mut().find(|c| c.kind == condition.kind) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.0.push(condition),
        }
    }

    pub fn mark_false(
        &mut self,
        kind: ConditionType,
        reason: ConditionReason,
        severity: Severity,
        message: impl Into<String>,
    ) {
        self.set(Condition::false_condition(kind, reason, severity, message));
    }

    pub fn get(&self, kind: ConditionType) -> Option<&Condition> {
        self.0.iter().find(|c| c.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
