//! Core authorization types

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Policy effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyEffect {
    /// Allow the action
    #[default]
    Allow,
    /// Deny the action
    Deny,
}

impl PolicyEffect {
    /// Lowercase name, as stored by adapters
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyEffect::Allow => "allow",
            PolicyEffect::Deny => "deny",
        }
    }
}

/// Permission rule: `subject` may (or may not) perform `action` on `object`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyTuple {
    /// User or role name
    pub subject: String,

    /// Resource name
    pub object: String,

    /// Operation name
    pub action: String,

    /// Allow unless stated otherwise
    #[serde(default)]
    pub effect: PolicyEffect,
}

impl PolicyTuple {
    /// Create an allow rule
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
            effect: PolicyEffect::Allow,
        }
    }

    /// Create a deny rule
    pub fn deny(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self::new(subject, object, action).with_effect(PolicyEffect::Deny)
    }

    /// Override the effect
    pub fn with_effect(mut self, effect: PolicyEffect) -> Self {
        self.effect = effect;
        self
    }

    /// Reject tuples with an empty field
    pub fn validate(&self) -> Result<()> {
        require_non_empty("subject", &self.subject)?;
        require_non_empty("object", &self.object)?;
        require_non_empty("action", &self.action)
    }
}

impl fmt::Display for PolicyTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p({}, {}, {}, {})",
            self.subject,
            self.object,
            self.action,
            self.effect.as_str()
        )
    }
}

/// Role assignment or role-hierarchy edge: `member` belongs to `group`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupingTuple {
    pub member: String,
    pub group: String,
}

impl GroupingTuple {
    pub fn new(member: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            group: group.into(),
        }
    }

    /// Reject edges with an empty endpoint
    pub fn validate(&self) -> Result<()> {
        require_non_empty("member", &self.member)?;
        require_non_empty("group", &self.group)
    }
}

impl fmt::Display for GroupingTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g({}, {})", self.member, self.group)
    }
}

/// Enforcement request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnforcementRequest {
    pub subject: String,
    pub object: String,
    pub action: String,
}

impl EnforcementRequest {
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
        }
    }
}

/// Reason for an enforcement decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// An allow rule matched and no deny rule overrode it
    Allowed,
    /// An explicit deny rule matched
    Denied,
    /// No rule matched the request
    NoMatch,
}

/// Explained enforcement decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the request is allowed
    pub allowed: bool,

    /// Rule that decided the request, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<PolicyTuple>,

    pub reason: DecisionReason,
}

impl Decision {
    pub(crate) fn allow(matched: PolicyTuple) -> Self {
        Self {
            allowed: true,
            matched: Some(matched),
            reason: DecisionReason::Allowed,
        }
    }

    pub(crate) fn deny(matched: PolicyTuple) -> Self {
        Self {
            allowed: false,
            matched: Some(matched),
            reason: DecisionReason::Denied,
        }
    }

    pub(crate) fn no_match() -> Self {
        Self {
            allowed: false,
            matched: None,
            reason: DecisionReason::NoMatch,
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(AuthzError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}
