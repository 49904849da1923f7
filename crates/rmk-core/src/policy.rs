//! Access-control records and caller identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Policy decision effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Effect {
    Allow,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Allow => f.write_str("ALLOW"),
            Effect::Deny => f.write_str("DENY"),
        }
    }
}

/// Classification clearance levels, extracted from `class:<level>` tags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Clearance {
    #[default]
    Public = 0,
    Internal = 1,
    Confidential = 2,
    Secret = 3,
}

impl Clearance {
    /// Extract the classification level from a node's tags.
    /// Missing or unrecognized tags read as [`Clearance::Public`].
    #[must_use]
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Self {
        tags.iter()
            .filter_map(|t| t.as_ref().strip_prefix("class:"))
            .filter_map(|level| match level {
                "public" => Some(Clearance::Public),
                "internal" => Some(Clearance::Internal),
                "confidential" => Some(Clearance::Confidential),
                "secret" => Some(Clearance::Secret),
                _ => None,
            })
            .max()
            .unwrap_or_default()
    }

    /// Numeric level used in clearance comparisons.
    #[must_use]
    pub fn level(&self) -> u8 {
        *self as u8
    }
}

/// Rate-limit tier attached to a caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Enterprise,
    Unlimited,
}

impl Tier {
    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
            Tier::Unlimited => "unlimited",
        }
    }
}

/// Identity and authorization context of a caller.
///
/// Built by the front-end from the authenticated session and passed through
/// every kernel entry point; the engine itself never mints one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    /// Group ids (without the `group_` prefix) the user belongs to.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub clearance: Clearance,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl UserContext {
    /// A minimal context for the given user id.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            groups: Vec::new(),
            clearance: Clearance::default(),
            tier: Tier::default(),
            ip: None,
            user_agent: None,
        }
    }

    /// Add a group membership.
    #[must_use]
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.groups.push(group_id.into());
        self
    }

    /// Set the clearance level.
    #[must_use]
    pub fn with_clearance(mut self, clearance: Clearance) -> Self {
        self.clearance = clearance;
        self
    }

    /// Set the rate-limit tier.
    #[must_use]
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }
}

/// A declarative allow/deny rule, persisted as a `Policy` node.
///
/// Subjects match `user:<id>`, `group:<id>`, or `*`; resources match
/// `node:<uid>`, `type:<NodeType>`, or `*`; actions match a literal action
/// name or `*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub subjects: Vec<String>,
    pub resources: Vec<String>,
    pub actions: Vec<String>,
    pub effect: Effect,
    #[serde(default)]
    pub conditions: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl Policy {
    /// A deny rule covering the given subjects/resources/actions.
    #[must_use]
    pub fn deny(
        id: impl Into<String>,
        subjects: Vec<String>,
        resources: Vec<String>,
        actions: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            subjects,
            resources,
            actions,
            effect: Effect::Deny,
            conditions: BTreeMap::new(),
            priority: 0,
            is_active: true,
        }
    }

    /// An allow rule covering the given subjects/resources/actions.
    #[must_use]
    pub fn allow(
        id: impl Into<String>,
        subjects: Vec<String>,
        resources: Vec<String>,
        actions: Vec<String>,
    ) -> Self {
        Self {
            effect: Effect::Allow,
            ..Self::deny(id, subjects, resources, actions)
        }
    }
}
