//! Pure policy evaluation.
//!
//! Three gates, in order: namespace isolation, classification clearance,
//! explicit rules. The first two are structural and cannot be overridden
//! by any rule; the rule pass is deny-wins. Evaluation is a pure function
//! of `(policy set, user, resource, action)` — the engine holds the policy
//! set as a read-mostly snapshot and never takes a write lock to evaluate.

use parking_lot::RwLock;
use rmk_core::{Clearance, Effect, Node, Policy, UserContext};
use std::sync::Arc;

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied {
        reason: String,
    },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    fn denied(reason: impl Into<String>) -> Self {
        Decision::Denied {
            reason: reason.into(),
        }
    }
}

/// Evaluate one access request against a policy set.
#[must_use]
pub fn evaluate_with(
    policies: &[Policy],
    user: &UserContext,
    resource: &Node,
    action: &str,
) -> Decision {
    // Gate 1: namespace isolation. A namespaced resource is only visible
    // to its owning user or a member of its owning group.
    if let Some(namespace) = &resource.namespace {
        let owned = namespace.as_str() == format!("user_{}", user.user_id)
            || user
                .groups
                .iter()
                .any(|g| namespace.as_str() == format!("group_{g}"));
        if !owned {
            return Decision::denied("namespace mismatch");
        }
    }

    // Gate 2: classification clearance.
    let required = Clearance::from_tags(&resource.tags);
    if user.clearance < required {
        return Decision::denied(format!(
            "insufficient clearance: {} required",
            required.level()
        ));
    }

    // Gate 3: explicit rules, deny-wins.
    for policy in policies.iter().filter(|p| p.is_active) {
        if policy.effect != Effect::Deny {
            continue;
        }
        if policy.actions.iter().any(|a| action_matches(a, action))
            && policy.subjects.iter().any(|s| subject_matches(s, user))
            && policy
                .resources
                .iter()
                .any(|r| resource_matches(r, resource))
        {
            return Decision::denied(format!("denied by policy {}", policy.id));
        }
    }

    Decision::Allowed
}

fn action_matches(rule_action: &str, requested: &str) -> bool {
    rule_action == "*" || rule_action == requested
}

fn subject_matches(subject: &str, user: &UserContext) -> bool {
    if subject == "*" {
        return true;
    }
    if let Some(user_id) = subject.strip_prefix("user:") {
        return user_id == user.user_id;
    }
    if let Some(group_id) = subject.strip_prefix("group:") {
        return user.groups.iter().any(|g| g == group_id);
    }
    false
}

fn resource_matches(resource_rule: &str, resource: &Node) -> bool {
    if resource_rule == "*" {
        return true;
    }
    if let Some(uid) = resource_rule.strip_prefix("node:") {
        return uid == resource.uid;
    }
    if let Some(type_name) = resource_rule.strip_prefix("type:") {
        return type_name == resource.primary_type().as_str();
    }
    false
}

/// Policy set holder with snapshot-swapped updates.
#[derive(Default)]
pub struct PolicyEngine {
    policies: RwLock<Arc<Vec<Policy>>>,
}

impl PolicyEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the active policy set.
    pub fn replace_policies(&self, policies: Vec<Policy>) {
        *self.policies.write() = Arc::new(policies);
    }

    /// Snapshot of the active policy set.
    #[must_use]
    pub fn policies(&self) -> Arc<Vec<Policy>> {
        Arc::clone(&self.policies.read())
    }

    /// Evaluate an access request against the current snapshot.
    #[must_use]
    pub fn evaluate(&self, user: &UserContext, resource: &Node, action: &str) -> Decision {
        let snapshot = self.policies();
        evaluate_with(&snapshot, user, resource, action)
    }
}
