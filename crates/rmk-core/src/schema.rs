//! Graph schema: node types, edge predicates, and activation tuning.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Primary node types persisted in the graph.
///
/// The first entry of a node's `types` list is its primary type; it drives
/// `type:<T>` policy resource matching and ranking behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    User,
    Entity,
    Event,
    Insight,
    Pattern,
    Preference,
    Fact,
    Rule,
    Group,
    Conversation,
    WorkspaceInvitation,
    ShareLink,
    Policy,
    AuditEvent,
    UserSettings,
}

impl NodeType {
    /// All declared node types, in schema order.
    pub const ALL: [NodeType; 15] = [
        NodeType::User,
        NodeType::Entity,
        NodeType::Event,
        NodeType::Insight,
        NodeType::Pattern,
        NodeType::Preference,
        NodeType::Fact,
        NodeType::Rule,
        NodeType::Group,
        NodeType::Conversation,
        NodeType::WorkspaceInvitation,
        NodeType::ShareLink,
        NodeType::Policy,
        NodeType::AuditEvent,
        NodeType::UserSettings,
    ];

    /// Canonical string form, as stored in the graph type tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::User => "User",
            NodeType::Entity => "Entity",
            NodeType::Event => "Event",
            NodeType::Insight => "Insight",
            NodeType::Pattern => "Pattern",
            NodeType::Preference => "Preference",
            NodeType::Fact => "Fact",
            NodeType::Rule => "Rule",
            NodeType::Group => "Group",
            NodeType::Conversation => "Conversation",
            NodeType::WorkspaceInvitation => "WorkspaceInvitation",
            NodeType::ShareLink => "ShareLink",
            NodeType::Policy => "Policy",
            NodeType::AuditEvent => "AuditEvent",
            NodeType::UserSettings => "UserSettings",
        }
    }

    /// Whether nodes of this type must carry a non-empty name.
    #[must_use]
    pub fn requires_name(&self) -> bool {
        matches!(
            self,
            NodeType::User
                | NodeType::Entity
                | NodeType::Event
                | NodeType::Insight
                | NodeType::Pattern
                | NodeType::Preference
                | NodeType::Fact
                | NodeType::Group
        )
    }

    /// Whether nodes of this type must carry a tenant namespace.
    ///
    /// System types (Policy, AuditEvent, …) live outside tenant boundaries.
    #[must_use]
    pub fn requires_namespace(&self) -> bool {
        matches!(
            self,
            NodeType::Entity
                | NodeType::Event
                | NodeType::Fact
                | NodeType::Insight
                | NodeType::Pattern
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown node type: {s}"))
    }
}

/// Directed edge predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    PartnerIs,
    FamilyMember,
    FriendOf,
    HasManager,
    WorksOn,
    WorksAt,
    Colleague,
    Likes,
    Dislikes,
    IsAllergicTo,
    Prefers,
    HasInterest,
    CausedBy,
    BlockedBy,
    ResultsIn,
    Contradicts,
    OccurredOn,
    DerivedFrom,
    SynthesizedFrom,
    Supersedes,
    Knows,
    GroupHasAdmin,
    GroupHasMember,
    UserSettings,
}

impl EdgeType {
    /// All declared edge predicates.
    pub const ALL: [EdgeType; 24] = [
        EdgeType::PartnerIs,
        EdgeType::FamilyMember,
        EdgeType::FriendOf,
        EdgeType::HasManager,
        EdgeType::WorksOn,
        EdgeType::WorksAt,
        EdgeType::Colleague,
        EdgeType::Likes,
        EdgeType::Dislikes,
        EdgeType::IsAllergicTo,
        EdgeType::Prefers,
        EdgeType::HasInterest,
        EdgeType::CausedBy,
        EdgeType::BlockedBy,
        EdgeType::ResultsIn,
        EdgeType::Contradicts,
        EdgeType::OccurredOn,
        EdgeType::DerivedFrom,
        EdgeType::SynthesizedFrom,
        EdgeType::Supersedes,
        EdgeType::Knows,
        EdgeType::GroupHasAdmin,
        EdgeType::GroupHasMember,
        EdgeType::UserSettings,
    ];

    /// Predicates admitting at most one `status=current` edge per source.
    pub const FUNCTIONAL: [EdgeType; 3] =
        [EdgeType::HasManager, EdgeType::PartnerIs, EdgeType::WorksAt];

    /// Canonical predicate string, as stored in the graph.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::PartnerIs => "partner_is",
            EdgeType::FamilyMember => "family_member",
            EdgeType::FriendOf => "friend_of",
            EdgeType::HasManager => "has_manager",
            EdgeType::WorksOn => "works_on",
            EdgeType::WorksAt => "works_at",
            EdgeType::Colleague => "colleague",
            EdgeType::Likes => "likes",
            EdgeType::Dislikes => "dislikes",
            EdgeType::IsAllergicTo => "is_allergic_to",
            EdgeType::Prefers => "prefers",
            EdgeType::HasInterest => "has_interest",
            EdgeType::CausedBy => "caused_by",
            EdgeType::BlockedBy => "blocked_by",
            EdgeType::ResultsIn => "results_in",
            EdgeType::Contradicts => "contradicts",
            EdgeType::OccurredOn => "occurred_on",
            EdgeType::DerivedFrom => "derived_from",
            EdgeType::SynthesizedFrom => "synthesized_from",
            EdgeType::Supersedes => "supersedes",
            EdgeType::Knows => "knows",
            EdgeType::GroupHasAdmin => "group_has_admin",
            EdgeType::GroupHasMember => "group_has_member",
            EdgeType::UserSettings => "user_settings",
        }
    }

    /// Whether `(from, edge_type)` admits at most one current edge.
    /// Writing a new one archives the prior.
    #[must_use]
    pub fn is_functional(&self) -> bool {
        Self::FUNCTIONAL.contains(self)
    }

    /// Whether this predicate may connect endpoints in different namespaces.
    ///
    /// Membership edges hang off Group anchors, settings edges off system
    /// nodes, and summary links may cross into a batch summary node.
    #[must_use]
    pub fn allows_cross_namespace(&self) -> bool {
        matches!(
            self,
            EdgeType::GroupHasAdmin
                | EdgeType::GroupHasMember
                | EdgeType::UserSettings
                | EdgeType::SynthesizedFrom
        )
    }

    /// Default facet weight when none is stored.
    #[must_use]
    pub fn default_weight() -> f64 {
        0.5
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.to_ascii_lowercase();
        EdgeType::ALL
            .iter()
            .find(|e| e.as_str() == needle)
            .copied()
            .ok_or_else(|| format!("unknown edge type: {s}"))
    }
}

/// Edge lifecycle status facet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    #[default]
    Current,
    Archived,
    Pending,
}

impl EdgeStatus {
    /// Lowercase string form, as stored in the status facet.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeStatus::Current => "current",
            EdgeStatus::Archived => "archived",
            EdgeStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for EdgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activation tuning shared by ingestion, traversal, and reflection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationConfig {
    /// Floor for any persisted activation value
    pub min_activation: f64,
    /// Ceiling for any persisted activation value
    pub max_activation: f64,
    /// Activation assigned to a freshly created entity
    pub initial_activation: f64,
    /// Boost applied on each online re-ingestion of an existing entity
    pub boost_per_access: f64,
    /// Boost applied per access during bulk migration loads
    pub bulk_boost_per_access: f64,
    /// Daily exponential decay rate applied by reflection
    pub decay_rate_per_day: f64,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            min_activation: 0.01,
            max_activation: 1.0,
            initial_activation: 0.15,
            boost_per_access: 0.15,
            bulk_boost_per_access: 0.008,
            decay_rate_per_day: 0.005,
        }
    }
}

impl ActivationConfig {
    /// Clamp a candidate activation into the configured bounds.
    #[must_use]
    pub fn clamp(&self, activation: f64) -> f64 {
        activation.clamp(self.min_activation, self.max_activation)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_round_trip() {
        for t in NodeType::ALL {
            assert_eq!(t.as_str().parse::<NodeType>().unwrap(), t);
        }
    }

    #[test]
    fn test_node_type_parse_case_insensitive() {
        assert_eq!("entity".parse::<NodeType>().unwrap(), NodeType::Entity);
        assert!("Widget".parse::<NodeType>().is_err());
    }

    #[test]
    fn test_namespace_requirements() {
        assert!(NodeType::Entity.requires_namespace());
        assert!(NodeType::Insight.requires_namespace());
        assert!(!NodeType::Policy.requires_namespace());
        assert!(!NodeType::AuditEvent.requires_namespace());
    }

    #[test]
    fn test_edge_type_round_trip() {
        for e in EdgeType::ALL {
            assert_eq!(e.as_str().parse::<EdgeType>().unwrap(), e);
        }
    }

    #[test]
    fn test_functional_edges() {
        assert!(EdgeType::HasManager.is_functional());
        assert!(EdgeType::PartnerIs.is_functional());
        assert!(EdgeType::WorksAt.is_functional());
        assert!(!EdgeType::Knows.is_functional());
        assert!(!EdgeType::WorksOn.is_functional());
    }

    #[test]
    fn test_cross_namespace_edges() {
        assert!(EdgeType::GroupHasMember.allows_cross_namespace());
        assert!(EdgeType::SynthesizedFrom.allows_cross_namespace());
        assert!(!EdgeType::WorksAt.allows_cross_namespace());
    }

    #[test]
    fn test_edge_type_serde_snake_case() {
        let json = serde_json::to_string(&EdgeType::WorksAt).unwrap();
        assert_eq!(json, "\"works_at\"");
        let parsed: EdgeType = serde_json::from_str("\"group_has_admin\"").unwrap();
        assert_eq!(parsed, EdgeType::GroupHasAdmin);
    }

    #[test]
    fn test_edge_status_serde() {
        assert_eq!(
            serde_json::to_string(&EdgeStatus::Archived).unwrap(),
            "\"archived\""
        );
        assert_eq!(EdgeStatus::default(), EdgeStatus::Current);
    }

    #[test]
    fn test_activation_clamp() {
        let cfg = ActivationConfig::default();
        assert!((cfg.clamp(5.0) - 1.0).abs() < f64::EPSILON);
        assert!((cfg.clamp(-1.0) - 0.01).abs() < f64::EPSILON);
        assert!((cfg.clamp(0.5) - 0.5).abs() < f64::EPSILON);
    }
}
