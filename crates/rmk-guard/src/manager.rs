//! The policy checkpoint.
//!
//! Every kernel handler calls through [`PolicyManager`] before touching
//! the graph: rate limit, input validation, content filtering, then policy
//! evaluation. Each denial produces exactly one audit event with the
//! matching user, action, and reason, so tenant checks are auditable from
//! a single call site.

use crate::audit::AuditLogger;
use crate::engine::{Decision, PolicyEngine};
use crate::filter::{ContentFilter, InputKind, InputValidator};
use crate::ratelimit::RateLimiter;
use rmk_core::{AuditEvent, Clock, Error, Node, NodeType, Policy, Result, UserContext};
use rmk_graph::{GraphStore, SharedGraphStore};
use std::sync::Arc;

/// Composed policy layer: engine + persistence + audit + limits + filter.
pub struct PolicyManager {
    engine: PolicyEngine,
    store: SharedGraphStore,
    audit: Arc<AuditLogger>,
    limiter: RateLimiter,
    filter: ContentFilter,
    validator: InputValidator,
    clock: Arc<dyn Clock>,
}

impl PolicyManager {
    #[must_use]
    pub fn new(
        store: SharedGraphStore,
        audit: Arc<AuditLogger>,
        limiter: RateLimiter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine: PolicyEngine::new(),
            store,
            audit,
            limiter,
            filter: ContentFilter::new(),
            validator: InputValidator::new(),
            clock,
        }
    }

    /// Swap in a custom content filter.
    #[must_use]
    pub fn with_filter(mut self, filter: ContentFilter) -> Self {
        self.filter = filter;
        self
    }

    /// The audit logger handlers share.
    #[must_use]
    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Persist a policy as a `Policy` node and activate it.
    pub async fn save_policy(&self, policy: Policy) -> Result<String> {
        let node = Node::new(NodeType::Policy, policy.id.clone(), self.clock.now())
            .with_description(serde_json::to_string(&policy)?);
        let uid = self.store.create_node(&node).await?;

        let mut policies = (*self.engine.policies()).clone();
        policies.retain(|p| p.id != policy.id);
        policies.push(policy);
        self.engine.replace_policies(policies);
        Ok(uid)
    }

    /// Reload the active policy set from the store.
    pub async fn reload_policies(&self) -> Result<usize> {
        let nodes = self
            .store
            .nodes_by_type(None, NodeType::Policy, 10_000)
            .await?;
        let mut policies = Vec::with_capacity(nodes.len());
        for node in nodes {
            match serde_json::from_str::<Policy>(&node.description) {
                Ok(policy) => policies.push(policy),
                Err(err) => {
                    tracing::warn!(uid = %node.uid, error = %err, "unparseable policy node skipped");
                }
            }
        }
        let count = policies.len();
        self.engine.replace_policies(policies);
        Ok(count)
    }

    /// Enforce the caller's rate quota for an endpoint, auditing denials.
    pub async fn guard_rate(&self, user: &UserContext, endpoint: &str) -> Result<()> {
        match self.limiter.check(user, endpoint).await {
            Ok(()) => Ok(()),
            Err(err @ Error::RateLimited { retry_after_secs }) => {
                self.audit
                    .log(
                        AuditEvent::deny(
                            endpoint.to_uppercase(),
                            user.user_id.clone(),
                            "RATE_LIMITED",
                            format!("quota exhausted, retry after {retry_after_secs}s"),
                            self.clock.now(),
                        )
                        .with_client(user.ip.clone(), user.user_agent.clone()),
                    )
                    .await;
                Err(err)
            }
            Err(other) => Err(other),
        }
    }

    /// Validate one external input string.
    pub fn guard_input(&self, kind: InputKind, text: &str) -> Result<()> {
        self.validator.validate(kind, text)
    }

    /// Run text through the content filter, auditing blocks.
    ///
    /// Returns the (possibly masked) text to use downstream.
    pub async fn guard_content(
        &self,
        user: &UserContext,
        event_type: &str,
        text: &str,
    ) -> Result<String> {
        match self.filter.scan(text) {
            Ok(outcome) => Ok(outcome.text),
            Err(Error::ContentBlocked { reason }) => {
                self.audit
                    .log(
                        AuditEvent::deny(
                            event_type.to_string(),
                            user.user_id.clone(),
                            "CONTENT_BLOCKED",
                            reason.clone(),
                            self.clock.now(),
                        )
                        .with_client(user.ip.clone(), user.user_agent.clone()),
                    )
                    .await;
                Err(Error::ContentBlocked { reason })
            }
            Err(other) => Err(other),
        }
    }

    /// Evaluate `(user, resource, action)`, auditing denials.
    pub async fn guard_access(
        &self,
        user: &UserContext,
        resource: &Node,
        action: &str,
        event_type: &str,
    ) -> Result<()> {
        match self.engine.evaluate(user, resource, action) {
            Decision::Allowed => Ok(()),
            Decision::Denied { reason } => {
                self.audit
                    .log(
                        AuditEvent::deny(
                            event_type.to_string(),
                            user.user_id.clone(),
                            action.to_string(),
                            reason.clone(),
                            self.clock.now(),
                        )
                        .with_namespace(
                            resource
                                .namespace
                                .as_ref()
                                .map(|ns| ns.as_str().to_string())
                                .unwrap_or_default(),
                        )
                        .with_resource("node", resource.uid.clone())
                        .with_client(user.ip.clone(), user.user_agent.clone()),
                    )
                    .await;
                Err(Error::deny(reason))
            }
        }
    }

    /// Fetch a node and verify read access in one step.
    ///
    /// Denials never leak node contents: the caller gets the error only.
    pub async fn guarded_get_node(
        &self,
        user: &UserContext,
        uid: &str,
        event_type: &str,
    ) -> Result<Node> {
        let node = self
            .store
            .get_node(uid)
            .await?
            .ok_or_else(|| Error::not_found(format!("node {uid}")))?;
        self.guard_access(user, &node, "read", event_type).await?;
        Ok(node)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use rmk_cache::InMemoryKv;
    use rmk_core::{ManualClock, Namespace, NullBus, SharedKv, Tier};
    use rmk_graph::{GraphStore, MemoryGraphStore};

    fn start() -> DateTime<Utc> {
        "2025-06-01T12:00:00Z".parse().unwrap()
    }

    struct Fixture {
        manager: PolicyManager,
        store: Arc<MemoryGraphStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryGraphStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at(start()));
        let audit = AuditLogger::new(
            store.clone() as SharedGraphStore,
            Arc::new(NullBus),
        );
        let limiter = RateLimiter::new(
            Arc::new(InMemoryKv::new()) as Arc<dyn SharedKv>,
            Arc::clone(&clock),
        );
        let manager = PolicyManager::new(
            store.clone() as SharedGraphStore,
            audit,
            limiter,
            clock,
        );
        Fixture { manager, store }
    }

    async fn alice_entity(store: &MemoryGraphStore) -> String {
        store
            .create_node(
                &Node::new(NodeType::Entity, "Acme", start())
                    .with_namespace(Namespace::parse("user_alice").unwrap()),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_cross_tenant_get_denied_with_audit() {
        let fx = fixture();
        let uid = alice_entity(&fx.store).await;
        let bob = UserContext::new("bob");

        let err = fx
            .manager
            .guarded_get_node(&bob, &uid, "CONSULT")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyDeny { ref reason } if reason == "namespace mismatch"));

        fx.manager.audit().shutdown().await;
        let events = fx
            .store
            .nodes_by_type(None, NodeType::AuditEvent, 10)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attributes.get("user_id").unwrap(), "bob");
        assert_eq!(events[0].description, "namespace mismatch");
    }

    #[tokio::test]
    async fn test_owner_get_allowed_no_audit_deny() {
        let fx = fixture();
        let uid = alice_entity(&fx.store).await;
        let alice = UserContext::new("alice");

        let node = fx
            .manager
            .guarded_get_node(&alice, &uid, "CONSULT")
            .await
            .unwrap();
        assert_eq!(node.name, "Acme");

        fx.manager.audit().shutdown().await;
        let events = fx
            .store
            .nodes_by_type(None, NodeType::AuditEvent, 10)
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_audited() {
        let fx = fixture();
        let user = UserContext::new("alice").with_tier(Tier::Free);

        for _ in 0..20 {
            fx.manager.guard_rate(&user, "consult").await.unwrap();
        }
        let err = fx.manager.guard_rate(&user, "consult").await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));

        fx.manager.audit().shutdown().await;
        let events = fx
            .store
            .nodes_by_type(None, NodeType::AuditEvent, 10)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "RATE_LIMITED");
    }

    #[tokio::test]
    async fn test_save_and_reload_policies() {
        let fx = fixture();
        fx.manager
            .save_policy(Policy::deny(
                "no-writes",
                vec!["*".to_string()],
                vec!["type:Entity".to_string()],
                vec!["write".to_string()],
            ))
            .await
            .unwrap();

        // A fresh manager over the same store picks the policy up.
        let count = fx.manager.reload_policies().await.unwrap();
        assert_eq!(count, 1);

        let uid = alice_entity(&fx.store).await;
        let alice = UserContext::new("alice");
        let node = fx.store.get_node(&uid).await.unwrap().unwrap();
        let err = fx
            .manager
            .guard_access(&alice, &node, "write", "INGEST")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyDeny { .. }));
    }

    #[tokio::test]
    async fn test_guard_content_masks() {
        let fx = fixture();
        let user = UserContext::new("alice");
        let text = fx
            .manager
            .guard_content(&user, "INGEST", "mail alice@example.com")
            .await
            .unwrap();
        assert!(!text.contains("alice@example.com"));
    }

    #[tokio::test]
    async fn test_guard_input_rejects_suspicious_query() {
        let fx = fixture();
        assert!(fx
            .manager
            .guard_input(InputKind::Query, "x UNION SELECT *")
            .is_err());
    }
}
