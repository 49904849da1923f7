//! Kernel facade.
//!
//! The one surface front-ends talk to. Every entry point runs the same
//! gauntlet — input validation, rate limit, namespace policy, content
//! filter where text flows in — before any graph work, and every outcome
//! is audited. The kernel owns the background tasks (ingestion flusher,
//! reflection loop) and winds them down in order on shutdown.

use crate::groups::WorkspaceOps;
use crate::ingest::IngestionPipeline;
use crate::reflect::{ReflectionLoop, ReflectionReport};
use crate::traverse::{self, RankParams, SpreadParams};
use crate::types::{
    ConsultationRequest, ConsultationResponse, NamespaceRegistry, RankedFact, TranscriptEvent,
};
use parking_lot::Mutex;
use rmk_cache::TieredCache;
use rmk_cognify::{Cognifier, CommunitySummaryRequest};
use rmk_core::{
    AuditEvent, Clock, EngineConfig, Error, EventBus, Namespace, Node, NodeType, NullBus, Result,
    SharedKv, SystemClock, UserContext,
};
use rmk_graph::{EntityResolver, GraphStore, SharedGraphStore};
use rmk_guard::{AuditLogger, InputKind, PolicyManager, RateLimiter};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Composes the engine. Store, KV, and Cognifier are required; the bus
/// defaults to a no-op and the clock to wall time.
pub struct KernelBuilder {
    config: EngineConfig,
    store: Option<SharedGraphStore>,
    kv: Option<Arc<dyn SharedKv>>,
    bus: Arc<dyn EventBus>,
    cognifier: Option<Arc<dyn Cognifier>>,
    clock: Arc<dyn Clock>,
}

impl KernelBuilder {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            kv: None,
            bus: Arc::new(NullBus),
            cognifier: None,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: SharedGraphStore) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_kv(mut self, kv: Arc<dyn SharedKv>) -> Self {
        self.kv = Some(kv);
        self
    }

    #[must_use]
    pub fn with_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = bus;
        self
    }

    #[must_use]
    pub fn with_cognifier(mut self, cognifier: Arc<dyn Cognifier>) -> Self {
        self.cognifier = Some(cognifier);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Assemble the kernel. Must run inside a tokio runtime: the audit
    /// drain and cache write-through workers spawn here.
    pub fn build(self) -> Result<Kernel> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or_else(|| Error::config("kernel requires a graph store"))?;
        let kv = self
            .kv
            .ok_or_else(|| Error::config("kernel requires a shared kv"))?;
        let cognifier = self
            .cognifier
            .ok_or_else(|| Error::config("kernel requires a cognifier"))?;

        let audit = AuditLogger::new(Arc::clone(&store), Arc::clone(&self.bus));
        let limiter = RateLimiter::new(Arc::clone(&kv), Arc::clone(&self.clock));
        let manager = Arc::new(PolicyManager::new(
            Arc::clone(&store),
            Arc::clone(&audit),
            limiter,
            Arc::clone(&self.clock),
        ));
        let registry = NamespaceRegistry::new();
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::clone(&store),
            Arc::clone(&cognifier),
            Arc::clone(&audit),
            registry.clone(),
            Arc::clone(&self.clock),
            self.config.clone(),
        ));
        let reflection = Arc::new(ReflectionLoop::new(
            Arc::clone(&store),
            Arc::clone(&cognifier),
            Arc::clone(&audit),
            registry.clone(),
            Arc::clone(&self.clock),
            self.config.clone(),
        ));
        let workspaces = WorkspaceOps::new(
            Arc::clone(&store),
            Arc::clone(&audit),
            Arc::clone(&self.clock),
        );
        let cache = Arc::new(TieredCache::new(
            Arc::clone(&kv),
            self.config.consult_cache_ttl(),
        ));
        let resolver = EntityResolver::new(Arc::clone(&store));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Kernel {
            config: self.config,
            store,
            cache,
            cognifier,
            audit,
            manager,
            pipeline,
            reflection,
            workspaces,
            resolver,
            clock: self.clock,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

/// The Reflective Memory Kernel.
pub struct Kernel {
    config: EngineConfig,
    store: SharedGraphStore,
    cache: Arc<TieredCache>,
    cognifier: Arc<dyn Cognifier>,
    audit: Arc<AuditLogger>,
    manager: Arc<PolicyManager>,
    pipeline: Arc<IngestionPipeline>,
    reflection: Arc<ReflectionLoop>,
    workspaces: WorkspaceOps,
    resolver: EntityResolver,
    clock: Arc<dyn Clock>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Kernel {
    /// Start the background collaborators (ingestion flusher, reflection).
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(
            Arc::clone(&self.pipeline).run_flusher(self.shutdown_tx.subscribe()),
        ));
        tasks.push(tokio::spawn(
            Arc::clone(&self.reflection).run(self.shutdown_tx.subscribe()),
        ));
    }

    /// Stop background tasks, drain buffers, and flush sinks.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.pipeline.flush().await;
        self.audit.shutdown().await;
        self.cache.shutdown().await;
    }

    /// The policy checkpoint, for administrative callers.
    #[must_use]
    pub fn policy(&self) -> &Arc<PolicyManager> {
        &self.manager
    }

    /// Consultation: ranked, synthesised recall.
    pub async fn consult(
        &self,
        user: &UserContext,
        request: ConsultationRequest,
    ) -> Result<ConsultationResponse> {
        let started = self.clock.now();
        self.manager.guard_input(InputKind::Query, &request.query)?;
        self.manager.guard_rate(user, "consult").await?;
        self.guard_namespace(user, &request.namespace, "consult", "CONSULT")
            .await?;

        let key = request.fingerprint(&user.user_id);
        if let Some(bytes) = self.cache.get(&key).await {
            if let Ok(mut response) = serde_json::from_slice::<ConsultationResponse>(&bytes) {
                response.from_cache = true;
                self.audit_consult(user, &request, &response, started).await;
                return Ok(response);
            }
        }

        let response = self.consult_uncached(&request).await?;
        match serde_json::to_vec(&response) {
            Ok(bytes) => self.cache.set(&key, bytes),
            Err(err) => tracing::warn!(error = %err, "consultation response not cacheable"),
        }
        self.audit_consult(user, &request, &response, started).await;
        Ok(response)
    }

    async fn consult_uncached(&self, request: &ConsultationRequest) -> Result<ConsultationResponse> {
        let namespace = &request.namespace;
        let now = self.clock.now();

        let mut facts = Vec::new();
        if let Some(seed) = self.find_seed(namespace, &request.query).await? {
            let spread_params = SpreadParams {
                decay_factor: self.config.traversal_decay_factor,
                max_hops: self.config.traversal_max_hops,
                min_activation: self.config.traversal_min_activation,
                max_results: self.config.traversal_max_results,
            };
            let activated =
                traverse::spread(&self.store, namespace, &seed.uid, &spread_params).await?;
            let rank_params = RankParams {
                recency_cutoff_days: self.config.recency_cutoff_days,
                recency_weight: self.config.recency_weight,
                max_results: self.config.traversal_max_results,
            };
            facts = traverse::rank_temporal(activated, now, &rank_params);
        }

        if !request.topic_filters.is_empty() {
            let filters: Vec<String> = request
                .topic_filters
                .iter()
                .map(|f| f.to_lowercase())
                .collect();
            facts.retain(|fact| {
                let haystack =
                    format!("{} {}", fact.name.to_lowercase(), fact.description.to_lowercase());
                filters.iter().any(|f| haystack.contains(f))
            });
        }

        let insights = self.top_by_activation(namespace, NodeType::Insight, 3).await?;
        let patterns = self.top_by_activation(namespace, NodeType::Pattern, 3).await?;

        // The brief is best-effort: an unavailable Cognifier degrades the
        // response, it does not fail it.
        let brief = if facts.is_empty() {
            None
        } else {
            let request = CommunitySummaryRequest {
                community_name: namespace.as_str().to_string(),
                community_type: "consultation".to_string(),
                entities: facts.iter().map(|f| f.name.clone()).collect(),
                max_summary_length: 400,
            };
            match self.cognifier.summarize_community(&request).await {
                Ok(summary) => Some(summary.summary),
                Err(err) => {
                    tracing::warn!(error = %err, "brief unavailable, returning facts only");
                    None
                }
            }
        };

        let confidence = facts.iter().map(|f| f.final_score).fold(0.0, f64::max);
        Ok(ConsultationResponse {
            brief,
            facts,
            insights,
            patterns,
            confidence,
            from_cache: false,
        })
    }

    /// Seed selection: fuzzy-match query terms (capitalised first), then
    /// full-text search as a fallback.
    async fn find_seed(&self, namespace: &Namespace, query: &str) -> Result<Option<Node>> {
        let words: Vec<&str> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() > 2)
            .collect();

        let capitalised = words
            .iter()
            .filter(|w| w.chars().next().is_some_and(char::is_uppercase));
        let rest = words
            .iter()
            .filter(|w| !w.chars().next().is_some_and(char::is_uppercase));
        for word in capitalised.chain(rest) {
            if let Some(node) = self.resolver.find_entity(namespace, word).await? {
                return Ok(Some(node));
            }
        }

        let mut hits = self.store.search_nodes(namespace, query).await?;
        Ok(if hits.is_empty() {
            None
        } else {
            Some(hits.remove(0))
        })
    }

    async fn top_by_activation(
        &self,
        namespace: &Namespace,
        node_type: NodeType,
        k: usize,
    ) -> Result<Vec<RankedFact>> {
        let mut nodes = self
            .store
            .nodes_by_type(Some(namespace), node_type, self.config.traversal_max_results)
            .await?;
        nodes.sort_by(|a, b| {
            b.activation
                .partial_cmp(&a.activation)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(nodes
            .into_iter()
            .take(k)
            .map(|node| RankedFact {
                uid: node.uid,
                name: node.name,
                description: node.description,
                activation: node.activation,
                final_score: node.activation,
                last_accessed: node.last_accessed,
            })
            .collect())
    }

    async fn audit_consult(
        &self,
        user: &UserContext,
        request: &ConsultationRequest,
        response: &ConsultationResponse,
        started: chrono::DateTime<chrono::Utc>,
    ) {
        let duration_ms = (self.clock.now() - started).num_milliseconds().max(0) as u64;
        self.audit
            .log(
                AuditEvent::allow("CONSULT", user.user_id.clone(), "CONSULT", self.clock.now())
                    .with_namespace(request.namespace.as_str().to_string())
                    .with_duration_ms(duration_ms)
                    .with_metadata("facts", serde_json::json!(response.facts.len()))
                    .with_metadata("from_cache", serde_json::json!(response.from_cache))
                    .with_client(user.ip.clone(), user.user_agent.clone()),
            )
            .await;
    }

    /// Ingestion: validate, limit, filter, enqueue.
    pub async fn ingest(&self, user: &UserContext, event: TranscriptEvent) -> Result<()> {
        self.manager
            .guard_input(InputKind::ConversationId, &event.conversation_id)?;
        self.manager
            .guard_input(InputKind::Content, &event.user_query)?;
        self.manager
            .guard_input(InputKind::Content, &event.ai_response)?;
        self.manager.guard_rate(user, "ingest").await?;
        self.guard_namespace(user, &event.namespace, "ingest", "INGEST")
            .await?;

        let user_query = self
            .manager
            .guard_content(user, "INGEST", &event.user_query)
            .await?;
        let ai_response = self
            .manager
            .guard_content(user, "INGEST", &event.ai_response)
            .await?;

        self.pipeline
            .enqueue(TranscriptEvent {
                user_query,
                ai_response,
                ..event
            })
            .await
    }

    /// Force one reflection tick. Admin/test path.
    pub async fn trigger_reflection(&self) -> Result<ReflectionReport> {
        self.reflection.tick(None).await
    }

    /// Policy-checked node fetch.
    pub async fn get_node(&self, user: &UserContext, uid: &str) -> Result<Node> {
        self.manager.guarded_get_node(user, uid, "READ").await
    }

    /// Policy-checked node deletion (namespace ownership is verified both
    /// here and at the store).
    pub async fn delete_node(&self, user: &UserContext, uid: &str) -> Result<()> {
        let node = self.manager.guarded_get_node(user, uid, "DELETE").await?;
        let namespace = node
            .namespace
            .clone()
            .ok_or_else(|| Error::deny("system nodes cannot be deleted"))?;
        self.manager
            .guard_access(user, &node, "delete", "DELETE")
            .await?;
        self.store.delete_node(uid, &namespace).await?;
        self.cache.invalidate(uid).await;
        self.audit
            .log(
                AuditEvent::allow("DELETE", user.user_id.clone(), "DELETE_NODE", self.clock.now())
                    .with_namespace(namespace.as_str().to_string())
                    .with_resource("node", uid.to_string()),
            )
            .await;
        Ok(())
    }

    /// Create a shared workspace.
    pub async fn create_group(
        &self,
        user: &UserContext,
        name: &str,
    ) -> Result<(String, Namespace)> {
        self.manager.guard_input(InputKind::Username, name)?;
        self.manager.guard_rate(user, "workspace").await?;
        self.workspaces.create_group(user, name).await
    }

    /// Add a member to a workspace (admin-only).
    pub async fn add_group_member(
        &self,
        admin: &UserContext,
        group_uid: &str,
        member_user_id: &str,
    ) -> Result<()> {
        self.manager
            .guard_input(InputKind::Username, member_user_id)?;
        self.manager.guard_rate(admin, "workspace").await?;
        self.workspaces
            .add_group_member(admin, group_uid, member_user_id)
            .await
    }

    /// Whether the user administers the group.
    pub async fn is_group_admin(&self, user: &UserContext, group_uid: &str) -> Result<bool> {
        self.workspaces.is_group_admin(user, group_uid).await
    }

    /// Invite a user into a workspace (admin-only).
    pub async fn invite_to_workspace(
        &self,
        admin: &UserContext,
        group_uid: &str,
        invitee_user_id: &str,
    ) -> Result<String> {
        self.manager
            .guard_input(InputKind::Username, invitee_user_id)?;
        self.manager.guard_rate(admin, "workspace").await?;
        self.workspaces
            .invite_to_workspace(admin, group_uid, invitee_user_id)
            .await
    }

    /// Accept a pending invitation addressed to the caller.
    pub async fn accept_invitation(
        &self,
        user: &UserContext,
        invitation_uid: &str,
    ) -> Result<()> {
        self.manager.guard_rate(user, "workspace").await?;
        self.workspaces.accept_invitation(user, invitation_uid).await
    }

    /// Mint a share-link token (admin-only).
    pub async fn create_share_link(
        &self,
        admin: &UserContext,
        group_uid: &str,
    ) -> Result<String> {
        self.manager.guard_rate(admin, "workspace").await?;
        self.workspaces.create_share_link(admin, group_uid).await
    }

    /// Join a workspace via a share-link token.
    pub async fn join_via_share_link(&self, user: &UserContext, token: &str) -> Result<String> {
        self.manager.guard_rate(user, "workspace").await?;
        self.workspaces.join_via_share_link(user, token).await
    }

    /// Revoke a share link (admin-only).
    pub async fn revoke_share_link(&self, admin: &UserContext, token: &str) -> Result<()> {
        self.manager.guard_rate(admin, "workspace").await?;
        self.workspaces.revoke_share_link(admin, token).await
    }

    /// List a workspace's members (members only).
    pub async fn get_workspace_members(
        &self,
        user: &UserContext,
        group_uid: &str,
    ) -> Result<Vec<Node>> {
        self.manager.guard_rate(user, "workspace").await?;
        self.workspaces.get_workspace_members(user, group_uid).await
    }

    /// Namespace gate shared by consult/ingest: the policy engine sees a
    /// scope stub carrying the requested namespace.
    async fn guard_namespace(
        &self,
        user: &UserContext,
        namespace: &Namespace,
        action: &str,
        event_type: &str,
    ) -> Result<()> {
        let scope = Node::new(NodeType::Conversation, "scope", self.clock.now())
            .with_namespace(namespace.clone());
        self.manager
            .guard_access(user, &scope, action, event_type)
            .await
    }
}
