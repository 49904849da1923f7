//! Group and workspace operations.
//!
//! A `Group` node whose namespace is `group_<uuid>` anchors each shared
//! workspace; Users attach via `group_has_admin` / `group_has_member`
//! edges from the group node. Membership truth lives in the graph, not in
//! the caller's claimed context. Invitations and share links are nodes in
//! the group's namespace whose lifecycle advances by tag enrichment
//! (`status:pending` → accepted, `active` → revoked) — nothing is deleted.

use rmk_core::{
    AuditEvent, Clock, Edge, EdgeType, Error, Namespace, Node, NodeType, Result, UserContext,
};
use rmk_graph::{GraphStore, SharedGraphStore};
use rmk_guard::AuditLogger;
use std::sync::Arc;
use uuid::Uuid;

/// Workspace membership and sharing operations.
pub struct WorkspaceOps {
    store: SharedGraphStore,
    audit: Arc<AuditLogger>,
    clock: Arc<dyn Clock>,
}

impl WorkspaceOps {
    #[must_use]
    pub fn new(store: SharedGraphStore, audit: Arc<AuditLogger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            audit,
            clock,
        }
    }

    /// The uid of the caller's `User` node, created on first touch.
    pub async fn ensure_user_node(&self, user_id: &str) -> Result<String> {
        let namespace = Namespace::user(user_id)?;
        if let Some(node) = self
            .store
            .find_node(&namespace, user_id, Some(NodeType::User))
            .await?
        {
            return Ok(node.uid);
        }
        let node = Node::new(NodeType::User, user_id, self.clock.now()).with_namespace(namespace);
        self.store.create_node(&node).await
    }

    /// Create a group; the caller becomes its first admin and member.
    pub async fn create_group(
        &self,
        user: &UserContext,
        name: &str,
    ) -> Result<(String, Namespace)> {
        let now = self.clock.now();
        let namespace = Namespace::group(&Uuid::new_v4().simple().to_string())?;
        let group = Node::new(NodeType::Group, name, now).with_namespace(namespace.clone());
        let group_uid = self.store.create_node(&group).await?;

        let user_uid = self.ensure_user_node(&user.user_id).await?;
        self.store
            .create_edges(&[
                Edge::new(&group_uid, &user_uid, EdgeType::GroupHasAdmin).with_created_at(now),
                Edge::new(&group_uid, &user_uid, EdgeType::GroupHasMember).with_created_at(now),
            ])
            .await?;

        self.audit
            .log(
                AuditEvent::allow("WORKSPACE", user.user_id.clone(), "CREATE_GROUP", now)
                    .with_namespace(namespace.as_str().to_string())
                    .with_resource("node", group_uid.clone()),
            )
            .await;
        Ok((group_uid, namespace))
    }

    /// Whether the user holds a `group_has_admin` edge on the group.
    pub async fn is_group_admin(&self, user: &UserContext, group_uid: &str) -> Result<bool> {
        self.has_edge_to_user(group_uid, EdgeType::GroupHasAdmin, &user.user_id)
            .await
    }

    /// Whether the user is a member (admins are members by construction).
    pub async fn is_group_member(&self, user: &UserContext, group_uid: &str) -> Result<bool> {
        Ok(self
            .has_edge_to_user(group_uid, EdgeType::GroupHasMember, &user.user_id)
            .await?
            || self
                .has_edge_to_user(group_uid, EdgeType::GroupHasAdmin, &user.user_id)
                .await?)
    }

    async fn has_edge_to_user(
        &self,
        group_uid: &str,
        edge_type: EdgeType,
        user_id: &str,
    ) -> Result<bool> {
        let namespace = Namespace::user(user_id)?;
        let Some(user_node) = self
            .store
            .find_node(&namespace, user_id, Some(NodeType::User))
            .await?
        else {
            return Ok(false);
        };
        let edges = self.store.edges_from(group_uid, edge_type).await?;
        Ok(edges.iter().any(|e| e.to == user_node.uid))
    }

    async fn require_admin(
        &self,
        user: &UserContext,
        group_uid: &str,
        action: &str,
    ) -> Result<()> {
        if self.is_group_admin(user, group_uid).await? {
            return Ok(());
        }
        let reason = "not a group admin";
        self.audit
            .log(
                AuditEvent::deny("WORKSPACE", user.user_id.clone(), action, reason, self.clock.now())
                    .with_resource("node", group_uid.to_string()),
            )
            .await;
        Err(Error::deny(reason))
    }

    async fn group_node(&self, group_uid: &str) -> Result<Node> {
        let node = self
            .store
            .get_node(group_uid)
            .await?
            .ok_or_else(|| Error::not_found(format!("group {group_uid}")))?;
        if node.primary_type() != NodeType::Group {
            return Err(Error::not_found(format!("group {group_uid}")));
        }
        Ok(node)
    }

    /// Attach a user as a member. Admin-only.
    pub async fn add_group_member(
        &self,
        admin: &UserContext,
        group_uid: &str,
        member_user_id: &str,
    ) -> Result<()> {
        let now = self.clock.now();
        self.group_node(group_uid).await?;
        self.require_admin(admin, group_uid, "ADD_MEMBER").await?;

        let member_uid = self.ensure_user_node(member_user_id).await?;
        self.store
            .create_edge(
                &Edge::new(group_uid, &member_uid, EdgeType::GroupHasMember).with_created_at(now),
            )
            .await?;

        self.audit
            .log(
                AuditEvent::allow("WORKSPACE", admin.user_id.clone(), "ADD_MEMBER", now)
                    .with_resource("node", group_uid.to_string())
                    .with_metadata("member", serde_json::json!(member_user_id)),
            )
            .await;
        Ok(())
    }

    /// All member and admin `User` nodes of a group. Members only.
    pub async fn get_workspace_members(
        &self,
        user: &UserContext,
        group_uid: &str,
    ) -> Result<Vec<Node>> {
        self.group_node(group_uid).await?;
        if !self.is_group_member(user, group_uid).await? {
            let reason = "not a group member";
            self.audit
                .log(
                    AuditEvent::deny(
                        "WORKSPACE",
                        user.user_id.clone(),
                        "LIST_MEMBERS",
                        reason,
                        self.clock.now(),
                    )
                    .with_resource("node", group_uid.to_string()),
                )
                .await;
            return Err(Error::deny(reason));
        }

        let mut uids: Vec<String> = Vec::new();
        for edge_type in [EdgeType::GroupHasMember, EdgeType::GroupHasAdmin] {
            for edge in self.store.edges_from(group_uid, edge_type).await? {
                if !uids.contains(&edge.to) {
                    uids.push(edge.to);
                }
            }
        }
        self.store.get_nodes_by_uids(&uids).await
    }

    /// Create a pending invitation for a user. Admin-only.
    pub async fn invite_to_workspace(
        &self,
        admin: &UserContext,
        group_uid: &str,
        invitee_user_id: &str,
    ) -> Result<String> {
        let now = self.clock.now();
        let group = self.group_node(group_uid).await?;
        self.require_admin(admin, group_uid, "INVITE").await?;

        let group_namespace = group
            .namespace
            .clone()
            .ok_or_else(|| Error::store("group node missing namespace"))?;
        let invitation = Node::new(
            NodeType::WorkspaceInvitation,
            Uuid::new_v4().to_string(),
            now,
        )
        .with_namespace(group_namespace)
        .with_attribute("workspace_id", group_uid)
        .with_attribute("invitee_user_id", invitee_user_id)
        .with_attribute("created_by", admin.user_id.clone())
        .with_tags(vec!["status:pending".to_string()]);
        let invitation_uid = self.store.create_node(&invitation).await?;

        self.audit
            .log(
                AuditEvent::allow("WORKSPACE", admin.user_id.clone(), "INVITE", now)
                    .with_resource("node", invitation_uid.clone())
                    .with_metadata("invitee", serde_json::json!(invitee_user_id)),
            )
            .await;
        Ok(invitation_uid)
    }

    /// Accept an invitation addressed to the caller; grants membership.
    pub async fn accept_invitation(
        &self,
        user: &UserContext,
        invitation_uid: &str,
    ) -> Result<()> {
        let now = self.clock.now();
        let invitation = self
            .store
            .get_node(invitation_uid)
            .await?
            .ok_or_else(|| Error::not_found(format!("invitation {invitation_uid}")))?;
        if invitation.primary_type() != NodeType::WorkspaceInvitation {
            return Err(Error::not_found(format!("invitation {invitation_uid}")));
        }

        let invitee = invitation
            .attributes
            .get("invitee_user_id")
            .map(String::as_str)
            .unwrap_or_default();
        if invitee != user.user_id {
            let reason = "invitation addressed to another user";
            self.audit
                .log(
                    AuditEvent::deny(
                        "WORKSPACE",
                        user.user_id.clone(),
                        "ACCEPT_INVITE",
                        reason,
                        now,
                    )
                    .with_resource("node", invitation_uid.to_string()),
                )
                .await;
            return Err(Error::deny(reason));
        }
        if invitation.tags.iter().any(|t| t == "status:accepted") {
            return Err(Error::validation("invitation already accepted"));
        }

        let group_uid = invitation
            .attributes
            .get("workspace_id")
            .cloned()
            .ok_or_else(|| Error::store("invitation missing workspace_id"))?;
        let member_uid = self.ensure_user_node(&user.user_id).await?;
        self.store
            .create_edge(
                &Edge::new(&group_uid, &member_uid, EdgeType::GroupHasMember).with_created_at(now),
            )
            .await?;
        self.store
            .enrich_node(invitation_uid, None, &["status:accepted".to_string()])
            .await?;

        self.audit
            .log(
                AuditEvent::allow("WORKSPACE", user.user_id.clone(), "ACCEPT_INVITE", now)
                    .with_resource("node", invitation_uid.to_string()),
            )
            .await;
        Ok(())
    }

    /// Mint an active share-link token for a group. Admin-only.
    pub async fn create_share_link(
        &self,
        admin: &UserContext,
        group_uid: &str,
    ) -> Result<String> {
        let now = self.clock.now();
        let group = self.group_node(group_uid).await?;
        self.require_admin(admin, group_uid, "CREATE_SHARE_LINK").await?;

        let group_namespace = group
            .namespace
            .clone()
            .ok_or_else(|| Error::store("group node missing namespace"))?;
        let token = Uuid::new_v4().simple().to_string();
        let link = Node::new(NodeType::ShareLink, token.clone(), now)
            .with_namespace(group_namespace)
            .with_attribute("workspace_id", group_uid)
            .with_attribute("created_by", admin.user_id.clone())
            .with_tags(vec!["active".to_string()]);
        self.store.create_node(&link).await?;

        self.audit
            .log(
                AuditEvent::allow("WORKSPACE", admin.user_id.clone(), "CREATE_SHARE_LINK", now)
                    .with_resource("node", group_uid.to_string()),
            )
            .await;
        Ok(token)
    }

    async fn find_share_link(&self, token: &str) -> Result<Node> {
        self.store
            .nodes_by_type(None, NodeType::ShareLink, 10_000)
            .await?
            .into_iter()
            .find(|n| n.name == token)
            .ok_or_else(|| Error::not_found("share link"))
    }

    /// Join a workspace through an active share link.
    pub async fn join_via_share_link(&self, user: &UserContext, token: &str) -> Result<String> {
        let now = self.clock.now();
        let link = self.find_share_link(token).await?;
        if link.tags.iter().any(|t| t == "revoked") {
            let reason = "share link revoked";
            self.audit
                .log(
                    AuditEvent::deny("WORKSPACE", user.user_id.clone(), "JOIN_LINK", reason, now)
                        .with_resource("node", link.uid.clone()),
                )
                .await;
            return Err(Error::deny(reason));
        }

        let group_uid = link
            .attributes
            .get("workspace_id")
            .cloned()
            .ok_or_else(|| Error::store("share link missing workspace_id"))?;
        let member_uid = self.ensure_user_node(&user.user_id).await?;
        self.store
            .create_edge(
                &Edge::new(&group_uid, &member_uid, EdgeType::GroupHasMember).with_created_at(now),
            )
            .await?;

        self.audit
            .log(
                AuditEvent::allow("WORKSPACE", user.user_id.clone(), "JOIN_LINK", now)
                    .with_resource("node", group_uid.clone()),
            )
            .await;
        Ok(group_uid)
    }

    /// Deactivate a share link. Admin-only.
    pub async fn revoke_share_link(&self, admin: &UserContext, token: &str) -> Result<()> {
        let now = self.clock.now();
        let link = self.find_share_link(token).await?;
        let group_uid = link
            .attributes
            .get("workspace_id")
            .cloned()
            .ok_or_else(|| Error::store("share link missing workspace_id"))?;
        self.require_admin(admin, &group_uid, "REVOKE_SHARE_LINK").await?;

        self.store
            .enrich_node(&link.uid, None, &["revoked".to_string()])
            .await?;
        self.audit
            .log(
                AuditEvent::allow("WORKSPACE", admin.user_id.clone(), "REVOKE_SHARE_LINK", now)
                    .with_resource("node", link.uid.clone()),
            )
            .await;
        Ok(())
    }
}
