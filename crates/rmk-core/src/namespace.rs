//! Tenant namespace value type.
//!
//! Every non-system node carries a namespace of the form `user_<id>` or
//! `group_<id>`. The namespace is the primary isolation axis: traversal,
//! ingestion, and policy evaluation are all scoped by it. Validation happens
//! once, at construction; downstream code never re-validates.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static NAMESPACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)] // pattern is a compile-time constant
    Regex::new(r"^(user|group)_[A-Za-z0-9_-]+$").expect("namespace regex")
});

/// Validated tenant boundary string (`user_<id>` or `group_<id>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Parse and validate a raw namespace string.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if NAMESPACE_RE.is_match(&raw) {
            Ok(Self(raw))
        } else {
            Err(Error::validation(format!(
                "invalid namespace {raw:?}: expected user_<id> or group_<id>"
            )))
        }
    }

    /// Namespace for a personal tenant.
    pub fn user(user_id: &str) -> Result<Self> {
        Self::parse(format!("user_{user_id}"))
    }

    /// Namespace for a shared workspace tenant.
    pub fn group(group_id: &str) -> Result<Self> {
        Self::parse(format!("group_{group_id}"))
    }

    /// The raw string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a `group_*` namespace.
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.0.starts_with("group_")
    }

    /// The `<id>` suffix after the `user_` / `group_` prefix.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        self.0
            .split_once('_')
            .map_or(self.0.as_str(), |(_, id)| id)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Namespace {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
