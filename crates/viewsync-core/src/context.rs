//! Context (one logical client session) and client connection records.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scope::Scope;

/// Separator between a signal's base name and its Context-disambiguating suffix.
pub const SIGNAL_SUFFIX_SEPARATOR: char = '#';

// ─── Identifiers ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ─── Signal Binding ──────────────────────────────────────────────────

/// A signal currently bound to a Context: its full id and current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalBinding {
    pub id: String,
    pub value: serde_json::Value,
}

impl SignalBinding {
    pub fn new(id: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }

    /// The id without its Context suffix (`count#ab12` -> `count`).
    pub fn base_name(&self) -> &str {
        self.id
            .split_once(SIGNAL_SUFFIX_SEPARATOR)
            .map_or(self.id.as_str(), |(base, _)| base)
    }
}

// ─── Context ─────────────────────────────────────────────────────────

type TeardownHook = Arc<dyn Fn(&Context) + Send + Sync>;

/// Server-side state of one logical client session.
#[derive(Clone)]
pub struct Context {
    id: ContextId,
    route: String,
    session_id: SessionId,
    /// Custom scope memberships. Route, session and global scopes are derived.
    custom_scopes: BTreeSet<Scope>,
    signals: BTreeMap<String, SignalBinding>,
    cache_updates: bool,
    teardown_hooks: Vec<TeardownHook>,
}

impl Context {
    pub fn new(id: impl Into<ContextId>, route: impl Into<String>, session_id: impl Into<SessionId>) -> Self {
        Self {
            id: id.into(),
            route: route.into(),
            session_id: session_id.into(),
            custom_scopes: BTreeSet::new(),
            signals: BTreeMap::new(),
            cache_updates: true,
            teardown_hooks: Vec::new(),
        }
    }

    /// Opt in or out of update-render caching.
    #[must_use]
    pub fn with_update_caching(mut self, enabled: bool) -> Self {
        self.cache_updates = enabled;
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.add_scope(scope);
        self
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn cache_updates(&self) -> bool {
        self.cache_updates
    }

    pub fn set_cache_updates(&mut self, enabled: bool) {
        self.cache_updates = enabled;
    }

    pub fn set_route(&mut self, route: impl Into<String>) {
        self.route = route.into();
    }

    pub fn route_scope(&self) -> Scope {
        Scope::route(self.route.clone())
    }

    pub fn session_scope(&self) -> Scope {
        Scope::session(self.session_id.as_str())
    }

    /// Scopes every Context belongs to by construction.
    pub fn default_scopes(&self) -> BTreeSet<Scope> {
        BTreeSet::from([Scope::Global, self.route_scope(), self.session_scope()])
    }

    /// Default scopes plus custom memberships.
    pub fn all_scopes(&self) -> BTreeSet<Scope> {
        let mut scopes = self.default_scopes();
        scopes.extend(self.custom_scopes.iter().cloned());
        scopes
    }

    /// Add a custom scope. `Tab` and derived scopes are not recorded.
    pub fn add_scope(&mut self, scope: Scope) -> bool {
        match scope {
            Scope::Custom(_) => self.custom_scopes.insert(scope),
            _ => false,
        }
    }

    pub fn remove_scope(&mut self, scope: &Scope) -> bool {
        self.custom_scopes.remove(scope)
    }

    pub fn bind_signal(&mut self, binding: SignalBinding) {
        self.signals.insert(binding.id.clone(), binding);
    }

    pub fn unbind_signal(&mut self, id: &str) -> Option<SignalBinding> {
        self.signals.remove(id)
    }

    pub fn signal(&self, id: &str) -> Option<&SignalBinding> {
        self.signals.get(id)
    }

    pub fn signals(&self) -> impl Iterator<Item = &SignalBinding> {
        self.signals.values()
    }

    /// Register a hook run when the Context is torn down after its grace period.
    pub fn on_teardown(&mut self, hook: impl Fn(&Context) + Send + Sync + 'static) {
        self.teardown_hooks.push(Arc::new(hook));
    }

    /// Run teardown hooks in registration order.
    pub fn run_teardown(&self) {
        for hook in &self.teardown_hooks {
            hook(self);
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("session_id", &self.session_id)
            .field("custom_scopes", &self.custom_scopes)
            .field("signals", &self.signals)
            .field("cache_updates", &self.cache_updates)
            .field("teardown_hooks", &self.teardown_hooks.len())
            .finish()
    }
}

/// Serializable view of a Context for inspection endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSummary {
    pub id: ContextId,
    pub route: String,
    pub session_id: SessionId,
    pub scopes: Vec<Scope>,
    pub signal_count: usize,
    pub cache_updates: bool,
}

impl From<&Context> for ContextSummary {
    fn from(ctx: &Context) -> Self {
        Self {
            id: ctx.id.clone(),
            route: ctx.route.clone(),
            session_id: ctx.session_id.clone(),
            scopes: ctx.all_scopes().into_iter().collect(),
            signal_count: ctx.signals.len(),
            cache_updates: ctx.cache_updates,
        }
    }
}

// ─── Client Record ───────────────────────────────────────────────────

/// Transport-level metadata for a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: ContextId,
    pub identicon: String,
    pub connected_at: DateTime<Utc>,
    pub remote_addr: Option<SocketAddr>,
}

impl ClientRecord {
    pub fn new(client_id: impl Into<ContextId>, identicon: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            identicon: identicon.into(),
            connected_at: Utc::now(),
            remote_addr: None,
        }
    }

    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}
