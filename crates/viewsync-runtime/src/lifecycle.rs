//! Context registry and lifecycle: registration, scope membership upkeep,
//! client records, global state, and the delayed cleanup that lets a
//! disconnected Context survive a brief reconnect.
//!
//! Cleanup timers are tokio tasks. Each schedule gets a fresh generation
//! number; a firing timer acts only if its generation is still the pending
//! one for that Context, so a replaced or cancelled timer is inert even if
//! it was already past its sleep when the abort landed. Each registration
//! also gets a generation, checked again after teardown hooks run, so a
//! Context re-registered while its old incarnation was being torn down
//! survives.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use viewsync_core::{
    ClientRecord, Context, ContextId, ContextSummary, Scope, ScopeMembership, ScopeStorage, SessionId,
};

use crate::lock;

// ─── Constants ───────────────────────────────────────────────────────

/// Grace period between disconnect and Context destruction.
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_millis(5_000);

// ─── Registry ────────────────────────────────────────────────────────

#[derive(Debug)]
struct PendingCleanup {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct Registry {
    contexts: HashMap<ContextId, Context>,
    clients: HashMap<ContextId, ClientRecord>,
    global_state: HashMap<String, serde_json::Value>,
    sessions: HashMap<ContextId, SessionId>,
    /// Generation of the current registration per Context.
    registrations: HashMap<ContextId, u64>,
    pending: HashMap<ContextId, PendingCleanup>,
    next_generation: u64,
}

impl Registry {
    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn cancel_pending(&mut self, id: &ContextId) -> bool {
        match self.pending.remove(id) {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }
}

// ─── LifecycleManager ────────────────────────────────────────────────

/// Owns every live Context. Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct LifecycleManager {
    registry: Arc<Mutex<Registry>>,
    scopes: Arc<dyn ScopeMembership>,
    signals: Arc<dyn ScopeStorage>,
    actions: Arc<dyn ScopeStorage>,
    cleanup_delay: Duration,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("registry", &self.registry)
            .field("cleanup_delay", &self.cleanup_delay)
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    pub fn new(
        scopes: Arc<dyn ScopeMembership>,
        signals: Arc<dyn ScopeStorage>,
        actions: Arc<dyn ScopeStorage>,
    ) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            scopes,
            signals,
            actions,
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
        }
    }

    #[must_use]
    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    pub fn cleanup_delay(&self) -> Duration {
        self.cleanup_delay
    }

    // ── Registration ────────────────────────────────────────────────

    /// Insert `context`, replacing any Context with the same id.
    ///
    /// Joins the Context's scopes, records its session, and cancels a pending
    /// cleanup for the id. Scopes held only by a replaced Context are left,
    /// and any that empty are reclaimed.
    pub fn register_context(&self, context: Context) {
        let id = context.id().clone();
        let mut registry = lock(&self.registry);
        if registry.cancel_pending(&id) {
            tracing::debug!(context_id = %id, "re-registration cancelled pending cleanup");
        }
        let before = registry
            .contexts
            .get(&id)
            .map(Context::all_scopes)
            .unwrap_or_default();
        let after = context.all_scopes();
        registry
            .sessions
            .insert(id.clone(), context.session_id().clone());
        let generation = registry.bump_generation();
        registry.registrations.insert(id.clone(), generation);
        registry.contexts.insert(id.clone(), context);
        self.sync_membership(&id, &before, &after);
        tracing::debug!(context_id = %id, scopes = after.len(), "context registered");
    }

    /// Remove a Context and everything bound to it. Unknown ids are a no-op.
    ///
    /// Scopes the Context leaves empty have their signals and actions
    /// cleared. Cached views for those scopes are left in place.
    pub fn unregister_context(&self, id: &ContextId) -> bool {
        let mut registry = lock(&self.registry);
        self.remove_context(&mut registry, id)
    }

    fn remove_context(&self, registry: &mut Registry, id: &ContextId) -> bool {
        if !registry.contexts.contains_key(id) {
            return false;
        }
        let emptied = self.scopes.unregister_context_from_all_scopes(id);
        for scope in &emptied {
            self.release_scope(scope);
        }
        registry.contexts.remove(id);
        registry.clients.remove(id);
        registry.sessions.remove(id);
        registry.registrations.remove(id);
        registry.cancel_pending(id);
        tracing::info!(context_id = %id, emptied_scopes = emptied.len(), "context unregistered");
        true
    }

    /// Apply `f` to a registered Context and bring scope membership in line
    /// with any route or custom-scope change it made.
    pub fn update_context<R>(&self, id: &ContextId, f: impl FnOnce(&mut Context) -> R) -> Option<R> {
        let mut registry = lock(&self.registry);
        let context = registry.contexts.get_mut(id)?;
        let before = context.all_scopes();
        let out = f(context);
        let after = context.all_scopes();
        self.sync_membership(id, &before, &after);
        Some(out)
    }

    /// Move a Context to `route`. Returns `false` for unknown ids.
    pub fn navigate(&self, id: &ContextId, route: &str) -> bool {
        self.update_context(id, |ctx| ctx.set_route(route)).is_some()
    }

    /// Add a Context to a custom scope.
    pub fn join_scope(&self, id: &ContextId, scope: Scope) -> bool {
        self.update_context(id, |ctx| ctx.add_scope(scope))
            .unwrap_or(false)
    }

    /// Remove a Context from a custom scope.
    pub fn leave_scope(&self, id: &ContextId, scope: &Scope) -> bool {
        self.update_context(id, |ctx| ctx.remove_scope(scope))
            .unwrap_or(false)
    }

    fn sync_membership(&self, id: &ContextId, before: &BTreeSet<Scope>, after: &BTreeSet<Scope>) {
        for scope in after.difference(before) {
            self.scopes.join(scope, id);
        }
        for scope in before.difference(after) {
            if self.scopes.leave(scope, id) {
                self.release_scope(scope);
            }
        }
    }

    /// Reclaim signal and action storage of a scope that has no members left.
    fn release_scope(&self, scope: &Scope) {
        let signals = self.signals.clear_scope(scope);
        let actions = self.actions.clear_scope(scope);
        if signals || actions {
            tracing::debug!(scope = %scope, signals, actions, "released empty scope");
        } else {
            tracing::trace!(scope = %scope, "empty scope had nothing stored");
        }
    }

    // ── Delayed cleanup ─────────────────────────────────────────────

    /// Schedule cleanup after the configured grace period.
    pub fn schedule_context_cleanup(&self, id: &ContextId) {
        self.schedule_context_cleanup_after(id, self.cleanup_delay);
    }

    /// Schedule cleanup of `id` after `delay`, replacing any pending timer.
    ///
    /// When the timer fires and the Context is still registered, its teardown
    /// hooks run and it is unregistered. Must be called inside a tokio runtime.
    pub fn schedule_context_cleanup_after(&self, id: &ContextId, delay: Duration) {
        let mut registry = lock(&self.registry);
        registry.cancel_pending(id);
        let generation = registry.bump_generation();

        let manager = self.clone();
        let target = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.fire_cleanup(&target, generation);
        });
        registry
            .pending
            .insert(id.clone(), PendingCleanup { generation, handle });
        tracing::debug!(context_id = %id, delay_ms = delay.as_millis() as u64, "context cleanup scheduled");
    }

    /// Cancel a pending cleanup, e.g. on reconnect. Returns `true` if one was pending.
    pub fn cancel_context_cleanup(&self, id: &ContextId) -> bool {
        let cancelled = lock(&self.registry).cancel_pending(id);
        if cancelled {
            tracing::debug!(context_id = %id, "context cleanup cancelled");
        }
        cancelled
    }

    fn fire_cleanup(&self, id: &ContextId, generation: u64) {
        let (context, registration) = {
            let mut registry = lock(&self.registry);
            match registry.pending.get(id) {
                Some(pending) if pending.generation == generation => {
                    registry.pending.remove(id);
                }
                _ => return,
            }
            let context = registry.contexts.get(id).cloned();
            (context, registry.registrations.get(id).copied())
        };
        let Some(context) = context else {
            tracing::debug!(context_id = %id, "cleanup fired for context already gone");
            return;
        };
        // Hooks run unlocked; they may call back into the manager.
        context.run_teardown();

        let mut registry = lock(&self.registry);
        if registry.registrations.get(id).copied() != registration || registry.pending.contains_key(id) {
            tracing::debug!(context_id = %id, "context re-registered during teardown, keeping it");
            return;
        }
        self.remove_context(&mut registry, id);
        tracing::info!(context_id = %id, "context cleaned up after grace period");
    }

    /// Context ids with a cleanup timer pending, sorted.
    pub fn pending_cleanups(&self) -> Vec<ContextId> {
        let registry = lock(&self.registry);
        let mut ids: Vec<ContextId> = registry.pending.keys().cloned().collect();
        ids.sort();
        ids
    }

    // ── Clients ─────────────────────────────────────────────────────

    pub fn register_client(&self, record: ClientRecord) {
        tracing::debug!(client_id = %record.client_id, "client registered");
        lock(&self.registry)
            .clients
            .insert(record.client_id.clone(), record);
    }

    /// Drop a client record immediately. Not subject to the grace period.
    pub fn unregister_client(&self, id: &ContextId) -> Option<ClientRecord> {
        let removed = lock(&self.registry).clients.remove(id);
        if removed.is_some() {
            tracing::debug!(client_id = %id, "client unregistered");
        }
        removed
    }

    pub fn client(&self, id: &ContextId) -> Option<ClientRecord> {
        lock(&self.registry).clients.get(id).cloned()
    }

    /// All client records, sorted by id.
    pub fn clients(&self) -> Vec<ClientRecord> {
        let registry = lock(&self.registry);
        let mut clients: Vec<ClientRecord> = registry.clients.values().cloned().collect();
        clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        clients
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Snapshot of a registered Context.
    pub fn context(&self, id: &ContextId) -> Option<Context> {
        lock(&self.registry).contexts.get(id).cloned()
    }

    pub fn contains(&self, id: &ContextId) -> bool {
        lock(&self.registry).contexts.contains_key(id)
    }

    pub fn context_ids(&self) -> Vec<ContextId> {
        let registry = lock(&self.registry);
        let mut ids: Vec<ContextId> = registry.contexts.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn context_count(&self) -> usize {
        lock(&self.registry).contexts.len()
    }

    pub fn session_of(&self, id: &ContextId) -> Option<SessionId> {
        lock(&self.registry).sessions.get(id).cloned()
    }

    pub fn contexts_in_session(&self, session: &SessionId) -> Vec<ContextId> {
        let registry = lock(&self.registry);
        let mut ids: Vec<ContextId> = registry
            .sessions
            .iter()
            .filter(|(_, s)| *s == session)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn summaries(&self) -> Vec<ContextSummary> {
        let registry = lock(&self.registry);
        let mut out: Vec<ContextSummary> = registry.contexts.values().map(ContextSummary::from).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    // ── Global state ────────────────────────────────────────────────

    pub fn get_global_state(&self, key: &str) -> Option<serde_json::Value> {
        lock(&self.registry).global_state.get(key).cloned()
    }

    /// Last write wins. Returns the previous value.
    pub fn set_global_state(&self, key: impl Into<String>, value: serde_json::Value) -> Option<serde_json::Value> {
        lock(&self.registry).global_state.insert(key.into(), value)
    }
}
