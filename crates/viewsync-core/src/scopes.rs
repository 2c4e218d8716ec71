//! Scope membership and scope-keyed storage.
//!
//! The lifecycle manager talks to these through [`ScopeMembership`] and
//! [`ScopeStorage`] so a host application can swap in its own signal and
//! action stores. The in-memory implementations here are what the runtime
//! wires up by default.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::context::ContextId;
use crate::scope::Scope;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Traits ──────────────────────────────────────────────────────────

/// Tracks which Contexts belong to which scopes.
pub trait ScopeMembership: Send + Sync {
    /// Add `context` to `scope`. Returns `true` if it was not already a member.
    fn join(&self, scope: &Scope, context: &ContextId) -> bool;

    /// Remove `context` from `scope`. Returns `true` if the scope is now empty
    /// as a result of this call.
    fn leave(&self, scope: &Scope, context: &ContextId) -> bool;

    fn members(&self, scope: &Scope) -> Vec<ContextId>;

    /// Remove `context` from every scope it belongs to and return the scopes
    /// left with no members.
    fn unregister_context_from_all_scopes(&self, context: &ContextId) -> BTreeSet<Scope>;
}

/// Scope-keyed storage that can be reclaimed when a scope empties.
pub trait ScopeStorage: Send + Sync {
    /// Drop everything stored under `scope`. Returns `true` iff anything was removed.
    fn clear_scope(&self, scope: &Scope) -> bool;
}

// ─── ScopeRegistry ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MembershipTables {
    members: HashMap<Scope, HashSet<ContextId>>,
    by_context: HashMap<ContextId, HashSet<Scope>>,
}

/// In-memory scope membership. `Scope::Tab` is never tracked: it belongs to
/// exactly one Context and has nothing to share or reclaim.
#[derive(Debug, Default)]
pub struct ScopeRegistry {
    tables: Mutex<MembershipTables>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scopes `context` currently belongs to, sorted.
    pub fn scopes_of(&self, context: &ContextId) -> Vec<Scope> {
        let tables = lock(&self.tables);
        let mut scopes: Vec<Scope> = tables
            .by_context
            .get(context)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        scopes.sort();
        scopes
    }

    pub fn member_count(&self, scope: &Scope) -> usize {
        lock(&self.tables).members.get(scope).map_or(0, HashSet::len)
    }

    /// All scopes with at least one member, sorted.
    pub fn active_scopes(&self) -> Vec<Scope> {
        let tables = lock(&self.tables);
        let mut scopes: Vec<Scope> = tables.members.keys().cloned().collect();
        scopes.sort();
        scopes
    }
}

impl ScopeMembership for ScopeRegistry {
    fn join(&self, scope: &Scope, context: &ContextId) -> bool {
        if !scope.is_shareable() {
            return false;
        }
        let mut tables = lock(&self.tables);
        tables
            .by_context
            .entry(context.clone())
            .or_default()
            .insert(scope.clone());
        tables
            .members
            .entry(scope.clone())
            .or_default()
            .insert(context.clone())
    }

    fn leave(&self, scope: &Scope, context: &ContextId) -> bool {
        let mut tables = lock(&self.tables);
        if let Some(scopes) = tables.by_context.get_mut(context) {
            scopes.remove(scope);
            if scopes.is_empty() {
                tables.by_context.remove(context);
            }
        }
        let Some(members) = tables.members.get_mut(scope) else {
            return false;
        };
        if !members.remove(context) {
            return false;
        }
        if members.is_empty() {
            tables.members.remove(scope);
            true
        } else {
            false
        }
    }

    fn members(&self, scope: &Scope) -> Vec<ContextId> {
        let tables = lock(&self.tables);
        let mut members: Vec<ContextId> = tables
            .members
            .get(scope)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    fn unregister_context_from_all_scopes(&self, context: &ContextId) -> BTreeSet<Scope> {
        let mut tables = lock(&self.tables);
        let Some(scopes) = tables.by_context.remove(context) else {
            return BTreeSet::new();
        };
        let mut emptied = BTreeSet::new();
        for scope in scopes {
            if let Some(members) = tables.members.get_mut(&scope) {
                members.remove(context);
                if members.is_empty() {
                    tables.members.remove(&scope);
                    emptied.insert(scope);
                }
            }
        }
        emptied
    }
}

// ─── ScopedStore ─────────────────────────────────────────────────────

/// In-memory key/value store partitioned by scope.
#[derive(Debug)]
pub struct ScopedStore<V> {
    entries: Mutex<HashMap<Scope, HashMap<String, V>>>,
}

impl<V> Default for ScopedStore<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> ScopedStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under (scope, key), returning the previous value.
    pub fn insert(&self, scope: &Scope, key: impl Into<String>, value: V) -> Option<V> {
        lock(&self.entries)
            .entry(scope.clone())
            .or_default()
            .insert(key.into(), value)
    }

    pub fn get(&self, scope: &Scope, key: &str) -> Option<V> {
        lock(&self.entries)
            .get(scope)
            .and_then(|m| m.get(key))
            .cloned()
    }

    pub fn remove(&self, scope: &Scope, key: &str) -> Option<V> {
        let mut entries = lock(&self.entries);
        let bucket = entries.get_mut(scope)?;
        let removed = bucket.remove(key);
        if bucket.is_empty() {
            entries.remove(scope);
        }
        removed
    }

    /// Entries stored under `scope`, sorted by key.
    pub fn entries(&self, scope: &Scope) -> Vec<(String, V)> {
        let entries = lock(&self.entries);
        let mut out: Vec<(String, V)> = entries
            .get(scope)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Number of entries across all scopes.
    pub fn len(&self) -> usize {
        lock(&self.entries).values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Send> ScopeStorage for ScopedStore<V> {
    fn clear_scope(&self, scope: &Scope) -> bool {
        lock(&self.entries)
            .remove(scope)
            .is_some_and(|bucket| !bucket.is_empty())
    }
}
