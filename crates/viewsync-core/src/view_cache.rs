//! View cache: rendered HTML keyed by (scope, render kind), plus the
//! in-flight render guard used for single-flight rendering.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::scope::{CacheKey, RenderKind, Scope};

/// Snapshot of cache occupancy for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub initial_entries: usize,
    pub update_entries: usize,
    pub scopes: Vec<Scope>,
    pub rendering: Vec<Scope>,
}

/// Mapping from (scope, render kind) to rendered HTML.
///
/// `Scope::Tab` never holds an entry: writes to it are dropped.
#[derive(Debug, Default)]
pub struct ViewCache {
    entries: HashMap<CacheKey, String>,
    rendering: HashSet<Scope>,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure lookup.
    pub fn get(&self, scope: &Scope, kind: RenderKind) -> Option<&str> {
        self.entries
            .get(&CacheKey::new(scope.clone(), kind))
            .map(String::as_str)
    }

    /// Store `html` for (scope, kind), replacing any previous entry.
    pub fn set(&mut self, scope: &Scope, html: impl Into<String>, kind: RenderKind) {
        if !scope.is_shareable() {
            tracing::debug!(scope = %scope, "view cache: ignoring write to private scope");
            return;
        }
        self.entries
            .insert(CacheKey::new(scope.clone(), kind), html.into());
    }

    /// Drop both the initial and update entries for `scope`.
    ///
    /// Returns `true` if anything was removed.
    pub fn invalidate(&mut self, scope: &Scope) -> bool {
        let initial = self
            .entries
            .remove(&CacheKey::new(scope.clone(), RenderKind::Initial))
            .is_some();
        let update = self
            .entries
            .remove(&CacheKey::new(scope.clone(), RenderKind::Update))
            .is_some();
        initial || update
    }

    /// Drop every entry. In-flight markers are left alone: the renders they
    /// describe are still running and will clear their own marker.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_rendering(&self, scope: &Scope) -> bool {
        self.rendering.contains(scope)
    }

    pub fn set_rendering(&mut self, scope: &Scope, rendering: bool) {
        if rendering {
            self.rendering.insert(scope.clone());
        } else {
            self.rendering.remove(scope);
        }
    }

    /// Distinct scopes that currently hold at least one entry, sorted.
    pub fn scopes(&self) -> Vec<Scope> {
        let scopes: BTreeSet<&Scope> = self.entries.keys().map(|k| &k.scope).collect();
        scopes.into_iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let update_entries = self
            .entries
            .keys()
            .filter(|k| k.kind.is_update())
            .count();
        let mut rendering: Vec<Scope> = self.rendering.iter().cloned().collect();
        rendering.sort();
        CacheStats {
            entries: self.entries.len(),
            initial_entries: self.entries.len() - update_entries,
            update_entries,
            scopes: self.scopes(),
            rendering,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> Scope {
        Scope::from("ROUTE:/home")
    }

    #[test]
    fn set_then_get_returns_html() {
        let mut cache = ViewCache::new();
        cache.set(&home(), "<div>1</div>", RenderKind::Update);
        assert_eq!(cache.get(&home(), RenderKind::Update), Some("<div>1</div>"));
        assert_eq!(cache.get(&home(), RenderKind::Initial), None);
    }

    #[test]
    fn set_overwrites_previous_entry() {
        let mut cache = ViewCache::new();
        cache.set(&home(), "<div>1</div>", RenderKind::Update);
        cache.set(&home(), "<div>2</div>", RenderKind::Update);
        assert_eq!(cache.get(&home(), RenderKind::Update), Some("<div>2</div>"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_removes_both_kinds() {
        let mut cache = ViewCache::new();
        cache.set(&home(), "<p>initial</p>", RenderKind::Initial);
        cache.set(&home(), "<p>update</p>", RenderKind::Update);
        cache.set(&Scope::Global, "<p>other</p>", RenderKind::Update);

        assert!(cache.invalidate(&home()));
        assert_eq!(cache.get(&home(), RenderKind::Initial), None);
        assert_eq!(cache.get(&home(), RenderKind::Update), None);
        assert_eq!(cache.get(&Scope::Global, RenderKind::Update), Some("<p>other</p>"));
    }

    #[test]
    fn invalidate_absent_scope_is_noop() {
        let mut cache = ViewCache::new();
        cache.set(&Scope::Global, "x", RenderKind::Update);
        assert!(!cache.invalidate(&home()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concrete_route_home_scenario() {
        let mut cache = ViewCache::new();
        cache.set(&home(), "<div>1</div>", RenderKind::Update);
        assert_eq!(cache.get(&home(), RenderKind::Update), Some("<div>1</div>"));
        cache.invalidate(&home());
        assert_eq!(cache.get(&home(), RenderKind::Update), None);
    }

    #[test]
    fn tab_scope_never_stored() {
        let mut cache = ViewCache::new();
        cache.set(&Scope::Tab, "<b>mine</b>", RenderKind::Update);
        cache.set(&Scope::Tab, "<b>mine</b>", RenderKind::Initial);
        assert!(cache.is_empty());
        assert_eq!(cache.get(&Scope::Tab, RenderKind::Update), None);
    }

    #[test]
    fn clear_drops_everything_but_rendering_marks() {
        let mut cache = ViewCache::new();
        cache.set(&home(), "a", RenderKind::Update);
        cache.set(&Scope::Global, "b", RenderKind::Initial);
        cache.set_rendering(&home(), true);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.is_rendering(&home()));
    }

    #[test]
    fn rendering_guard_toggles() {
        let mut cache = ViewCache::new();
        assert!(!cache.is_rendering(&home()));
        cache.set_rendering(&home(), true);
        assert!(cache.is_rendering(&home()));
        cache.set_rendering(&home(), false);
        assert!(!cache.is_rendering(&home()));
    }

    #[test]
    fn stats_reflect_key_set() {
        let mut cache = ViewCache::new();
        cache.set(&home(), "a", RenderKind::Update);
        cache.set(&home(), "b", RenderKind::Initial);
        cache.set(&Scope::Global, "c", RenderKind::Update);
        cache.set_rendering(&Scope::session("s1"), true);

        let stats = cache.stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.update_entries, 2);
        assert_eq!(stats.initial_entries, 1);
        assert_eq!(stats.scopes, vec![home(), Scope::Global]);
        assert_eq!(stats.rendering, vec![Scope::session("s1")]);
    }
}
