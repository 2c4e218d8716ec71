//! View render coordinator: decides per render whether to serve cached
//! output, run the view function, and store the result.
//!
//! Policy, in order:
//!
//! 1. `Scope::Tab` renders are never cached.
//! 2. Initial renders are never cached (they embed a Context-unique id).
//! 3. Update renders for a Context that opted out of caching run the view
//!    and leave the cache alone.
//! 4. Otherwise: serve a hit, or run the view once per scope and share the
//!    result with concurrent arrivals (single flight), then store it.
//!
//! A failed view never reaches the cache; its error goes back to the caller
//! unchanged.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::watch;
use viewsync_core::{CacheStats, Context, RenderKind, RenderStats, RenderSummary, Scope, ViewCache};

use crate::lock;

// ─── Shared State ────────────────────────────────────────────────────

/// A render currently running for a scope.
#[derive(Debug)]
struct InFlight {
    /// Identifies the leader that owns this slot.
    flight: u64,
    /// Resolves to `Some(html)` when the leader succeeds; closes without a
    /// value if it fails or is dropped.
    result: watch::Receiver<Option<String>>,
    /// Set when the scope is invalidated mid-render. The leader's output is
    /// still returned to it and to earlier waiters, but not stored, and new
    /// arrivals start their own render instead of joining.
    stale: bool,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    cache: ViewCache,
    in_flight: HashMap<Scope, InFlight>,
    next_flight: u64,
}

enum Claim {
    Hit(String),
    Wait(watch::Receiver<Option<String>>),
    Lead(LeaderGuard),
}

/// Held by the render that owns a scope's in-flight slot. Dropping it without
/// calling [`LeaderGuard::complete`] releases the slot, which wakes waiters
/// with no value.
struct LeaderGuard {
    state: Arc<Mutex<CoordinatorState>>,
    scope: Scope,
    flight: u64,
    sender: Option<watch::Sender<Option<String>>>,
}

impl LeaderGuard {
    /// Give up the slot if this leader still owns it. Returns whether the
    /// render may be stored: owned and not invalidated since it started.
    fn release(&self, state: &mut CoordinatorState) -> bool {
        let owned = state
            .in_flight
            .get(&self.scope)
            .is_some_and(|f| f.flight == self.flight);
        if !owned {
            return false;
        }
        let stale = state
            .in_flight
            .remove(&self.scope)
            .is_some_and(|f| f.stale);
        state.cache.set_rendering(&self.scope, false);
        !stale
    }

    fn complete(mut self, html: &str) {
        {
            let mut state = lock(&self.state);
            if self.release(&mut state) {
                state.cache.set(&self.scope, html, RenderKind::Update);
            } else {
                tracing::debug!(scope = %self.scope, "render finished after invalidation, not caching");
            }
        }
        if let Some(sender) = self.sender.take() {
            // No receivers left is fine: nobody was waiting.
            let _ = sender.send(Some(html.to_owned()));
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if self.sender.is_none() {
            return;
        }
        let mut state = lock(&self.state);
        self.release(&mut state);
    }
}

// ─── RenderCoordinator ───────────────────────────────────────────────

/// Cheap to clone: clones share one cache and one stats accumulator.
#[derive(Debug, Clone, Default)]
pub struct RenderCoordinator {
    state: Arc<Mutex<CoordinatorState>>,
    stats: Arc<Mutex<RenderStats>>,
}

impl RenderCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render `view` for `scope` on behalf of `context`.
    pub async fn render_view<F, Fut, E>(
        &self,
        view: F,
        kind: RenderKind,
        scope: &Scope,
        context: &Context,
    ) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let started = Instant::now();

        if !scope.is_shareable() || !kind.is_update() || !context.cache_updates() {
            let result = view().await;
            self.track(started);
            return result;
        }

        // A waiter whose leader fails claims again, so at most one of them
        // re-renders and that render is itself tracked for invalidation.
        let guard = loop {
            match self.claim(scope) {
                Claim::Hit(html) => {
                    tracing::trace!(scope = %scope, context_id = %context.id(), "view cache hit");
                    self.track(started);
                    return Ok(html);
                }
                Claim::Wait(mut result) => {
                    tracing::debug!(scope = %scope, context_id = %context.id(), "awaiting in-flight render");
                    let shared = result
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|html| (*html).clone());
                    if let Some(html) = shared {
                        self.track(started);
                        return Ok(html);
                    }
                    tracing::debug!(scope = %scope, "in-flight render failed, claiming again");
                }
                Claim::Lead(guard) => break guard,
            }
        };

        let result = view().await;
        if let Ok(html) = &result {
            guard.complete(html);
        }
        self.track(started);
        result
    }

    /// Cache lookup and in-flight bookkeeping, done without suspending.
    fn claim(&self, scope: &Scope) -> Claim {
        let mut state = lock(&self.state);
        if let Some(html) = state.cache.get(scope, RenderKind::Update) {
            return Claim::Hit(html.to_owned());
        }
        if let Some(in_flight) = state.in_flight.get(scope).filter(|f| !f.stale) {
            return Claim::Wait(in_flight.result.clone());
        }
        state.next_flight += 1;
        let flight = state.next_flight;
        let (sender, receiver) = watch::channel(None);
        state.cache.set_rendering(scope, true);
        // Replaces a stale flight; its leader no longer owns the slot.
        state.in_flight.insert(
            scope.clone(),
            InFlight {
                flight,
                result: receiver,
                stale: false,
            },
        );
        Claim::Lead(LeaderGuard {
            state: Arc::clone(&self.state),
            scope: scope.clone(),
            flight,
            sender: Some(sender),
        })
    }

    fn track(&self, started: Instant) {
        lock(&self.stats).track_render(started.elapsed().as_secs_f64());
    }

    /// Drop cached output for `scope`. A render already running for it will
    /// not store its result.
    pub fn invalidate(&self, scope: &Scope) -> bool {
        let mut state = lock(&self.state);
        if let Some(in_flight) = state.in_flight.get_mut(scope) {
            in_flight.stale = true;
        }
        state.cache.invalidate(scope)
    }

    pub fn clear(&self) {
        let mut state = lock(&self.state);
        for in_flight in state.in_flight.values_mut() {
            in_flight.stale = true;
        }
        state.cache.clear();
    }

    /// Direct lookup, bypassing policy.
    pub fn cached(&self, scope: &Scope, kind: RenderKind) -> Option<String> {
        lock(&self.state).cache.get(scope, kind).map(str::to_owned)
    }

    pub fn cache_stats(&self) -> CacheStats {
        lock(&self.state).cache.stats()
    }

    pub fn render_summary(&self) -> RenderSummary {
        lock(&self.stats).summary()
    }

    pub fn reset_stats(&self) {
        lock(&self.stats).reset();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Boom;

    fn home() -> Scope {
        Scope::route("/home")
    }

    fn ctx() -> Context {
        Context::new("c1", "/home", "s1")
    }

    async fn ok(html: &str) -> Result<String, Boom> {
        Ok(html.to_owned())
    }

    #[tokio::test]
    async fn update_render_is_cached_and_reused() {
        let coord = RenderCoordinator::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let html = coord
                .render_view(
                    || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        ok("<div>1</div>")
                    },
                    RenderKind::Update,
                    &home(),
                    &ctx(),
                )
                .await
                .unwrap();
            assert_eq!(html, "<div>1</div>");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coord.cached(&home(), RenderKind::Update).as_deref(), Some("<div>1</div>"));
        assert_eq!(coord.render_summary().render_count, 3);
    }

    #[tokio::test]
    async fn tab_scope_never_cached() {
        let coord = RenderCoordinator::new();
        for kind in [RenderKind::Initial, RenderKind::Update] {
            coord
                .render_view(|| ok("<p>mine</p>"), kind, &Scope::Tab, &ctx())
                .await
                .unwrap();
        }
        assert_eq!(coord.cache_stats().entries, 0);
        assert_eq!(coord.render_summary().render_count, 2);
    }

    #[tokio::test]
    async fn initial_render_never_cached() {
        let coord = RenderCoordinator::new();
        for scope in [Scope::Global, home(), Scope::session("s1"), Scope::custom("room")] {
            coord
                .render_view(|| ok("<html>doc</html>"), RenderKind::Initial, &scope, &ctx())
                .await
                .unwrap();
        }
        assert_eq!(coord.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn opted_out_context_bypasses_cache() {
        let coord = RenderCoordinator::new();
        coord
            .render_view(|| ok("<p>shared</p>"), RenderKind::Update, &home(), &ctx())
            .await
            .unwrap();

        let private = ctx().with_update_caching(false);
        let html = coord
            .render_view(|| ok("<p>fresh</p>"), RenderKind::Update, &home(), &private)
            .await
            .unwrap();
        assert_eq!(html, "<p>fresh</p>");
        // The shared entry is untouched by the opted-out render.
        assert_eq!(coord.cached(&home(), RenderKind::Update).as_deref(), Some("<p>shared</p>"));

        let other = Scope::custom("other");
        coord
            .render_view(|| ok("<p>x</p>"), RenderKind::Update, &other, &private)
            .await
            .unwrap();
        assert_eq!(coord.cached(&other, RenderKind::Update), None);
    }

    #[tokio::test]
    async fn failed_render_is_propagated_and_not_cached() {
        let coord = RenderCoordinator::new();
        let err = coord
            .render_view(|| async { Err::<String, _>(Boom) }, RenderKind::Update, &home(), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err, Boom);
        assert_eq!(coord.cached(&home(), RenderKind::Update), None);
        assert!(coord.cache_stats().rendering.is_empty());
        assert_eq!(coord.render_summary().render_count, 1);
    }

    #[tokio::test]
    async fn invalidate_forces_rerender() {
        let coord = RenderCoordinator::new();
        coord
            .render_view(|| ok("<i>1</i>"), RenderKind::Update, &home(), &ctx())
            .await
            .unwrap();
        assert!(coord.invalidate(&home()));
        let html = coord
            .render_view(|| ok("<i>2</i>"), RenderKind::Update, &home(), &ctx())
            .await
            .unwrap();
        assert_eq!(html, "<i>2</i>");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_render() {
        let coord = RenderCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let render = |coord: RenderCoordinator, calls: Arc<AtomicUsize>| async move {
            coord
                .render_view(
                    || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, Boom>("<ul>shared</ul>".to_owned())
                    },
                    RenderKind::Update,
                    &Scope::Global,
                    &ctx(),
                )
                .await
        };

        let (a, b, c) = tokio::join!(
            render(coord.clone(), Arc::clone(&calls)),
            render(coord.clone(), Arc::clone(&calls)),
            render(coord.clone(), Arc::clone(&calls)),
        );
        assert_eq!(a.unwrap(), "<ul>shared</ul>");
        assert_eq!(b.unwrap(), "<ul>shared</ul>");
        assert_eq!(c.unwrap(), "<ul>shared</ul>");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coord.render_summary().render_count, 3);
        assert!(coord.cache_stats().rendering.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_falls_back_when_leader_fails() {
        let coord = RenderCoordinator::new();
        let scope = Scope::Global;
        let context = ctx();

        let leader = coord.render_view(
            || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<String, _>(Boom)
            },
            RenderKind::Update,
            &scope,
            &context,
        );
        let waiter = async {
            // Let the leader claim the scope first.
            tokio::task::yield_now().await;
            coord
                .render_view(|| ok("<p>fallback</p>"), RenderKind::Update, &scope, &context)
                .await
        };

        let (leader, waiter) = tokio::join!(leader, waiter);
        assert_eq!(leader.unwrap_err(), Boom);
        assert_eq!(waiter.unwrap(), "<p>fallback</p>");
        assert_eq!(
            coord.cached(&Scope::Global, RenderKind::Update).as_deref(),
            Some("<p>fallback</p>")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_during_render_skips_store() {
        let coord = RenderCoordinator::new();
        let scope = home();
        let context = ctx();
        let render = coord.render_view(
            || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, Boom>("<p>old</p>".to_owned())
            },
            RenderKind::Update,
            &scope,
            &context,
        );
        let invalidate = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            coord.invalidate(&scope);
        };

        let (html, ()) = tokio::join!(render, invalidate);
        assert_eq!(html.unwrap(), "<p>old</p>");
        assert_eq!(coord.cached(&home(), RenderKind::Update), None);
    }

    #[tokio::test(start_paused = true)]
    async fn arrival_after_invalidation_starts_fresh_render() {
        let coord = RenderCoordinator::new();
        let scope = home();
        let context = ctx();
        let old = coord.render_view(
            || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, Boom>("<p>old</p>".to_owned())
            },
            RenderKind::Update,
            &scope,
            &context,
        );
        let invalidate = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            coord.invalidate(&scope);
        };
        let fresh = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            coord
                .render_view(|| ok("<p>new</p>"), RenderKind::Update, &scope, &context)
                .await
        };

        let (old, (), fresh) = tokio::join!(old, invalidate, fresh);
        assert_eq!(old.unwrap(), "<p>old</p>");
        assert_eq!(fresh.unwrap(), "<p>new</p>");
        // The superseded leader finished last and must not overwrite.
        assert_eq!(coord.cached(&scope, RenderKind::Update).as_deref(), Some("<p>new</p>"));
        assert!(coord.cache_stats().rendering.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_render_invalidated_midway_is_not_cached() {
        let coord = RenderCoordinator::new();
        let scope = home();
        let context = ctx();
        let leader = coord.render_view(
            || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<String, _>(Boom)
            },
            RenderKind::Update,
            &scope,
            &context,
        );
        let waiter = async {
            tokio::task::yield_now().await;
            coord
                .render_view(
                    || async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, Boom>("<p>old</p>".to_owned())
                    },
                    RenderKind::Update,
                    &scope,
                    &context,
                )
                .await
        };
        let invalidate = async {
            tokio::time::sleep(Duration::from_millis(15)).await;
            coord.invalidate(&scope);
        };

        let (leader, waiter, ()) = tokio::join!(leader, waiter, invalidate);
        assert_eq!(leader.unwrap_err(), Boom);
        assert_eq!(waiter.unwrap(), "<p>old</p>");
        assert_eq!(coord.cached(&scope, RenderKind::Update), None);
        assert!(coord.cache_stats().rendering.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_leader_releases_scope() {
        let coord = RenderCoordinator::new();
        let scope = home();
        let context = ctx();
        let slow = coord.render_view(
            || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, Boom>("<p>never</p>".to_owned())
            },
            RenderKind::Update,
            &scope,
            &context,
        );
        let timed_out = tokio::time::timeout(Duration::from_millis(10), slow).await;
        assert!(timed_out.is_err());
        assert!(coord.cache_stats().rendering.is_empty());

        let html = coord
            .render_view(|| ok("<p>next</p>"), RenderKind::Update, &home(), &ctx())
            .await
            .unwrap();
        assert_eq!(html, "<p>next</p>");
    }

    #[tokio::test]
    async fn clear_drops_all_entries() {
        let coord = RenderCoordinator::new();
        coord
            .render_view(|| ok("a"), RenderKind::Update, &home(), &ctx())
            .await
            .unwrap();
        coord
            .render_view(|| ok("b"), RenderKind::Update, &Scope::Global, &ctx())
            .await
            .unwrap();
        assert_eq!(coord.cache_stats().entries, 2);
        coord.clear();
        assert_eq!(coord.cache_stats().entries, 0);
    }
}
