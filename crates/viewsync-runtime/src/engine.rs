//! Engine facade: one handle bundling the render coordinator, lifecycle
//! manager, document assembler and scope stores, the way a route handler or
//! connection task sees them.

use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use viewsync_core::document::is_full_document;
use viewsync_core::{
    ClientRecord, Context, ContextId, DocumentAssembler, DocumentError, RenderKind, Scope,
    ScopeMembership, ScopeRegistry, ScopeStorage, ScopedStore, ShellSource, TemplateError,
    TemplateRenderer,
};

use crate::config::EngineConfig;
use crate::coordinator::RenderCoordinator;
use crate::error::EngineError;
use crate::lifecycle::LifecycleManager;
use crate::lock;

/// Cheap to clone; clones share all state.
#[derive(Debug, Clone)]
pub struct Engine {
    coordinator: RenderCoordinator,
    lifecycle: LifecycleManager,
    documents: Arc<Mutex<DocumentAssembler>>,
    /// File-backed shell, read once on the first load that needs it.
    shell: Arc<OnceCell<String>>,
    scopes: Arc<ScopeRegistry>,
    signals: Arc<ScopedStore<serde_json::Value>>,
    actions: Arc<ScopedStore<String>>,
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Self {
        let scopes = Arc::new(ScopeRegistry::new());
        let signals = Arc::new(ScopedStore::new());
        let actions = Arc::new(ScopedStore::new());
        let lifecycle = LifecycleManager::new(
            Arc::clone(&scopes) as Arc<dyn ScopeMembership>,
            Arc::clone(&signals) as Arc<dyn ScopeStorage>,
            Arc::clone(&actions) as Arc<dyn ScopeStorage>,
        )
        .with_cleanup_delay(config.cleanup_delay());

        let mut documents = DocumentAssembler::new(config.shell_source());
        for html in &config.head {
            documents.add_head(html.clone());
        }
        for html in &config.foot {
            documents.add_foot(html.clone());
        }

        Self {
            coordinator: RenderCoordinator::new(),
            lifecycle,
            documents: Arc::new(Mutex::new(documents)),
            shell: Arc::new(OnceCell::new()),
            scopes,
            signals,
            actions,
        }
    }

    pub fn coordinator(&self) -> &RenderCoordinator {
        &self.coordinator
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    pub fn signals(&self) -> &ScopedStore<serde_json::Value> {
        &self.signals
    }

    pub fn actions(&self) -> &ScopedStore<String> {
        &self.actions
    }

    pub fn add_head(&self, html: impl Into<String>) {
        lock(&self.documents).add_head(html);
    }

    pub fn add_foot(&self, html: impl Into<String>) {
        lock(&self.documents).add_foot(html);
    }

    /// First page load: register `context`, render `view` as an initial
    /// render, and wrap the result in the shell document.
    pub async fn first_load<F, Fut, E>(
        &self,
        context: Context,
        scope: &Scope,
        view: F,
    ) -> Result<String, EngineError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        self.lifecycle.register_context(context.clone());
        let content = self
            .coordinator
            .render_view(view, RenderKind::Initial, scope, &context)
            .await
            .map_err(EngineError::View)?;
        if is_full_document(&content) {
            return Ok(content);
        }
        let assembler = lock(&self.documents).clone();
        let shell = self.shell_text(assembler.shell()).await?;
        Ok(assembler.fill_shell(&shell, &content, &context, context.id()))
    }

    async fn shell_text(&self, source: &ShellSource) -> Result<String, DocumentError> {
        match source {
            ShellSource::Inline(shell) => Ok(shell.clone()),
            ShellSource::Path(path) => self
                .shell
                .get_or_try_init(|| async {
                    tokio::fs::read_to_string(path)
                        .await
                        .map_err(|source| DocumentError::ShellRead {
                            path: path.clone(),
                            source,
                        })
                })
                .await
                .cloned(),
        }
    }

    /// Incremental re-render for a registered Context.
    pub async fn update<F, Fut, E>(
        &self,
        context_id: &ContextId,
        scope: &Scope,
        view: F,
    ) -> Result<String, EngineError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let context = self
            .lifecycle
            .context(context_id)
            .ok_or_else(|| EngineError::UnknownContext(context_id.clone()))?;
        self.coordinator
            .render_view(view, RenderKind::Update, scope, &context)
            .await
            .map_err(EngineError::View)
    }

    /// [`Engine::update`] with a named template (or one of its blocks) as
    /// the view.
    pub async fn update_template<T: TemplateRenderer>(
        &self,
        context_id: &ContextId,
        scope: &Scope,
        templates: &T,
        template: &str,
        data: &Map<String, Value>,
        block: Option<&str>,
    ) -> Result<String, EngineError<TemplateError>> {
        self.update(context_id, scope, || async move {
            templates.render(template, data, block)
        })
        .await
    }

    /// A transport connection opened for `record.client_id`.
    pub fn connect(&self, record: ClientRecord) {
        self.reconnect(&record.client_id);
        self.lifecycle.register_client(record);
    }

    /// Cancel a pending cleanup so the Context keeps its state. Returns
    /// whether a cleanup was pending.
    pub fn reconnect(&self, context_id: &ContextId) -> bool {
        let cancelled = self.lifecycle.cancel_context_cleanup(context_id);
        if cancelled {
            tracing::debug!(context_id = %context_id, "reconnected within grace period");
        }
        cancelled
    }

    /// A transport connection closed. The client record goes now; the
    /// Context gets the configured grace period.
    pub fn disconnect(&self, context_id: &ContextId) {
        self.lifecycle.unregister_client(context_id);
        self.lifecycle.schedule_context_cleanup(context_id);
    }

    /// Write a scope-bound signal value and drop the scope's cached views.
    pub fn set_signal(&self, scope: &Scope, signal_id: &str, value: serde_json::Value) {
        self.signals.insert(scope, signal_id, value);
        if self.coordinator.invalidate(scope) {
            tracing::debug!(scope = %scope, signal_id, "signal write invalidated cached views");
        }
    }

    pub fn signal(&self, scope: &Scope, signal_id: &str) -> Option<serde_json::Value> {
        self.signals.get(scope, signal_id)
    }

    /// Register a named action handler under `scope`.
    pub fn register_action(&self, scope: &Scope, action: &str, handler: impl Into<String>) {
        self.actions.insert(scope, action, handler.into());
    }
}
