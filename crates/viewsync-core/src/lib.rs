//! viewsync-core: scope model, view cache, context data model and document
//! assembly for server-rendered reactive UIs.
//!
//! Pure library: no async, no IO beyond reading a shell template file.
//! The async render coordinator and the lifecycle manager live in
//! `viewsync-runtime`.

pub mod context;
pub mod document;
pub mod error;
pub mod render_stats;
pub mod scope;
pub mod scopes;
pub mod template;
pub mod view_cache;

pub use context::{ClientRecord, Context, ContextId, ContextSummary, SessionId, SignalBinding};
pub use document::{DocumentAssembler, ShellSource};
pub use error::{DocumentError, TemplateError};
pub use render_stats::{RenderStats, RenderSummary};
pub use scope::{CacheKey, RenderKind, Scope};
pub use scopes::{ScopeMembership, ScopeRegistry, ScopeStorage, ScopedStore};
pub use template::{StaticTemplates, TemplateRenderer, substitute_tokens};
pub use view_cache::{CacheStats, ViewCache};
