//! Scope key model: cache/ownership partitions and render kinds.
//!
//! A scope decides which Contexts may share rendered output and scope-bound
//! state. The string form (`TAB`, `ROUTE:/path`, `SESSION:id`, `GLOBAL`, or
//! any other custom name) is what shows up in logs and on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ─── Constants ───────────────────────────────────────────────────────

const TAB: &str = "TAB";
const GLOBAL: &str = "GLOBAL";
const ROUTE_PREFIX: &str = "ROUTE:";
const SESSION_PREFIX: &str = "SESSION:";

// ─── Scope ───────────────────────────────────────────────────────────

/// A sharing/caching partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// Exactly one Context. Never shared, never cached.
    Tab,
    /// Every Context currently on the given route.
    Route(String),
    /// Every Context under one session.
    Session(String),
    /// Every Context in the process.
    Global,
    /// Whichever Contexts register into the named scope.
    Custom(String),
}

impl Scope {
    pub fn route(path: impl Into<String>) -> Self {
        Self::Route(path.into())
    }

    pub fn session(id: impl Into<String>) -> Self {
        Self::Session(id.into())
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// Whether output rendered for this scope may be served to more than one
    /// Context. Only `Tab` is private.
    pub fn is_shareable(&self) -> bool {
        !matches!(self, Self::Tab)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tab => f.write_str(TAB),
            Self::Route(path) => write!(f, "{ROUTE_PREFIX}{path}"),
            Self::Session(id) => write!(f, "{SESSION_PREFIX}{id}"),
            Self::Global => f.write_str(GLOBAL),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

impl From<&str> for Scope {
    fn from(s: &str) -> Self {
        if s == TAB {
            Self::Tab
        } else if s == GLOBAL {
            Self::Global
        } else if let Some(path) = s.strip_prefix(ROUTE_PREFIX) {
            Self::Route(path.to_owned())
        } else if let Some(id) = s.strip_prefix(SESSION_PREFIX) {
            Self::Session(id.to_owned())
        } else {
            Self::Custom(s.to_owned())
        }
    }
}

impl FromStr for Scope {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

// ─── Render Kind ─────────────────────────────────────────────────────

/// Initial (first load, never cached) vs. update (incremental re-render).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderKind {
    Initial,
    Update,
}

impl RenderKind {
    pub fn from_update(is_update: bool) -> Self {
        if is_update { Self::Update } else { Self::Initial }
    }

    pub fn is_update(self) -> bool {
        matches!(self, Self::Update)
    }
}

// ─── Cache Key ───────────────────────────────────────────────────────

/// Key of a single view-cache entry.
///
/// Invalidation is addressed by [`Scope`] alone, so a key carrying a render
/// kind can never be mistaken for a bare scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub scope: Scope,
    pub kind: RenderKind,
}

impl CacheKey {
    pub fn new(scope: Scope, kind: RenderKind) -> Self {
        Self { scope, kind }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RenderKind::Initial => write!(f, "{}", self.scope),
            RenderKind::Update => write!(f, "{}:update", self.scope),
        }
    }
}
