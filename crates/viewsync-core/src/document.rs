//! Document assembly for first loads: embeds a rendered fragment in a shell
//! template along with the Context id and the Context's signal values.
//!
//! Shell tokens:
//!
//! ```text
//! {{ context_id }}          per-Context identifier
//! {{ disconnected }}        always `false` on a fresh document
//! {{ head }} / {{ foot }}   accumulated injections, newline-joined
//! {{ content }}             the rendered fragment
//! {{ signal.<name> }}       JSON value of the signal with base name <name>
//! {{ signal_id.<name> }}    full id of that signal
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use crate::context::{Context, ContextId};
use crate::error::DocumentError;
use crate::template::substitute_tokens;

/// Shell used when no path or override is configured.
pub const DEFAULT_SHELL: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
{{ head }}
</head>
<body data-context-id="{{ context_id }}" data-disconnected="{{ disconnected }}">
{{ content }}
{{ foot }}
</body>
</html>
"#;

/// Where the shell template comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellSource {
    /// Read from disk by every [`DocumentAssembler::build_document`] call.
    Path(PathBuf),
    /// Injected override.
    Inline(String),
}

impl Default for ShellSource {
    fn default() -> Self {
        Self::Inline(DEFAULT_SHELL.to_owned())
    }
}

/// Whether `content` is already a complete document: it carries an `<html>`
/// root tag, not merely a `<html-…>` custom element or the bare text.
pub fn is_full_document(content: &str) -> bool {
    const OPEN: &str = "<html";
    let lower = content.to_ascii_lowercase();
    lower.match_indices(OPEN).any(|(at, _)| {
        lower[at + OPEN.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_whitespace() || c == '>' || c == '/')
    })
}

#[derive(Debug, Clone, Default)]
pub struct DocumentAssembler {
    shell: ShellSource,
    head: Vec<String>,
    foot: Vec<String>,
}

impl DocumentAssembler {
    pub fn new(shell: ShellSource) -> Self {
        Self {
            shell,
            head: Vec::new(),
            foot: Vec::new(),
        }
    }

    pub fn shell(&self) -> &ShellSource {
        &self.shell
    }

    /// Append markup injected into `{{ head }}`.
    pub fn add_head(&mut self, html: impl Into<String>) {
        self.head.push(html.into());
    }

    /// Append markup injected into `{{ foot }}`.
    pub fn add_foot(&mut self, html: impl Into<String>) {
        self.foot.push(html.into());
    }

    fn load_shell(&self) -> Result<String, DocumentError> {
        match &self.shell {
            ShellSource::Inline(source) => Ok(source.clone()),
            ShellSource::Path(path) => {
                std::fs::read_to_string(path).map_err(|source| DocumentError::ShellRead {
                    path: path.clone(),
                    source,
                })
            }
        }
    }

    /// Build the substitution table for one document.
    fn token_table(&self, content: &str, context: &Context, context_id: &ContextId) -> HashMap<String, String> {
        let mut table = HashMap::from([
            ("context_id".to_owned(), context_id.to_string()),
            ("disconnected".to_owned(), "false".to_owned()),
            ("head".to_owned(), self.head.join("\n")),
            ("foot".to_owned(), self.foot.join("\n")),
            ("content".to_owned(), content.to_owned()),
        ]);
        for signal in context.signals() {
            let base = signal.base_name();
            table.insert(format!("signal.{base}"), signal.value.to_string());
            table.insert(format!("signal_id.{base}"), signal.id.clone());
        }
        table
    }

    /// Wrap `content` in the shell, unless it is already a full document.
    pub fn build_document(
        &self,
        content: &str,
        context: &Context,
        context_id: &ContextId,
    ) -> Result<String, DocumentError> {
        if is_full_document(content) {
            return Ok(content.to_owned());
        }
        let shell = self.load_shell()?;
        Ok(self.fill_shell(&shell, content, context, context_id))
    }

    /// Substitute into an already loaded `shell`. Callers that read the shell
    /// themselves check [`is_full_document`] first.
    pub fn fill_shell(&self, shell: &str, content: &str, context: &Context, context_id: &ContextId) -> String {
        let table = self.token_table(content, context, context_id);
        substitute_tokens(shell, &table)
    }
}
