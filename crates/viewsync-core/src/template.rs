//! Template rendering collaborator and straight token substitution.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::TemplateError;

/// Renders a named template (optionally a named sub-block of it) with data.
///
/// Treated as total and synchronous by the render path: any async work
/// belongs in the view function that calls it.
pub trait TemplateRenderer: Send + Sync {
    fn render(
        &self,
        template: &str,
        data: &Map<String, Value>,
        block: Option<&str>,
    ) -> Result<String, TemplateError>;
}

impl<T: TemplateRenderer + ?Sized> TemplateRenderer for &T {
    fn render(
        &self,
        template: &str,
        data: &Map<String, Value>,
        block: Option<&str>,
    ) -> Result<String, TemplateError> {
        (**self).render(template, data, block)
    }
}

/// Replace every `{{ key }}` token whose trimmed key is in `table`.
///
/// Single pass: substituted text is never rescanned, and tokens with no
/// entry in `table` are left as written.
pub fn substitute_tokens(source: &str, table: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after_open[..end].trim();
        match table.get(key) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Strings are inserted raw; everything else as compact JSON.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─── StaticTemplates ─────────────────────────────────────────────────

/// In-memory templates rendered by straight token substitution.
#[derive(Debug, Default, Clone)]
pub struct StaticTemplates {
    sources: HashMap<String, String>,
    blocks: HashMap<(String, String), String>,
}

impl StaticTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_template(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(name.into(), source.into());
        self
    }

    #[must_use]
    pub fn with_block(
        mut self,
        name: impl Into<String>,
        block: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        self.blocks.insert((name.into(), block.into()), source.into());
        self
    }
}

impl TemplateRenderer for StaticTemplates {
    fn render(
        &self,
        template: &str,
        data: &Map<String, Value>,
        block: Option<&str>,
    ) -> Result<String, TemplateError> {
        let source = match block {
            None => self
                .sources
                .get(template)
                .ok_or_else(|| TemplateError::NotFound(template.to_owned()))?,
            Some(block) => self
                .blocks
                .get(&(template.to_owned(), block.to_owned()))
                .ok_or_else(|| {
                    if self.sources.contains_key(template) {
                        TemplateError::BlockNotFound {
                            template: template.to_owned(),
                            block: block.to_owned(),
                        }
                    } else {
                        TemplateError::NotFound(template.to_owned())
                    }
                })?,
        };
        let table: HashMap<String, String> = data
            .iter()
            .map(|(k, v)| (k.clone(), value_to_text(v)))
            .collect();
        Ok(substitute_tokens(source, &table))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn table(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn substitutes_with_and_without_spaces() {
        let out = substitute_tokens("<p>{{name}} / {{ name }}</p>", &table(&[("name", "x")]));
        assert_eq!(out, "<p>x / x</p>");
    }

    #[test]
    fn unknown_tokens_are_kept() {
        let out = substitute_tokens("a {{ missing }} b", &table(&[]));
        assert_eq!(out, "a {{ missing }} b");
    }

    #[test]
    fn substituted_text_is_not_rescanned() {
        let out = substitute_tokens(
            "{{ content }}",
            &table(&[("content", "{{ secret }}"), ("secret", "leak")]),
        );
        assert_eq!(out, "{{ secret }}");
    }

    #[test]
    fn unterminated_token_is_left_alone() {
        let out = substitute_tokens("x {{ open", &table(&[("open", "y")]));
        assert_eq!(out, "x {{ open");
    }

    #[test]
    fn static_templates_render_data() {
        let templates = StaticTemplates::new().with_template("counter", "<b>{{ count }}</b> {{ label }}");
        let data = json!({"count": 3, "label": "clicks"});
        let html = templates
            .render("counter", data.as_object().unwrap(), None)
            .unwrap();
        assert_eq!(html, "<b>3</b> clicks");
    }

    #[test]
    fn static_templates_render_block() {
        let templates = StaticTemplates::new()
            .with_template("page", "<main>{{ body }}</main>")
            .with_block("page", "row", "<li>{{ item }}</li>");
        let data = json!({"item": "one"});
        let html = templates
            .render("page", data.as_object().unwrap(), Some("row"))
            .unwrap();
        assert_eq!(html, "<li>one</li>");
    }

    #[test]
    fn missing_template_and_block_errors() {
        let templates = StaticTemplates::new().with_template("page", "");
        let empty = Map::new();
        assert_eq!(
            templates.render("nope", &empty, None),
            Err(TemplateError::NotFound("nope".to_owned()))
        );
        assert_eq!(
            templates.render("page", &empty, Some("row")),
            Err(TemplateError::BlockNotFound {
                template: "page".to_owned(),
                block: "row".to_owned(),
            })
        );
        assert_eq!(
            templates.render("nope", &empty, Some("row")),
            Err(TemplateError::NotFound("nope".to_owned()))
        );
    }
}
