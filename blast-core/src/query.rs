//! Query extraction and template rendering
//!
//! The extractor turns an executable SQL file into an ordered list of
//! cleaned queries: the file is split on `;`, line comments (`--`) are
//! dropped, fragments are trimmed, and empty fragments are discarded.
//! Block comments (`/* ... */`) are deliberately left alone.
//!
//! When a renderer is attached, the canonical composition is
//! **render-then-split**: the whole file is rendered first so that
//! template-generated semicolons split correctly.

use crate::{Error, FileSystem, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// `{{ name }}` with optional whitespace around the identifier.
static SIMPLE_VARIABLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}").expect("invalid variable regex")
});

/// Renders template text against a variable context.
pub trait Renderer: Send + Sync {
    fn render(&self, text: &str) -> Result<String>;
}

/// Plain `{{ name }}` substitution. Unresolved variables are left intact.
pub struct SimpleRenderer {
    variables: BTreeMap<String, String>,
}

impl SimpleRenderer {
    pub fn new(variables: BTreeMap<String, String>) -> Self {
        Self { variables }
    }
}

impl Renderer for SimpleRenderer {
    fn render(&self, text: &str) -> Result<String> {
        let rendered = SIMPLE_VARIABLE_PATTERN.replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[1];
            match self.variables.get(name) {
                Some(value) => value.clone(),
                // Leave the occurrence as written.
                None => caps[0].to_string(),
            }
        });
        Ok(rendered.into_owned())
    }
}

/// Jinja-compatible renderer backed by minijinja.
///
/// Template compilation is not reentrant, so the environment sits behind a
/// mutex; rendering itself is independent per call. Unresolved variables
/// render as empty.
pub struct JinjaRenderer {
    env: Mutex<minijinja::Environment<'static>>,
    context: BTreeMap<String, String>,
}

impl JinjaRenderer {
    pub fn new(context: BTreeMap<String, String>) -> Self {
        Self {
            env: Mutex::new(minijinja::Environment::new()),
            context,
        }
    }
}

impl Renderer for JinjaRenderer {
    fn render(&self, text: &str) -> Result<String> {
        let env = self.env.lock().expect("template environment poisoned");
        env.render_str(text, &self.context)
            .map_err(|e| Error::Template(e.to_string()))
    }
}

/// A rendered query split into its variable-definition prefix and main body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainableQuery {
    /// Leading `set ...` statements, in order.
    pub variable_definitions: Vec<String>,

    /// The statements that follow the prefix.
    pub body: Vec<String>,
}

impl ExplainableQuery {
    /// Partition extracted queries: leading `set`-prefixed statements form
    /// the variable-definition prefix; everything after is the body.
    pub fn from_queries(queries: Vec<String>) -> Self {
        let split_at = queries
            .iter()
            .position(|q| !q.to_lowercase().starts_with("set "))
            .unwrap_or(queries.len());
        let body = queries[split_at..].to_vec();
        let variable_definitions = queries[..split_at].to_vec();
        Self {
            variable_definitions,
            body,
        }
    }

    /// The full statement sequence, prefix first, `;`-terminated.
    pub fn to_sql(&self) -> String {
        let mut parts = Vec::with_capacity(self.variable_definitions.len() + self.body.len());
        parts.extend(self.variable_definitions.iter().cloned());
        parts.extend(self.body.iter().cloned());
        let mut sql = parts.join(";\n");
        if !sql.is_empty() {
            sql.push(';');
        }
        sql
    }
}

/// Extracts cleaned queries from SQL text, optionally rendering first.
#[derive(Default)]
pub struct Extractor {
    renderer: Option<Box<dyn Renderer>>,
}

impl Extractor {
    pub fn new() -> Self {
        Self { renderer: None }
    }

    pub fn with_renderer(renderer: Box<dyn Renderer>) -> Self {
        Self {
            renderer: Some(renderer),
        }
    }

    /// Render (if a renderer is attached), then split and clean.
    pub fn extract(&self, content: &str) -> Result<Vec<String>> {
        let rendered = match &self.renderer {
            Some(renderer) => renderer.render(content)?,
            None => content.to_string(),
        };
        Ok(split_queries(&rendered))
    }

    /// Convenience wrapper reading the file through the filesystem capability.
    pub fn extract_from_file(&self, fs: &dyn FileSystem, path: &Path) -> Result<Vec<String>> {
        let content = fs.read_to_string(path)?;
        self.extract(&content)
    }

    /// Extract and partition into an [`ExplainableQuery`].
    pub fn extract_explainable(&self, content: &str) -> Result<ExplainableQuery> {
        Ok(ExplainableQuery::from_queries(self.extract(content)?))
    }
}

/// Split on `;`, drop `--` comment lines, trim, discard empties.
fn split_queries(content: &str) -> Vec<String> {
    content
        .split(';')
        .map(clean_fragment)
        .filter(|q| !q.is_empty())
        .collect()
}

fn clean_fragment(fragment: &str) -> String {
    fragment
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_split_discards_empty_fragments() {
        let extractor = Extractor::new();
        assert_eq!(extractor.extract("x;;y;").unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn test_split_drops_line_comments() {
        let extractor = Extractor::new();
        let queries = extractor
            .extract("-- header\nSELECT 1;\n-- trailing\nSELECT 2;")
            .unwrap();
        assert_eq!(queries, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_block_comments_are_not_stripped() {
        let extractor = Extractor::new();
        let queries = extractor.extract("SELECT /* keep me */ 1;").unwrap();
        assert_eq!(queries, vec!["SELECT /* keep me */ 1"]);
    }

    #[test]
    fn test_simple_renderer_substitutes_known_variables() {
        let renderer = SimpleRenderer::new(vars(&[("ds", "2022-01-01")]));
        assert_eq!(
            renderer.render("SELECT '{{ ds }}'::date").unwrap(),
            "SELECT '2022-01-01'::date"
        );
        // Optional whitespace forms.
        assert_eq!(renderer.render("{{ds}} {{  ds  }}").unwrap(), "2022-01-01 2022-01-01");
    }

    #[test]
    fn test_simple_renderer_leaves_unknown_variables_intact() {
        let renderer = SimpleRenderer::new(vars(&[]));
        assert_eq!(renderer.render("SELECT {{ mystery }}").unwrap(), "SELECT {{ mystery }}");
    }

    #[test]
    fn test_render_with_empty_map_is_identity_without_templates() {
        let renderer = SimpleRenderer::new(vars(&[]));
        let query = "SELECT a, b FROM t WHERE x > 1";
        assert_eq!(renderer.render(query).unwrap(), query);
    }

    #[test]
    fn test_extractor_renders_then_splits() {
        let extractor = Extractor::with_renderer(Box::new(SimpleRenderer::new(vars(&[(
            "ds",
            "2022-01-01",
        )]))));
        let queries = extractor
            .extract("set x = '{{ ds }}'::date;\n-- comment\nSELECT $x;")
            .unwrap();
        assert_eq!(queries, vec!["set x = '2022-01-01'::date", "SELECT $x"]);
    }

    #[test]
    fn test_jinja_renderer_supports_expressions() {
        let renderer = JinjaRenderer::new(vars(&[("ds", "2022-01-01")]));
        assert_eq!(
            renderer.render("SELECT '{{ ds }}'").unwrap(),
            "SELECT '2022-01-01'"
        );
        // Set blocks and loops are available too.
        let rendered = renderer
            .render("{% set n = 2 %}SELECT {{ n }}{% for i in [1] %} -- {{ i }}{% endfor %}")
            .unwrap();
        assert!(rendered.contains("SELECT 2"));
    }

    #[test]
    fn test_jinja_renderer_renders_unknown_as_empty() {
        let renderer = JinjaRenderer::new(vars(&[]));
        assert_eq!(renderer.render("SELECT '{{ mystery }}'").unwrap(), "SELECT ''");
    }

    #[test]
    fn test_explainable_query_partitions_set_prefix() {
        let q = ExplainableQuery::from_queries(vec![
            "set x = 1".to_string(),
            "SET y = 2".to_string(),
            "SELECT $x + $y".to_string(),
        ]);
        assert_eq!(q.variable_definitions.len(), 2);
        assert_eq!(q.body, vec!["SELECT $x + $y"]);
        assert_eq!(q.to_sql(), "set x = 1;\nSET y = 2;\nSELECT $x + $y;");
    }

    #[test]
    fn test_explainable_query_without_prefix() {
        let q = ExplainableQuery::from_queries(vec!["SELECT 1".to_string()]);
        assert!(q.variable_definitions.is_empty());
        assert_eq!(q.to_sql(), "SELECT 1;");
    }
}
