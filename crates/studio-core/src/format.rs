//! Reformatting capabilities per editor kind.
//!
//! ## Learning: Lookup Tables over String Dispatch
//!
//! Editors are identified by a typed [`EditorKind`] and their reformat
//! behavior lives in a [`FormatterRegistry`] built once at startup. A
//! missing entry is an ordinary `None`, not a runtime type error.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::config::StudioConfig;
use crate::entity::{Entity, FOLDERS, TEMPLATES};
use crate::tabs::Tab;

/// Editor kinds the studio knows about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EditorKind {
    Templates,
    Folders,
    Startup,
    /// Editors contributed by configuration
    Other(String),
}

impl EditorKind {
    /// Maps an editor component key (or entity set name) to a kind.
    pub fn from_key(key: &str) -> Self {
        match key {
            TEMPLATES => EditorKind::Templates,
            FOLDERS => EditorKind::Folders,
            "startup" => EditorKind::Startup,
            other => EditorKind::Other(other.to_string()),
        }
    }
}

/// Errors raised while reformatting.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("No formatter registered for {0:?}")]
    NoFormatter(EditorKind),

    #[error("Formatter failed: {0}")]
    Failed(String),
}

/// Reformat behavior of one editor kind.
pub trait Formatter: Send + Sync {
    /// Returns the fields to write back into the entity.
    fn reformat(&self, entity: &Entity, tab: &Tab) -> Result<Map<String, Value>, FormatError>;
}

/// Capability table of formatters.
pub struct FormatterRegistry {
    formatters: HashMap<EditorKind, Box<dyn Formatter>>,
}

impl FormatterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            formatters: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in formatters.
    pub fn from_config(config: &StudioConfig) -> Self {
        let mut registry = Self::new();
        registry.register(
            EditorKind::Templates,
            Box::new(TemplateFormatter::new(config.editor.indent_size)),
        );
        registry
    }

    /// Registers (or replaces) a formatter.
    pub fn register(&mut self, kind: EditorKind, formatter: Box<dyn Formatter>) {
        self.formatters.insert(kind, formatter);
    }

    /// Returns the formatter for an editor kind.
    pub fn get(&self, kind: &EditorKind) -> Option<&dyn Formatter> {
        self.formatters.get(kind).map(|f| f.as_ref())
    }
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Source languages the reindenter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeMode {
    Html,
    Js,
}

/// Reformats template `content` as HTML and `helpers` as JavaScript.
pub struct TemplateFormatter {
    indent: usize,
}

impl TemplateFormatter {
    pub fn new(indent: usize) -> Self {
        Self { indent }
    }
}

impl Formatter for TemplateFormatter {
    fn reformat(&self, entity: &Entity, _tab: &Tab) -> Result<Map<String, Value>, FormatError> {
        let mut fields = Map::new();
        let content = entity.str_field("content").unwrap_or_default();
        let helpers = entity.str_field("helpers").unwrap_or_default();

        fields.insert(
            "content".to_string(),
            Value::String(reindent(content, CodeMode::Html, self.indent)),
        );
        fields.insert(
            "helpers".to_string(),
            Value::String(reindent(helpers, CodeMode::Js, self.indent)),
        );
        Ok(fields)
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Re-indents code by nesting depth.
///
/// Lines are trimmed and indented by `indent` spaces per level. Blank lines
/// stay blank. `<script>` bodies in HTML are left untouched.
pub fn reindent(code: &str, mode: CodeMode, indent: usize) -> String {
    let mut out = Vec::new();
    let mut depth: usize = 0;
    let mut in_script = false;

    for raw in code.lines() {
        let line = raw.trim();

        if in_script {
            if line.starts_with("</script") {
                in_script = false;
                depth = depth.saturating_sub(1);
                out.push(indented(line, depth, indent));
            } else {
                out.push(raw.trim_end().to_string());
            }
            continue;
        }

        if line.is_empty() {
            out.push(String::new());
            continue;
        }

        let (leading_close, delta) = match mode {
            CodeMode::Js => js_depth(line),
            CodeMode::Html => html_depth(line),
        };

        let level = depth.saturating_sub(leading_close);
        out.push(indented(line, level, indent));
        depth = (depth as isize + delta).max(0) as usize;

        if mode == CodeMode::Html && opens_script(line) {
            in_script = true;
        }
    }

    let mut result = out.join("\n");
    if code.ends_with('\n') {
        result.push('\n');
    }
    result
}

fn indented(line: &str, level: usize, indent: usize) -> String {
    format!("{}{}", " ".repeat(level * indent), line)
}

/// Returns (closers at line start, net depth change) for a JS line.
fn js_depth(line: &str) -> (usize, isize) {
    let leading = line
        .chars()
        .take_while(|c| matches!(c, '}' | ']' | ')'))
        .count();

    let mut delta = 0isize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in line.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '{' | '[' | '(' => delta += 1,
            '}' | ']' | ')' => delta -= 1,
            _ => {}
        }
    }

    (leading, delta)
}

/// Returns (1 if the line starts with a closing tag, net depth change).
fn html_depth(line: &str) -> (usize, isize) {
    let leading = usize::from(line.starts_with("</"));
    let mut delta = 0isize;
    let mut rest = line;

    while let Some(start) = rest.find('<') {
        rest = &rest[start + 1..];
        let end = rest.find('>').unwrap_or(rest.len());
        let tag = &rest[..end];

        if let Some(name) = tag.strip_prefix('/') {
            if !is_void(name) {
                delta -= 1;
            }
        } else if !tag.starts_with('!') && !tag.starts_with('?') && !tag.ends_with('/') {
            let name = tag.split(|c: char| c.is_whitespace()).next().unwrap_or("");
            if !name.is_empty() && !is_void(name) && !name.starts_with('{') {
                delta += 1;
            }
        }

        rest = &rest[end..];
    }

    (leading, delta)
}

fn is_void(name: &str) -> bool {
    let name = name.trim().to_ascii_lowercase();
    VOID_ELEMENTS.contains(&name.as_str())
}

fn opens_script(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    match lower.rfind("<script") {
        Some(open) => !lower[open..].contains("</script"),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use proptest::prelude::*;

    #[test]
    fn test_reindent_js() {
        let code = "function a() {\nif (x) {\nreturn 1\n}\n}\n";
        assert_eq!(
            reindent(code, CodeMode::Js, 2),
            "function a() {\n  if (x) {\n    return 1\n  }\n}\n"
        );
    }

    #[test]
    fn test_reindent_js_ignores_braces_in_strings() {
        let code = "const s = '{'\nfoo()";
        assert_eq!(reindent(code, CodeMode::Js, 2), "const s = '{'\nfoo()");
    }

    #[test]
    fn test_reindent_html() {
        let code = "<div>\n<p>hi</p>\n<br>\n<img src=\"a\" />\n</div>";
        assert_eq!(
            reindent(code, CodeMode::Html, 2),
            "<div>\n  <p>hi</p>\n  <br>\n  <img src=\"a\" />\n</div>"
        );
    }

    #[test]
    fn test_reindent_html_leaves_script_alone() {
        let code = "<body>\n<script>\n   var a = {\n b: 1 }\n</script>\n</body>";
        assert_eq!(
            reindent(code, CodeMode::Html, 2),
            "<body>\n  <script>\n   var a = {\n b: 1 }\n  </script>\n</body>"
        );
    }

    #[test]
    fn test_template_formatter() {
        let entity = Entity::new(EntityId::from("1"), TEMPLATES)
            .with_field("content", "<ul>\n<li>a</li>\n</ul>")
            .with_field("helpers", "function f() {\nreturn 1\n}");
        let tab = Tab::entity(EntityId::from("1"), TEMPLATES);

        let fields = TemplateFormatter::new(4).reformat(&entity, &tab).unwrap();
        assert_eq!(fields["content"], "<ul>\n    <li>a</li>\n</ul>");
        assert_eq!(fields["helpers"], "function f() {\n    return 1\n}");
    }

    #[test]
    fn test_registry_lookup() {
        let registry = FormatterRegistry::from_config(&StudioConfig::default());
        assert!(registry.get(&EditorKind::from_key("templates")).is_some());
        assert!(registry.get(&EditorKind::from_key("folders")).is_none());
        assert_eq!(EditorKind::from_key("scripts"), EditorKind::Other("scripts".to_string()));
    }

    proptest! {
        #[test]
        fn reindent_js_is_idempotent(code in "[a-z{}();\n ]{0,64}") {
            let once = reindent(&code, CodeMode::Js, 2);
            prop_assert_eq!(reindent(&once, CodeMode::Js, 2), once);
        }
    }
}
