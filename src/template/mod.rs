//! Message template rendering.
//!
//! Templates use Go template syntax: `{{.name}}` fields, `{{.}}`, the
//! `if`/`else`/`with`/`range`/`end` actions, comments, `-` trim markers,
//! pipelines and the `and`/`or`/`not`/`eq`/`ne`/`lt`/`le`/`gt`/`ge`/`len`/
//! `index`/`print` builtins. Sources are translated to Handlebars and
//! rendered with it. Keys that are referenced but not supplied render as
//! empty text.

mod translate;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use handlebars::{
    Context, Handlebars, Helper, HelperDef, JsonValue, RenderContext, RenderError, ScopedJson,
};
use tracing::debug;

use crate::error::{Error, Result};

use translate::translate;

const TEMPLATE_NAME: &str = "message";

/// How substituted values are escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escaping {
    /// HTML-escape values, for messages sent as formatted text
    Html,
    /// Insert values verbatim
    None,
}

impl Escaping {
    pub fn for_html(html: bool) -> Self {
        if html {
            Escaping::Html
        } else {
            Escaping::None
        }
    }
}

/// Go's `print`: operands are concatenated, with a space between two
/// operands when neither is a string.
struct PrintHelper;

impl HelperDef for PrintHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> std::result::Result<ScopedJson<'rc>, RenderError> {
        let mut text = String::new();
        let mut previous_is_string = true;
        for (i, param) in h.params().iter().enumerate() {
            let value = param.value();
            if i > 0 && !value.is_string() && !previous_is_string {
                text.push(' ');
            }
            text.push_str(&go_format(value));
            previous_is_string = value.is_string();
        }
        Ok(ScopedJson::Derived(JsonValue::String(text)))
    }
}

/// Format a value the way Go's fmt prints it. Map keys are sorted.
fn go_format(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(items) => {
            let items: Vec<String> = items.iter().map(go_format).collect();
            format!("[{}]", items.join(" "))
        }
        JsonValue::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let entries: Vec<String> = entries
                .into_iter()
                .map(|(key, value)| format!("{}:{}", key, go_format(value)))
                .collect();
            format!("map[{}]", entries.join(" "))
        }
        other => other.to_string(),
    }
}

/// A compiled message template.
pub struct MessageTemplate {
    handlebars: Handlebars<'static>,
}

impl MessageTemplate {
    /// Compile Go template source.
    pub fn parse(source: &str, escaping: Escaping) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        if escaping == Escaping::None {
            handlebars.register_escape_fn(handlebars::no_escape);
        }

        handlebars.register_helper("print", Box::new(PrintHelper));

        handlebars
            .register_template_string(TEMPLATE_NAME, translate(source)?)
            .map_err(|e| Error::TemplateSyntax(e.to_string()))?;

        Ok(Self { handlebars })
    }

    /// Read and compile the template file at `path`.
    pub fn load<P: AsRef<Path>>(path: P, escaping: Escaping) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| Error::TemplateRead {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), bytes = source.len(), "Loaded message template");
        Self::parse(&source, escaping)
    }

    /// Render the template against the substitution arguments.
    pub fn render(&self, arguments: &BTreeMap<String, String>) -> Result<String> {
        self.handlebars
            .render(TEMPLATE_NAME, arguments)
            .map_err(|e| Error::TemplateRender(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_dot_placeholder() {
        let template = MessageTemplate::parse("Hello, {{.name}}!", Escaping::None).unwrap();
        let out = template.render(&args(&[("name", "World")])).unwrap();
        assert_eq!(out, "Hello, World!");
    }

    #[test]
    fn renders_dot_as_current_value() {
        let template = MessageTemplate::parse("{{with .name}}<{{.}}>{{end}}", Escaping::None).unwrap();
        assert_eq!(template.render(&args(&[("name", "World")])).unwrap(), "<World>");
    }

    #[test]
    fn renders_top_level_dot_like_a_go_map() {
        let template = MessageTemplate::parse("{{.}}", Escaping::None).unwrap();
        let out = template.render(&args(&[("b", "2"), ("a", "1")])).unwrap();
        assert_eq!(out, "map[a:1 b:2]");
    }

    #[test]
    fn keys_named_like_handlebars_keywords_render() {
        let template = MessageTemplate::parse("{{.this}}/{{.len}}/{{.if}}", Escaping::None).unwrap();
        let out = template
            .render(&args(&[("this", "T"), ("len", "L"), ("if", "I")]))
            .unwrap();
        assert_eq!(out, "T/L/I");
    }

    #[test]
    fn if_else_follows_value_presence() {
        let template = MessageTemplate::parse(
            "{{if .name}}Hello {{.name}}{{else}}Hello stranger{{end}}",
            Escaping::None,
        )
        .unwrap();
        assert_eq!(template.render(&args(&[("name", "Ann")])).unwrap(), "Hello Ann");
        assert_eq!(template.render(&args(&[("name", "")])).unwrap(), "Hello stranger");
        assert_eq!(template.render(&BTreeMap::new()).unwrap(), "Hello stranger");
    }

    #[test]
    fn block_tags_on_their_own_lines_keep_newlines() {
        let template = MessageTemplate::parse("{{if .a}}\nyes\n{{end}}\n", Escaping::None).unwrap();
        assert_eq!(template.render(&args(&[("a", "1")])).unwrap(), "\nyes\n\n");
        assert_eq!(template.render(&BTreeMap::new()).unwrap(), "\n");
    }

    #[test]
    fn comparisons_choose_branch() {
        let template = MessageTemplate::parse(
            "{{if eq .status \"failed\"}}FAIL{{else if ne .status \"ok\"}}WARN{{else}}OK{{end}}",
            Escaping::None,
        )
        .unwrap();
        assert_eq!(template.render(&args(&[("status", "failed")])).unwrap(), "FAIL");
        assert_eq!(template.render(&args(&[("status", "flaky")])).unwrap(), "WARN");
        assert_eq!(template.render(&args(&[("status", "ok")])).unwrap(), "OK");
    }

    #[test]
    fn range_over_arguments_visits_values_in_key_order() {
        let template = MessageTemplate::parse("{{range .}}[{{.}}]{{end}}", Escaping::None).unwrap();
        let out = template.render(&args(&[("b", "2"), ("a", "1")])).unwrap();
        assert_eq!(out, "[1][2]");
    }

    #[test]
    fn index_reads_keys_that_are_not_identifiers() {
        let template = MessageTemplate::parse("#{{index . \"build-id\"}}", Escaping::None).unwrap();
        assert_eq!(template.render(&args(&[("build-id", "42")])).unwrap(), "#42");
    }

    #[test]
    fn print_spaces_non_string_operands() {
        let template = MessageTemplate::parse("{{print 1 2}} {{print \"a\" 1 \"b\"}}", Escaping::None).unwrap();
        assert_eq!(template.render(&BTreeMap::new()).unwrap(), "1 2 a1b");
    }

    #[test]
    fn missing_key_renders_empty() {
        let template = MessageTemplate::parse("[{{.missing}}]", Escaping::None).unwrap();
        assert_eq!(template.render(&BTreeMap::new()).unwrap(), "[]");
    }

    #[test]
    fn plain_escaping_keeps_markup_characters() {
        let template = MessageTemplate::parse("{{.v}}", Escaping::None).unwrap();
        let out = template.render(&args(&[("v", "a < b & c")])).unwrap();
        assert_eq!(out, "a < b & c");
    }

    #[test]
    fn html_escaping_escapes_values_but_not_template_text() {
        let template = MessageTemplate::parse("<b>{{.v}}</b>", Escaping::Html).unwrap();
        let out = template.render(&args(&[("v", "<i>x</i> & y")])).unwrap();
        assert_eq!(out, "<b>&lt;i&gt;x&lt;/i&gt; &amp; y</b>");
    }

    #[test]
    fn trim_markers_strip_whitespace() {
        let template = MessageTemplate::parse("a  {{- .v -}}  b", Escaping::None).unwrap();
        assert_eq!(template.render(&args(&[("v", "-")])).unwrap(), "a-b");
    }

    #[test]
    fn invalid_syntax_is_rejected() {
        for source in ["{{if .ok}}never closed", "{{shout .name}}", "{{.a .b}}"] {
            let result = MessageTemplate::parse(source, Escaping::None);
            assert!(matches!(result, Err(Error::TemplateSyntax(_))), "{:?}", source);
        }
    }

    #[test]
    fn html_escaping_applies_to_printed_values() {
        let template = MessageTemplate::parse("{{print .v}} {{.}}", Escaping::Html).unwrap();
        let out = template.render(&args(&[("v", "<b>")])).unwrap();
        assert_eq!(out, "&lt;b&gt; map[v:&lt;b&gt;]");
    }

    #[test]
    fn load_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Build {{{{.id}}}} finished").unwrap();

        let template = MessageTemplate::load(file.path(), Escaping::None).unwrap();
        assert_eq!(
            template.render(&args(&[("id", "42")])).unwrap(),
            "Build 42 finished\n"
        );
    }

    #[test]
    fn load_reports_missing_file() {
        let result = MessageTemplate::load("/nonexistent/message.tmpl", Escaping::None);
        assert!(matches!(result, Err(Error::TemplateRead { .. })));
    }

    #[test]
    fn escaping_for_html_flag() {
        assert_eq!(Escaping::for_html(true), Escaping::Html);
        assert_eq!(Escaping::for_html(false), Escaping::None);
    }
}
