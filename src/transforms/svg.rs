//! SVG markup inlined as a string export.

use regex::Regex;
use std::sync::OnceLock;

use super::{js_string, StageInput, Transform, TransformOutput};

#[derive(Debug, Default)]
pub struct SvgInlineTransform;

fn prolog_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<\?xml.*?\?>|<!DOCTYPE[^>]*>|<!--.*?-->").expect("static regex")
    })
}

fn between_tags_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r">\s+<").expect("static regex"))
}

/// Strip the XML prolog, doctype and comments, and collapse whitespace
/// between tags.
pub fn compact_svg(markup: &str) -> String {
    let stripped = prolog_re().replace_all(markup, "");
    let collapsed = between_tags_re().replace_all(&stripped, "><");
    collapsed.trim().to_string()
}

impl Transform for SvgInlineTransform {
    fn name(&self) -> &'static str {
        "svg-inline"
    }

    fn apply(&self, input: &StageInput) -> Result<TransformOutput, String> {
        let markup = compact_svg(input.text()?);
        if !markup.starts_with("<svg") {
            return Err("expected an <svg> root element".to_string());
        }
        Ok(TransformOutput::code(format!("export default {};\n", js_string(&markup))))
    }
}
