//! Stylesheet stages: Less lowering, CSS parse/print and style injection.

use std::collections::HashMap;
use std::sync::OnceLock;

use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use regex::Regex;

use super::{js_string, StageInput, Transform, TransformOutput};

/// Parses a stylesheet and prints it back, minified when the mode says so.
#[derive(Debug, Clone)]
pub struct CssTransform {
    minify: bool,
}

impl CssTransform {
    pub fn new(minify: bool) -> Self {
        Self { minify }
    }
}

impl Transform for CssTransform {
    fn name(&self) -> &'static str {
        "css"
    }

    fn fingerprint(&self) -> String {
        format!("minify={}", self.minify)
    }

    fn apply(&self, input: &StageInput) -> Result<TransformOutput, String> {
        let text = input.text()?;
        let options = ParserOptions { filename: input.id.clone(), ..ParserOptions::default() };
        let sheet = StyleSheet::parse(text, options).map_err(|e| e.to_string())?;
        let printed = sheet
            .to_css(PrinterOptions { minify: self.minify, ..PrinterOptions::default() })
            .map_err(|e| e.to_string())?;
        Ok(TransformOutput::code(printed.code))
    }
}

/// Wraps CSS text in a module that attaches it to the document.
#[derive(Debug, Default)]
pub struct StyleInjectTransform;

impl Transform for StyleInjectTransform {
    fn name(&self) -> &'static str {
        "style-inject"
    }

    fn apply(&self, input: &StageInput) -> Result<TransformOutput, String> {
        let css = input.text()?;
        let code = format!(
            "const css = {css};\n\
             if (typeof document !== \"undefined\") {{\n\
             \x20 const style = document.createElement(\"style\");\n\
             \x20 style.setAttribute(\"data-module\", {id});\n\
             \x20 style.textContent = css;\n\
             \x20 document.head.appendChild(style);\n\
             }}\n\
             export default css;\n",
            css = js_string(css),
            id = js_string(&input.id),
        );
        Ok(TransformOutput::code(code))
    }
}

/// Lowers the Less subset used by stylesheets in the tree: `@name: value;`
/// variables and `//` line comments. Everything else must already be CSS.
#[derive(Debug, Default)]
pub struct LessTransform;

fn variable_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*@([A-Za-z_][\w-]*)\s*:\s*([^;{}]+);\s*$").expect("static regex")
    })
}

fn variable_use_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([A-Za-z_][\w-]*)").expect("static regex"))
}

/// Remove a `//` comment that is not inside a string or a `url(...)` scheme.
fn strip_line_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i + 1 < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == b'"' || c == b'\'' => quote = Some(c),
            None if c == b'/' && bytes[i + 1] == b'/' && (i == 0 || bytes[i - 1] != b':') => {
                return &line[..i];
            }
            None => {}
        }
        i += 1;
    }
    line
}

pub fn lower_less(source: &str) -> Result<String, String> {
    let mut variables: HashMap<String, String> = HashMap::new();
    let mut out = Vec::new();
    let mut depth: i32 = 0;

    for (idx, raw) in source.lines().enumerate() {
        let line = strip_line_comment(raw);

        if depth == 0 {
            if let Some(caps) = variable_decl_re().captures(line) {
                let value = substitute(caps[2].trim(), &variables, idx + 1)?;
                variables.insert(caps[1].to_string(), value);
                out.push(String::new());
                continue;
            }
        }

        depth += line.matches('{').count() as i32 - line.matches('}').count() as i32;
        out.push(substitute(line, &variables, idx + 1)?);
    }

    Ok(out.join("\n"))
}

fn substitute(
    text: &str,
    variables: &HashMap<String, String>,
    line: usize,
) -> Result<String, String> {
    let mut missing = None;
    let replaced = variable_use_re().replace_all(text, |caps: &regex::Captures<'_>| {
        match variables.get(&caps[1]) {
            Some(value) => value.clone(),
            None => {
                // At-rules (`@media`, `@import`) share the syntax; only a
                // name used as a value is an undefined variable.
                let at_rule = text.trim_start().starts_with(&caps[0]);
                if !at_rule && missing.is_none() {
                    missing = Some(caps[1].to_string());
                }
                caps[0].to_string()
            }
        }
    });
    match missing {
        Some(name) => Err(format!("line {}: undefined variable @{}", line, name)),
        None => Ok(replaced.into_owned()),
    }
}

impl Transform for LessTransform {
    fn name(&self) -> &'static str {
        "less"
    }

    fn apply(&self, input: &StageInput) -> Result<TransformOutput, String> {
        Ok(TransformOutput::code(lower_less(input.text()?)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stage: &dyn Transform, id: &str, source: &str) -> Result<String, String> {
        let input = StageInput::new(id, id, source.as_bytes().to_vec());
        stage.apply(&input).map(|out| String::from_utf8(out.content).unwrap())
    }

    #[test]
    fn test_css_pretty_and_minified() {
        let src = ".a {\n  margin: 0;\n}\n";
        let pretty = run(&CssTransform::new(false), "c.css", src).unwrap();
        assert!(pretty.contains("margin: 0"));

        let minified = run(&CssTransform::new(true), "c.css", src).unwrap();
        assert_eq!(minified.trim(), ".a{margin:0}");
    }

    #[test]
    fn test_style_inject_module() {
        let out = run(&StyleInjectTransform, "src/c.css", ".a{margin:0}").unwrap();
        assert!(out.contains("const css = \".a{margin:0}\";"));
        assert!(out.contains("\"src/c.css\""));
        assert!(out.ends_with("export default css;\n"));
    }

    #[test]
    fn test_less_variables_and_comments() {
        let src = "@pad: 4px; // spacing\n@big: @pad;\n.a {\n  padding: @big; // inner\n  \
                   background: url(http://x/y.png);\n}\n";
        let out = lower_less(src).unwrap();
        assert!(out.contains("padding: 4px;"));
        assert!(out.contains("url(http://x/y.png)"));
        assert!(!out.contains("spacing"));
        assert!(!out.contains("@pad"));
    }

    #[test]
    fn test_less_keeps_at_rules() {
        let out = lower_less("@media (max-width: 10px) {\n  .a { margin: 0; }\n}\n").unwrap();
        assert!(out.starts_with("@media"));
    }

    #[test]
    fn test_less_undefined_variable() {
        let err = lower_less(".a {\n  color: @nope;\n}\n").unwrap_err();
        assert!(err.contains("@nope"));
        assert!(err.contains("line 2"));
    }
}
