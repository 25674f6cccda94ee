//! Compile-time identifier substitution.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use oxc_ast::ast::ObjectPropertyKind;
use oxc_ast::{AstKind, Visit};
use oxc_span::GetSpan;

use super::{StageInput, Transform, TransformOutput};
use crate::ast::{self, Edits};

/// Replaces identifier references to configured names with expressions.
///
/// Only references are rewritten. Property names (`obj.scriptUrl`,
/// `{ scriptUrl: 1 }`), declarations and the contents of strings, templates
/// and comments are left alone. A shorthand property `{ scriptUrl }` keeps
/// its key. Shadowing bindings are not tracked.
#[derive(Debug)]
pub struct DefineTransform {
    replacements: BTreeMap<String, String>,
}

impl DefineTransform {
    pub fn new(defines: &BTreeMap<String, String>) -> Result<Self, String> {
        if let Some(name) = defines.keys().find(|name| !is_identifier(name)) {
            return Err(format!("'{}' is not a valid identifier", name));
        }
        Ok(Self { replacements: defines.clone() })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

struct References<'d> {
    replacements: &'d BTreeMap<String, String>,
    /// Start offsets of shorthand property values
    shorthand: HashSet<u32>,
    edits: Edits,
}

impl<'a> Visit<'a> for References<'_> {
    fn enter_node(&mut self, kind: AstKind<'a>) {
        match kind {
            AstKind::ObjectExpression(object) => {
                for property in object.properties.iter() {
                    if let ObjectPropertyKind::ObjectProperty(property) = property {
                        if property.shorthand {
                            self.shorthand.insert(property.value.span().start);
                        }
                    }
                }
            }
            AstKind::IdentifierReference(ident) => {
                let name = ident.name.as_str();
                if let Some(value) = self.replacements.get(name) {
                    let text = if self.shorthand.contains(&ident.span.start) {
                        format!("{}: {}", name, value)
                    } else {
                        value.clone()
                    };
                    self.edits.replace(ident.span, text);
                }
            }
            _ => {}
        }
    }
}

impl Transform for DefineTransform {
    fn name(&self) -> &'static str {
        "define"
    }

    fn fingerprint(&self) -> String {
        self.replacements.iter().map(|(name, value)| format!("{}={};", name, value)).collect()
    }

    fn apply(&self, input: &StageInput) -> Result<TransformOutput, String> {
        let text = input.text()?;
        if !self.replacements.keys().any(|name| text.contains(name.as_str())) {
            return Ok(TransformOutput::code(text.to_string()));
        }

        let source_type = ast::source_type_for(Path::new(&input.id));
        let edits = ast::parse(text, source_type, |program| {
            let mut refs = References {
                replacements: &self.replacements,
                shorthand: HashSet::new(),
                edits: Edits::new(),
            };
            refs.visit_program(program);
            refs.edits
        })
        .map_err(|issues| issues.first().map(ToString::to_string).unwrap_or_default())?;

        Ok(TransformOutput::code(edits.apply(text)))
    }
}
