//! Compatibility patches for third-party sources.
//!
//! Each patch is named, scoped to inputs whose identifier matches `test`,
//! and replaces literal matches of `pattern` with `replacement`. Patches are
//! data from `[[compat_patches]]`; the stage has no built-in knowledge of any
//! particular package.

use regex::{NoExpand, Regex};

use super::{StageInput, Transform, TransformOutput};
use crate::config::CompatPatchConfig;

#[derive(Debug)]
struct CompiledPatch {
    name: String,
    test: Regex,
    pattern: Regex,
    replacement: String,
}

#[derive(Debug, Default)]
pub struct CompatPatchTransform {
    patches: Vec<CompiledPatch>,
}

impl CompatPatchTransform {
    pub fn new(patches: &[CompatPatchConfig]) -> Result<Self, String> {
        let patches = patches
            .iter()
            .map(|p| {
                let test = Regex::new(&p.test)
                    .map_err(|e| format!("patch '{}' test: {}", p.name, e))?;
                let pattern =
                    Regex::new(&p.pattern)
                        .map_err(|e| format!("patch '{}' pattern: {}", p.name, e))?;
                Ok(CompiledPatch {
                    name: p.name.clone(),
                    test,
                    pattern,
                    replacement: p.replacement.clone(),
                })
            })
            .collect::<Result<Vec<_>, String>>()?;
        Ok(Self { patches })
    }
}

impl Transform for CompatPatchTransform {
    fn name(&self) -> &'static str {
        "compat-patch"
    }

    fn fingerprint(&self) -> String {
        self.patches
            .iter()
            .map(|p| format!("{}:{}->{};", p.name, p.pattern, p.replacement))
            .collect()
    }

    fn apply(&self, input: &StageInput) -> Result<TransformOutput, String> {
        let mut text = input.text()?.to_string();
        for patch in self.patches.iter().filter(|p| p.test.is_match(&input.id)) {
            if !patch.pattern.is_match(&text) {
                tracing::debug!(
                    patch = %patch.name,
                    input = %input.id,
                    "compat patch did not apply"
                );
                continue;
            }
            text = patch.pattern.replace_all(&text, NoExpand(&patch.replacement)).into_owned();
        }
        Ok(TransformOutput::code(text))
    }
}
