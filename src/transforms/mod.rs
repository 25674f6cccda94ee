//! Transform stages.
//!
//! A transform is a pure function from input content to output content with
//! an identity name and a bag of options bound when the rule table is built.
//! Implementations are looked up through the typed [`TransformKind`] registry
//! rather than by string at processing time.
//!
//! Every chain that matches an input ends in ES module source text; the
//! linker lowers that text into the bundle's registry form afterwards.

pub mod asset;
pub mod cache;
pub mod compat;
pub mod css;
pub mod define;
pub mod script;
pub mod svg;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CompatPatchConfig;
use crate::mode::ModeSettings;

pub use asset::{JsonTransform, NativeAddonTransform, UrlAssetTransform};
pub use cache::TransformCache;
pub use compat::CompatPatchTransform;
pub use css::{CssTransform, LessTransform, StyleInjectTransform};
pub use define::DefineTransform;
pub use script::ScriptTransform;
pub use svg::SvgInlineTransform;

/// Content handed to a stage. Owned so it can cross into a pooled worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInput {
    /// Module identifier of the input
    pub id: String,
    /// File path on disk
    pub path: PathBuf,
    pub content: Vec<u8>,
}

impl StageInput {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, content: Vec<u8>) -> Self {
        Self { id: id.into(), path: path.into(), content }
    }

    /// Content as UTF-8 text, or a stage failure message.
    pub fn text(&self) -> Result<&str, String> {
        std::str::from_utf8(&self.content).map_err(|e| format!("input is not valid UTF-8: {}", e))
    }

    /// File name used when the content is emitted as a standalone asset.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.rsplit('/').next().unwrap_or("asset").to_string())
    }
}

/// A file a stage asks the emitter to write next to the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedAsset {
    /// Path relative to the output directory
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Result of running one stage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransformOutput {
    pub content: Vec<u8>,
    pub assets: Vec<EmittedAsset>,
}

impl TransformOutput {
    pub fn code(code: impl Into<String>) -> Self {
        Self { content: code.into().into_bytes(), assets: vec![] }
    }

    pub fn with_asset(mut self, asset: EmittedAsset) -> Self {
        self.assets.push(asset);
        self
    }
}

/// A transform stage.
pub trait Transform: Send + Sync + fmt::Debug {
    /// Identity name, used in errors and cache keys
    fn name(&self) -> &'static str;

    /// Stable rendering of the bound options, used in cache keys.
    fn fingerprint(&self) -> String {
        String::new()
    }

    /// Run the stage. Errors are plain messages; the caller tags them with
    /// the input and stage identity.
    fn apply(&self, input: &StageInput) -> Result<TransformOutput, String>;
}

/// Typed registry key for transform implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformKind {
    /// Declaration-level type erasure for TypeScript sources
    Script,
    /// Whole-word identifier substitution from `[define]`
    Define,
    /// SVG markup as an exported string
    SvgInline,
    /// Stylesheet parse and print
    Css,
    /// Less variables and line comments, lowered to plain CSS
    Less,
    /// CSS text wrapped in a module that injects a `<style>` element
    StyleInject,
    /// Small binaries as data URLs, larger ones as emitted files
    UrlAsset,
    /// JSON documents as exported values
    Json,
    /// Native add-ons emitted as files and loaded through `process.dlopen`
    NativeAddon,
    /// Configured text patches for third-party sources
    CompatPatch,
}

impl TransformKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransformKind::Script => "script",
            TransformKind::Define => "define",
            TransformKind::SvgInline => "svg-inline",
            TransformKind::Css => "css",
            TransformKind::Less => "less",
            TransformKind::StyleInject => "style-inject",
            TransformKind::UrlAsset => "url-asset",
            TransformKind::Json => "json",
            TransformKind::NativeAddon => "native-addon",
            TransformKind::CompatPatch => "compat-patch",
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environment state bound into stage options at chain construction.
#[derive(Debug, Clone, Copy)]
pub struct BindContext<'a> {
    pub settings: &'a ModeSettings,
    pub defines: &'a BTreeMap<String, String>,
    pub inline_limit: u64,
    pub compat_patches: &'a [CompatPatchConfig],
}

/// Stage construction failure (bad define name, bad patch pattern).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot build '{kind}' stage: {message}")]
pub struct BindError {
    pub kind: TransformKind,
    pub message: String,
}

/// Build the implementation for `kind` with its options bound from `ctx`.
pub fn instantiate(
    kind: TransformKind,
    ctx: &BindContext<'_>,
) -> Result<Arc<dyn Transform>, BindError> {
    let bind_err = |message: String| BindError { kind, message };

    let stage: Arc<dyn Transform> = match kind {
        TransformKind::Script => Arc::new(ScriptTransform::new()),
        TransformKind::Define => Arc::new(DefineTransform::new(ctx.defines).map_err(bind_err)?),
        TransformKind::SvgInline => Arc::new(SvgInlineTransform),
        TransformKind::Css => Arc::new(CssTransform::new(ctx.settings.minify)),
        TransformKind::Less => Arc::new(LessTransform),
        TransformKind::StyleInject => Arc::new(StyleInjectTransform),
        TransformKind::UrlAsset => Arc::new(UrlAssetTransform::new(ctx.inline_limit)),
        TransformKind::Json => Arc::new(JsonTransform),
        TransformKind::NativeAddon => Arc::new(NativeAddonTransform),
        TransformKind::CompatPatch => {
            Arc::new(CompatPatchTransform::new(ctx.compat_patches).map_err(bind_err)?)
        }
    };
    Ok(stage)
}

/// A stage failed for a specific input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{input}: stage '{stage}' failed: {message}")]
pub struct TransformError {
    /// Identity of the input the stage ran on
    pub input: String,
    pub stage: String,
    pub message: String,
}

impl TransformError {
    pub fn new(
        input: impl Into<String>,
        stage: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self { input: input.into(), stage: stage.into(), message: message.into() }
    }
}

/// Content-addressed asset name: `assets/<stem>.<hash8>.<ext>`.
pub(crate) fn hashed_asset_name(file_name: &str, bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(bytes);
    let short: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("assets/{}.{}.{}", stem, short, ext),
        _ => format!("assets/{}.{}", file_name, short),
    }
}

/// JavaScript expression for the runtime URL of an emitted asset.
pub(crate) fn asset_url_expr(name: &str) -> String {
    format!("new URL({}, import.meta.url).href", js_string(&format!("./{}", name)))
}

/// Quote text as a JavaScript string literal.
pub(crate) fn js_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}
