//! Transform rule table.
//!
//! An ordered list of typed predicates over module identifiers, each paired
//! with a chain of transform stages. The first rule whose matcher accepts an
//! input wins; inputs no rule accepts pass through untouched.

pub mod defaults;

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use crate::pool::run_stage;
use crate::transforms::{
    BindError, StageInput, Transform, TransformCache, TransformError, TransformOutput,
};

pub use defaults::{build_rules, default_rules};

/// Where a stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionPolicy {
    /// On the coordinating thread
    #[default]
    Inline,
    /// On the worker pool
    Pooled,
}

#[derive(Debug, Clone)]
enum Predicate {
    /// Lowercase extensions without the dot, sorted
    Extensions(Vec<String>),
    Pattern(Regex),
}

/// Typed predicate over a module identifier, optionally scoped by a second
/// pattern (`include`).
#[derive(Debug, Clone)]
pub struct Matcher {
    predicate: Predicate,
    include: Option<Regex>,
}

impl Matcher {
    pub fn extensions<S: AsRef<str>>(extensions: &[S]) -> Self {
        let mut exts: Vec<String> = extensions
            .iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        exts.sort();
        exts.dedup();
        Self { predicate: Predicate::Extensions(exts), include: None }
    }

    pub fn pattern(test: &str) -> Result<Self, regex::Error> {
        Ok(Self { predicate: Predicate::Pattern(Regex::new(test)?), include: None })
    }

    /// Restrict the matcher to identifiers that also match `include`.
    pub fn within(mut self, include: &str) -> Result<Self, regex::Error> {
        self.include = Some(Regex::new(include)?);
        Ok(self)
    }

    pub fn matches(&self, id: &str) -> bool {
        let accepted = match &self.predicate {
            Predicate::Extensions(exts) => {
                extension_of(id).is_some_and(|ext| exts.iter().any(|e| *e == ext))
            }
            Predicate::Pattern(re) => re.is_match(id),
        };
        accepted && self.include.as_ref().map_or(true, |re| re.is_match(id))
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.predicate {
            Predicate::Extensions(exts) => write!(f, "ext({})", exts.join(","))?,
            Predicate::Pattern(re) => write!(f, "test(/{}/)", re.as_str())?,
        }
        if let Some(include) = &self.include {
            write!(f, " include(/{}/)", include.as_str())?;
        }
        Ok(())
    }
}

/// Lowercase extension of a module identifier.
pub(crate) fn extension_of(id: &str) -> Option<String> {
    let name = id.rsplit('/').next().unwrap_or(id);
    name.rsplit_once('.')
        .filter(|(stem, _)| !stem.is_empty())
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// One stage of a chain with its execution policy fixed.
#[derive(Debug, Clone)]
pub struct Stage {
    pub transform: Arc<dyn Transform>,
    pub policy: ExecutionPolicy,
}

impl Stage {
    pub fn inline(transform: Arc<dyn Transform>) -> Self {
        Self { transform, policy: ExecutionPolicy::Inline }
    }

    pub fn pooled(transform: Arc<dyn Transform>) -> Self {
        Self { transform, policy: ExecutionPolicy::Pooled }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub matcher: Matcher,
    pub chain: Vec<Stage>,
    /// Consult the transform cache before running the chain
    pub cache: bool,
}

impl Rule {
    pub fn new(matcher: Matcher, chain: Vec<Stage>) -> Self {
        Self { matcher, chain, cache: false }
    }

    pub fn cached(mut self) -> Self {
        self.cache = true;
        self
    }

    /// Cache key for running this rule's chain over `content`.
    pub fn cache_key(&self, content: &[u8]) -> String {
        let stages = self.chain.iter().map(|s| (s.transform.name(), s.transform.fingerprint()));
        TransformCache::key(&self.matcher.to_string(), stages, content)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<String> = self
            .chain
            .iter()
            .map(|s| match s.policy {
                ExecutionPolicy::Inline => s.transform.name().to_string(),
                ExecutionPolicy::Pooled => format!("{} [pooled]", s.transform.name()),
            })
            .collect();
        write!(f, "{} -> {}", self.matcher, stages.join(", "))?;
        if self.cache {
            write!(f, " (cached)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RuleTableError {
    /// A later rule can never fire because an earlier one has the same matcher
    #[error("rule {later} is shadowed by rule {earlier}: both match {matcher}")]
    Shadowed { earlier: usize, later: usize, matcher: String },
    #[error("rule {index}: invalid pattern: {source}")]
    InvalidPattern {
        index: usize,
        #[source]
        source: regex::Error,
    },
    #[error("rule {index}: {source}")]
    Bind {
        index: usize,
        #[source]
        source: BindError,
    },
    #[error("rule {index}: chain is empty")]
    EmptyChain { index: usize },
}

/// How an input is handled when no rule claims it, or which rule does.
#[derive(Debug, Clone, Copy)]
pub enum Disposition<'a> {
    /// Run this rule's chain
    Chain(usize, &'a Rule),
    /// Script or JSON the bundle links as-is
    NativeModule,
    /// Copied byte-for-byte
    Opaque,
}

/// Output of running the rule table on one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedOutput {
    /// Index of the rule that ran; `None` for pass-through
    pub rule: Option<usize>,
    pub output: TransformOutput,
}

/// Immutable, ordered rule table.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    /// Build a table, rejecting empty chains and rules that an earlier rule
    /// with an identical matcher would shadow.
    pub fn new(rules: Vec<Rule>) -> Result<Self, RuleTableError> {
        for (later, rule) in rules.iter().enumerate() {
            if rule.chain.is_empty() {
                return Err(RuleTableError::EmptyChain { index: later });
            }
            if let Some(earlier) = rules[..later].iter().position(|r| r.matcher == rule.matcher) {
                let matcher = rule.matcher.to_string();
                return Err(RuleTableError::Shadowed { earlier, later, matcher });
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First rule whose matcher accepts `id`.
    pub fn select(&self, id: &str) -> Option<(usize, &Rule)> {
        self.rules.iter().enumerate().find(|(_, r)| r.matcher.matches(id))
    }

    pub fn classify(&self, id: &str) -> Disposition<'_> {
        if let Some((index, rule)) = self.select(id) {
            return Disposition::Chain(index, rule);
        }
        match extension_of(id).as_deref() {
            Some("js") | Some("mjs") | Some("cjs") | Some("json") => Disposition::NativeModule,
            _ => Disposition::Opaque,
        }
    }

    /// Run the matching chain on `input` on the calling thread, stages left
    /// to right. Unmatched input comes back unmodified.
    pub fn apply(
        &self,
        input: &StageInput,
        cache: Option<&TransformCache>,
    ) -> Result<TransformedOutput, TransformError> {
        let Some((index, rule)) = self.select(&input.id) else {
            let output = TransformOutput { content: input.content.clone(), assets: vec![] };
            return Ok(TransformedOutput { rule: None, output });
        };

        let key = cache.filter(|_| rule.cache).map(|c| (c, rule.cache_key(&input.content)));
        if let Some((cache, key)) = &key {
            if let Some(output) = cache.get(key) {
                return Ok(TransformedOutput { rule: Some(index), output });
            }
        }

        let output = run_chain(&rule.chain, input)?;
        if let Some((cache, key)) = key {
            cache.insert(key, output.clone());
        }
        Ok(TransformedOutput { rule: Some(index), output })
    }
}

/// Run `stages` in order, feeding each stage the previous stage's content and
/// accumulating emitted assets.
pub fn run_chain(stages: &[Stage], input: &StageInput) -> Result<TransformOutput, TransformError> {
    let mut current = input.clone();
    let mut assets = Vec::new();
    for stage in stages {
        let out = run_stage(stage.transform.as_ref(), &current)?;
        assets.extend(out.assets);
        current.content = out.content;
    }
    Ok(TransformOutput { content: current.content, assets })
}
