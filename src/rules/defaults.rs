//! The built-in rule table and construction from `[[rules]]`.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Matcher, Rule, RuleTable, RuleTableError, Stage};
use crate::config::{CompatPatchConfig, RuleConfig};
use crate::transforms::{instantiate, BindContext, Transform, TransformKind};

/// Binary assets referenced by URL.
pub const URL_ASSET_EXTENSIONS: [&str; 6] = ["png", "woff", "woff2", "eot", "gif", "ttf"];

fn bind(
    index: usize,
    kind: TransformKind,
    ctx: &BindContext<'_>,
) -> Result<Arc<dyn Transform>, RuleTableError> {
    instantiate(kind, ctx).map_err(|source| RuleTableError::Bind { index, source })
}

fn inline(
    index: usize,
    kinds: &[TransformKind],
    ctx: &BindContext<'_>,
) -> Result<Vec<Stage>, RuleTableError> {
    kinds.iter().map(|&k| bind(index, k, ctx).map(Stage::inline)).collect()
}

/// The default table, in match order:
///
/// | matcher | chain |
/// |---|---|
/// | `.ts` `.tsx` | define, script (pooled, cached) |
/// | `.svg` | svg-inline |
/// | `.css` | css, style-inject |
/// | `.json` under `node_modules/*remark*` | json |
/// | `.png` `.woff` `.woff2` `.eot` `.gif` `.ttf` | url-asset |
/// | `.less` | less, css, style-inject |
/// | `.node` | native-addon |
/// | each distinct compat patch `test` | compat-patch |
pub fn default_rules(ctx: &BindContext<'_>) -> Result<Vec<Rule>, RuleTableError> {
    use TransformKind::*;

    let mut rules = Vec::new();

    let script = vec![Stage::inline(bind(0, Define, ctx)?), Stage::pooled(bind(0, Script, ctx)?)];
    rules.push(Rule::new(Matcher::extensions(&["ts", "tsx"]), script).cached());
    rules.push(Rule::new(Matcher::extensions(&["svg"]), inline(1, &[SvgInline], ctx)?));
    rules.push(Rule::new(Matcher::extensions(&["css"]), inline(2, &[Css, StyleInject], ctx)?));

    let remark = Matcher::extensions(&["json"])
        .within(r"node_modules.*remark.*")
        .map_err(|source| RuleTableError::InvalidPattern { index: 3, source })?;
    rules.push(Rule::new(remark, inline(3, &[Json], ctx)?));

    rules.push(Rule::new(Matcher::extensions(&URL_ASSET_EXTENSIONS), inline(4, &[UrlAsset], ctx)?));
    let less = inline(5, &[Less, Css, StyleInject], ctx)?;
    rules.push(Rule::new(Matcher::extensions(&["less"]), less));
    rules.push(Rule::new(Matcher::extensions(&["node"]), inline(6, &[NativeAddon], ctx)?));

    rules.extend(compat_rules(rules.len(), ctx)?);
    Ok(rules)
}

/// One rule per distinct patch `test`, each bound to the patches sharing it.
fn compat_rules(first_index: usize, ctx: &BindContext<'_>) -> Result<Vec<Rule>, RuleTableError> {
    let mut groups: BTreeMap<&str, Vec<CompatPatchConfig>> = BTreeMap::new();
    for patch in ctx.compat_patches {
        groups.entry(patch.test.as_str()).or_default().push(patch.clone());
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(offset, (test, patches))| {
            let index = first_index + offset;
            let matcher =
                Matcher::pattern(test)
                    .map_err(|source| RuleTableError::InvalidPattern { index, source })?;
            let scoped = BindContext { compat_patches: &patches, ..*ctx };
            let patch = bind(index, TransformKind::CompatPatch, &scoped)?;
            Ok(Rule::new(matcher, vec![Stage::inline(patch)]))
        })
        .collect()
}

/// Rules from `[[rules]]` entries. Compatibility patches are appended after
/// the custom entries so they still apply.
pub fn custom_rules(
    configs: &[RuleConfig],
    ctx: &BindContext<'_>,
) -> Result<Vec<Rule>, RuleTableError> {
    let mut rules = Vec::with_capacity(configs.len());
    for (index, config) in configs.iter().enumerate() {
        let invalid = |source| RuleTableError::InvalidPattern { index, source };
        let mut matcher = match &config.test {
            Some(test) => Matcher::pattern(test).map_err(invalid)?,
            None => Matcher::extensions(&config.extensions),
        };
        if let Some(include) = &config.include {
            matcher = matcher.within(include).map_err(invalid)?;
        }

        let chain = config
            .stages
            .iter()
            .map(|&kind| {
                let transform = bind(index, kind, ctx)?;
                Ok(if config.pooled { Stage::pooled(transform) } else { Stage::inline(transform) })
            })
            .collect::<Result<Vec<_>, RuleTableError>>()?;

        let rule = Rule::new(matcher, chain);
        rules.push(if config.cache { rule.cached() } else { rule });
    }
    rules.extend(compat_rules(rules.len(), ctx)?);
    Ok(rules)
}

/// Build the rule table: the custom table when configured, else the default.
pub fn build_rules(
    configs: Option<&[RuleConfig]>,
    ctx: &BindContext<'_>,
) -> Result<RuleTable, RuleTableError> {
    let rules = match configs {
        Some(configs) => custom_rules(configs, ctx)?,
        None => default_rules(ctx)?,
    };
    RuleTable::new(rules)
}
