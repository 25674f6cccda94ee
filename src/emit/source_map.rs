//! Source map v3 generation.
//!
//! Only line-level mappings are produced: every mapped generated line points
//! at column zero of one source line. Encoding is left to the `sourcemap`
//! crate; this type only collects mappings while a chunk is written.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sourcemap::SourceMap;

/// Collects line mappings for one generated file.
#[derive(Debug, Clone, Default)]
pub struct SourceMapBuilder {
    file: String,
    source_root: String,
    /// (name, content) in registration order
    sources: Vec<(String, Option<String>)>,
    include_contents: bool,
    /// (generated line, source, source line)
    mappings: Vec<(u32, u32, u32)>,
}

impl SourceMapBuilder {
    pub fn new(file: impl Into<String>, source_root: impl Into<String>) -> Self {
        Self { file: file.into(), source_root: source_root.into(), ..Self::default() }
    }

    /// Embed `sourcesContent` in the output.
    pub fn with_contents(mut self) -> Self {
        self.include_contents = true;
        self
    }

    /// Register a source and return its index.
    pub fn add_source(&mut self, name: &str, content: Option<&str>) -> usize {
        if let Some(i) = self.sources.iter().position(|(s, _)| s == name) {
            return i;
        }
        self.sources.push((name.to_string(), content.map(str::to_string)));
        self.sources.len() - 1
    }

    /// Map zero-based `generated_line` to zero-based `source_line` of `source`.
    pub fn map_line(&mut self, generated_line: usize, source: usize, source_line: usize) {
        self.mappings.push((generated_line as u32, source as u32, source_line as u32));
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    pub fn build(&self) -> SourceMap {
        let mut builder = sourcemap::SourceMapBuilder::new(Some(&self.file));
        if !self.source_root.is_empty() {
            builder.set_source_root(Some(self.source_root.as_str()));
        }
        let ids: Vec<u32> = self
            .sources
            .iter()
            .map(|(name, content)| {
                let id = builder.add_source(name);
                if self.include_contents {
                    builder.set_source_contents(id, content.as_deref());
                }
                id
            })
            .collect();

        let mut mappings = self.mappings.clone();
        mappings.sort_by_key(|&(generated, _, _)| generated);
        for (generated, source, source_line) in mappings {
            let id = ids.get(source as usize).copied();
            builder.add_raw(generated, 0, source_line, 0, id, None, false);
        }
        builder.into_sourcemap()
    }

    pub fn to_json(&self) -> String {
        let mut bytes = Vec::new();
        if let Err(e) = self.build().to_writer(&mut bytes) {
            tracing::warn!(file = %self.file, error = %e, "failed to encode source map");
            return String::new();
        }
        String::from_utf8(bytes).unwrap_or_default()
    }

    /// `sourceMappingURL` comment carrying the map as a data URL.
    pub fn to_inline_comment(&self) -> String {
        format!(
            "//# sourceMappingURL=data:application/json;charset=utf-8;base64,{}",
            STANDARD.encode(self.to_json())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(map: &SourceMapBuilder) -> SourceMap {
        SourceMap::from_slice(map.to_json().as_bytes()).unwrap()
    }

    #[test]
    fn test_line_mappings() {
        let mut map = SourceMapBuilder::new("out.js", "");
        let a = map.add_source("a.ts", None);
        let b = map.add_source("b.ts", None);
        map.map_line(4, b, 0);
        map.map_line(1, a, 0);
        map.map_line(2, a, 1);
        assert_eq!(map.mapping_count(), 3);

        let decoded = decode(&map);
        assert_eq!(decoded.get_token_count(), 3);
        for (line, source, source_line) in [(1, "a.ts", 0), (2, "a.ts", 1), (4, "b.ts", 0)] {
            let token = decoded.lookup_token(line, 0).unwrap();
            assert_eq!(token.get_dst_line(), line);
            assert_eq!(token.get_source(), Some(source));
            assert_eq!(token.get_src_line(), source_line);
        }
    }

    #[test]
    fn test_sources_deduplicated() {
        let mut map = SourceMapBuilder::new("out.js", "");
        assert_eq!(map.add_source("a.ts", None), 0);
        assert_eq!(map.add_source("a.ts", None), 0);
        assert_eq!(map.add_source("b.ts", None), 1);
        assert_eq!(decode(&map).get_source_count(), 2);
    }

    #[test]
    fn test_json_shape() {
        let mut map = SourceMapBuilder::new("renderers.js", "../..").with_contents();
        let a = map.add_source("src/a.ts", Some("const a = 1;\n"));
        map.map_line(0, a, 0);

        let value: serde_json::Value = serde_json::from_str(&map.to_json()).unwrap();
        assert_eq!(value["version"], 3);
        assert_eq!(value["file"], "renderers.js");
        assert_eq!(value["sourceRoot"], "../..");
        assert_eq!(value["sources"][0], "src/a.ts");
        assert_eq!(value["sourcesContent"][0], "const a = 1;\n");
        assert_eq!(value["mappings"], "AAAA");
    }

    #[test]
    fn test_inline_comment_round_trips() {
        let mut map = SourceMapBuilder::new("renderers.js", "");
        map.add_source("src/a.ts", Some("ignored"));
        let comment = map.to_inline_comment();
        let encoded = comment.rsplit(',').next().unwrap();
        let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded, map.to_json());

        let parsed = SourceMap::from_slice(decoded.as_bytes()).unwrap();
        assert_eq!(parsed.get_file(), Some("renderers.js"));
        assert_eq!(parsed.get_source_contents(0), None);
    }
}
