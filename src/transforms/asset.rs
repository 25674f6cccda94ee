//! Binary and document stages: URL assets, JSON documents, native add-ons.

use base64::Engine;

use super::{
    asset_url_expr, hashed_asset_name, js_string, EmittedAsset, StageInput, Transform,
    TransformOutput,
};

/// MIME type for an asset by file extension.
pub fn mime_for(file_name: &str) -> &'static str {
    let ext = file_name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "eot" => "application/vnd.ms-fontobject",
        _ => "application/octet-stream",
    }
}

/// Inlines assets up to `limit` bytes as data URLs; larger ones are emitted
/// as files and referenced by URL.
#[derive(Debug, Clone)]
pub struct UrlAssetTransform {
    limit: u64,
}

impl UrlAssetTransform {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }
}

impl Transform for UrlAssetTransform {
    fn name(&self) -> &'static str {
        "url-asset"
    }

    fn fingerprint(&self) -> String {
        format!("limit={}", self.limit)
    }

    fn apply(&self, input: &StageInput) -> Result<TransformOutput, String> {
        let file_name = input.file_name();

        if input.content.len() as u64 <= self.limit {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&input.content);
            let url = format!("data:{};base64,{}", mime_for(&file_name), encoded);
            return Ok(TransformOutput::code(format!("export default {};\n", js_string(&url))));
        }

        let name = hashed_asset_name(&file_name, &input.content);
        let code = format!("export default {};\n", asset_url_expr(&name));
        let asset = EmittedAsset { name, bytes: input.content.clone() };
        Ok(TransformOutput::code(code).with_asset(asset))
    }
}

/// Parses a JSON document and exports its value.
#[derive(Debug, Default)]
pub struct JsonTransform;

impl Transform for JsonTransform {
    fn name(&self) -> &'static str {
        "json"
    }

    fn apply(&self, input: &StageInput) -> Result<TransformOutput, String> {
        let value: serde_json::Value =
            serde_json::from_slice(&input.content).map_err(|e| format!("invalid JSON: {}", e))?;
        let literal = serde_json::to_string(&value).map_err(|e| e.to_string())?;
        Ok(TransformOutput::code(format!("export default {};\n", literal)))
    }
}

/// Emits a native add-on next to the bundle and loads it at runtime.
#[derive(Debug, Default)]
pub struct NativeAddonTransform;

impl Transform for NativeAddonTransform {
    fn name(&self) -> &'static str {
        "native-addon"
    }

    fn apply(&self, input: &StageInput) -> Result<TransformOutput, String> {
        if input.content.is_empty() {
            return Err("native add-on is empty".to_string());
        }
        let name = hashed_asset_name(&input.file_name(), &input.content);
        let code = format!(
            "const addon = {{ exports: {{}} }};\n\
             process.dlopen(addon, decodeURIComponent(new URL({}, import.meta.url).pathname));\n\
             export default addon.exports;\n",
            js_string(&format!("./{}", name)),
        );
        let asset = EmittedAsset { name, bytes: input.content.clone() };
        Ok(TransformOutput::code(code).with_asset(asset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, bytes: &[u8]) -> StageInput {
        StageInput::new(format!("src/{}", name), format!("/p/src/{}", name), bytes.to_vec())
    }

    #[test]
    fn test_small_asset_inlined() {
        let out = UrlAssetTransform::new(100).apply(&input("dot.png", b"\x89PNG")).unwrap();
        let code = String::from_utf8(out.content).unwrap();
        assert!(code.starts_with("export default \"data:image/png;base64,"));
        assert!(out.assets.is_empty());
    }

    #[test]
    fn test_large_asset_emitted() {
        let bytes = vec![7u8; 64];
        let out = UrlAssetTransform::new(16).apply(&input("font.woff2", &bytes)).unwrap();
        assert_eq!(out.assets.len(), 1);
        assert!(out.assets[0].name.starts_with("assets/font."));
        assert!(out.assets[0].name.ends_with(".woff2"));
        assert_eq!(out.assets[0].bytes, bytes);
        let code = String::from_utf8(out.content).unwrap();
        assert!(code.contains("import.meta.url"));
    }

    #[test]
    fn test_json_document() {
        let out = JsonTransform.apply(&input("data.json", b"{ \"a\": [1, 2] }")).unwrap();
        assert_eq!(String::from_utf8(out.content).unwrap(), "export default {\"a\":[1,2]};\n");
        assert!(JsonTransform.apply(&input("bad.json", b"{")).is_err());
    }

    #[test]
    fn test_native_addon() {
        let out = NativeAddonTransform.apply(&input("addon.node", b"\x7fELF")).unwrap();
        assert_eq!(out.assets.len(), 1);
        assert!(String::from_utf8(out.content).unwrap().contains("process.dlopen"));
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("a.WOFF"), "font/woff");
        assert_eq!(mime_for("noext"), "application/octet-stream");
    }
}
