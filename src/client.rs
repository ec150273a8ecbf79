//! Client-side assets of a page.
//!
//! The client-reference manifest emitted for every page is a JavaScript file,
//! not JSON, so flattening it into a list of chunk paths is delegated to an
//! external resolver. This module only consumes the resolver's JSON output.

use std::process::Command;

use serde_json::Value;

use crate::error::ClientError;

/// Turns a client-reference manifest into a flat list of static asset paths.
pub trait ClientManifestResolver: Send + Sync {
    fn resolve(&self, manifest: &camino::Utf8Path) -> Result<Vec<String>, ClientError>;
}

/// Runs an external program with the manifest path as its last argument and
/// reads a JSON array of strings from its standard output.
#[derive(Debug, Clone)]
pub struct ScriptResolver {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ScriptResolver {
    fn default() -> Self {
        Self {
            program: "bun".into(),
            args: vec!["scripts/resolve-client-manifest.ts".into()],
        }
    }
}

impl ClientManifestResolver for ScriptResolver {
    fn resolve(&self, manifest: &camino::Utf8Path) -> Result<Vec<String>, ClientError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(manifest)
            .output()
            .map_err(|e| ClientError::Spawn(self.program.clone(), e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            return Err(ClientError::Exit {
                status: output.status,
                output: format!("{}{}", stdout, String::from_utf8_lossy(&output.stderr)),
            });
        }

        parse_resolver_output(&stdout)
    }
}

pub(crate) fn parse_resolver_output(stdout: &str) -> Result<Vec<String>, ClientError> {
    let trimmed = stdout.trim();
    serde_json::from_str(trimmed).map_err(|e| ClientError::Malformed {
        source: e,
        output: trimmed.to_string(),
    })
}

/// Strips the configured URL prefixes from a client asset path, e.g.
/// `/_next/static/chunks/a.js` becomes `static/chunks/a.js`.
pub fn normalize_client_path(path: &str, prefixes: &[String]) -> String {
    let mut path = path;
    for prefix in prefixes {
        path = path.strip_prefix(prefix.as_str()).unwrap_or(path);
    }
    path.to_string()
}

/// Rewrites the JSON object embedded in a client-reference manifest script so
/// that asset URLs under `/_next/static/` become relative `static/` paths.
///
/// Only the first occurrence inside each string value is replaced. Returns
/// `None` when the content does not look like `<lhs> = { ... }` or the object
/// is not valid JSON.
pub fn patch_client_manifest(content: &str) -> Option<String> {
    let assignment = content.find('=')?;
    let start = assignment + content[assignment..].find('{')?;
    let end = content.rfind('}')?;

    if end <= start {
        return None;
    }

    let value: Value = serde_json::from_str(&content[start..=end]).ok()?;
    let json = serde_json::to_string(&rewrite_static(value)).ok()?;

    Some(format!("{}{}{}", &content[..start], json, &content[end + 1..]))
}

fn rewrite_static(value: Value) -> Value {
    const STATIC_PREFIX: &str = "/_next/static/";

    match value {
        Value::String(s) => Value::String(s.replacen(STATIC_PREFIX, "static/", 1)),
        Value::Array(items) => Value::Array(items.into_iter().map(rewrite_static).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, rewrite_static(value)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_output() {
        let chunks = parse_resolver_output("  [\"static/chunks/a.js\",\"static/css/b.css\"]\n").unwrap();
        assert_eq!(chunks, vec!["static/chunks/a.js", "static/css/b.css"]);

        assert!(matches!(
            parse_resolver_output("No manifest entry found"),
            Err(ClientError::Malformed { .. })
        ));
    }

    #[test]
    fn test_normalize_client_path() {
        let prefixes = vec!["/".to_string(), "_next/".to_string()];
        assert_eq!(
            normalize_client_path("/_next/static/chunks/a.js", &prefixes),
            "static/chunks/a.js"
        );
        assert_eq!(
            normalize_client_path("static/chunks/a.js", &prefixes),
            "static/chunks/a.js"
        );
        assert_eq!(
            normalize_client_path("_next/static/x.css", &prefixes),
            "static/x.css"
        );
    }

    #[test]
    fn test_patch_nested() {
        let input = r#"module.exports = {"a": {"b": ["/_next/static/test.js", "/other/x.js"]}}"#;
        assert_eq!(
            patch_client_manifest(input).unwrap(),
            r#"module.exports = {"a":{"b":["static/test.js","/other/x.js"]}}"#
        );
    }

    #[test]
    fn test_patch_first_occurrence_only() {
        let input = r#"module.exports = {"files": "/_next/static/a.js,/_next/static/b.js"}"#;
        assert_eq!(
            patch_client_manifest(input).unwrap(),
            r#"module.exports = {"files":"static/a.js,/_next/static/b.js"}"#
        );
    }

    #[test]
    fn test_patch_keeps_surroundings_and_order() {
        let input = "// head\nglobalThis.__RSC_MANIFEST[\"/page\"] = {\"z\": \"/_next/static/z.js\", \"a\": 1};\n// tail";
        let output = patch_client_manifest(input).unwrap();
        assert_eq!(
            output,
            "// head\nglobalThis.__RSC_MANIFEST[\"/page\"] = {\"z\":\"static/z.js\",\"a\":1};\n// tail"
        );
    }

    #[test]
    fn test_patch_rejects_unknown_shapes() {
        assert_eq!(patch_client_manifest("just some text"), None);
        assert_eq!(patch_client_manifest("module.exports = no json here"), None);
        assert_eq!(patch_client_manifest("module.exports = {invalid json}"), None);
        assert_eq!(
            patch_client_manifest("module.exports = {}").as_deref(),
            Some("module.exports = {}")
        );
    }
}
