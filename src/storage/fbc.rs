//! # File-Based Catalogs
//!
//! Walks a tree for file-based catalog documents. `.json` files hold a
//! stream of JSON objects; `.yaml`/`.yml` files hold one or more YAML
//! documents. Other files are ignored.

use crate::fs::ReadOnlyFs;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// Call `visit` with every catalog document in `fs`, in path order
pub fn walk_documents(
    fs: &dyn ReadOnlyFs,
    mut visit: impl FnMut(&str, Value) -> Result<()>,
) -> Result<()> {
    for path in fs.files()? {
        let extension = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("json") => {
                let data = fs.read_file(&path)?;
                for document in serde_json::Deserializer::from_slice(&data).into_iter::<Value>() {
                    let document = document.with_context(|| format!("parsing {path}"))?;
                    visit(&path, ensure_object(&path, document)?)?;
                }
            }
            Some("yaml" | "yml") => {
                let data = fs.read_file(&path)?;
                for document in serde_yaml::Deserializer::from_slice(&data) {
                    let document =
                        Value::deserialize(document).with_context(|| format!("parsing {path}"))?;
                    // Empty documents between separators
                    if document.is_null() {
                        continue;
                    }
                    visit(&path, ensure_object(&path, document)?)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn ensure_object(path: &str, document: Value) -> Result<Value> {
    if !document.is_object() {
        bail!("{path}: catalog documents must be objects");
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;

    #[test]
    fn test_walks_json_streams_and_yaml_documents() {
        let fs = MemoryFs::new()
            .with_file(
                "foo/catalog.json",
                r#"{"schema":"olm.package","name":"foo"}
{"schema":"olm.channel","name":"stable","package":"foo"}"#,
            )
            .with_file(
                "bar/catalog.yaml",
                "---\nschema: olm.package\nname: bar\n---\n---\nschema: olm.bundle\nname: bar.v1\n",
            )
            .with_file("README.md", "# not a catalog");

        let mut seen = Vec::new();
        walk_documents(&fs, |path, doc| {
            seen.push((path.to_string(), doc["name"].as_str().unwrap().to_string()));
            Ok(())
        })
        .unwrap();

        assert_eq!(
            seen,
            vec![
                ("bar/catalog.yaml".to_string(), "bar".to_string()),
                ("bar/catalog.yaml".to_string(), "bar.v1".to_string()),
                ("foo/catalog.json".to_string(), "foo".to_string()),
                ("foo/catalog.json".to_string(), "stable".to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let fs = MemoryFs::new().with_file("catalog.json", "{not json");
        assert!(walk_documents(&fs, |_, _| Ok(())).is_err());
    }

    #[test]
    fn test_non_object_document_is_an_error() {
        let fs = MemoryFs::new().with_file("catalog.json", "[1, 2]");
        assert!(walk_documents(&fs, |_, _| Ok(())).is_err());
    }
}
