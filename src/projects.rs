use crate::config;
use crate::models::RawRecord;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Static mapping from repository keys to logical project names, grouped by
/// data source. Loaded once and read-only afterwards.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectMap {
    #[serde(flatten)]
    sources: HashMap<String, HashMap<String, String>>,
}

impl ProjectMap {
    /// Loads `{"its": {"<repo-key>": "<project>", ...}, ...}` from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read project map: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid project map: {}", path.display()))
    }

    /// Resolves a record to its project name. The repository key is the
    /// origin's buglist URL for the record's product. Misses are expected
    /// and yield `None`.
    pub fn resolve(&self, record: &RawRecord) -> Option<&str> {
        let product = record.data.get("product")?.text()?;
        let key = format!("{}/buglist.cgi?product={}", record.origin, product);
        self.sources
            .get(config::PROJECT_SOURCE)?
            .get(&key)
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(origin: &str, product: Option<&str>) -> RawRecord {
        let mut data = json!({});
        if let Some(p) = product {
            data = json!({"product": [{"__text__": p}]});
        }
        serde_json::from_value(json!({
            "uuid": "u1",
            "origin": origin,
            "data": data
        }))
        .unwrap()
    }

    fn sample_map() -> ProjectMap {
        serde_json::from_value(json!({
            "its": {
                "https://bugs.example.com/buglist.cgi?product=Foo": "foo-platform"
            }
        }))
        .unwrap()
    }

    #[test]
    fn resolves_known_product() {
        let map = sample_map();
        let rec = record("https://bugs.example.com", Some("Foo"));
        assert_eq!(map.resolve(&rec), Some("foo-platform"));
    }

    #[test]
    fn unknown_product_is_a_silent_miss() {
        let map = sample_map();
        let rec = record("https://bugs.example.com", Some("Bar"));
        assert_eq!(map.resolve(&rec), None);
    }

    #[test]
    fn missing_product_field_is_a_silent_miss() {
        let map = sample_map();
        let rec = record("https://bugs.example.com", None);
        assert_eq!(map.resolve(&rec), None);
    }

    #[test]
    fn missing_source_section_is_a_silent_miss() {
        let map: ProjectMap =
            serde_json::from_value(json!({"scm": {"irrelevant": "x"}})).unwrap();
        let rec = record("https://bugs.example.com", Some("Foo"));
        assert_eq!(map.resolve(&rec), None);
    }

    #[test]
    fn load_rejects_bad_json() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "not json").unwrap();
        let result = ProjectMap::load(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn load_reads_map_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"{"its": {"https://bugs.example.com/buglist.cgi?product=Foo": "foo-platform"}}"#,
        )
        .unwrap();
        let map = ProjectMap::load(file.path()).unwrap();
        let rec = record("https://bugs.example.com", Some("Foo"));
        assert_eq!(map.resolve(&rec), Some("foo-platform"));
    }
}
