//! Output file of generated queries.

use crate::error::{SynthError, SynthResult};
use crate::generator::GeneratedQueries;
use crate::spec::SpecSet;
use crate::spec::codec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One row: a specification and every query generated from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRow {
    /// Canonical JSON of the specification.
    #[serde(rename = "Specification")]
    pub specification: String,
    /// Generated queries, one per line.
    #[serde(rename = "Partial Query")]
    pub queries: String,
}

/// Output rows of a run and the specifications that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Synthesis {
    pub rows: Vec<OutputRow>,
    /// Specification key to error message.
    pub failed: BTreeMap<String, String>,
}

/// Rows for every specification that produced at least one query, in key order.
pub fn rows(specs: &SpecSet, generated: &GeneratedQueries) -> Vec<OutputRow> {
    generated
        .queries
        .iter()
        .filter_map(|(key, queries)| {
            let spec = specs.specs.get(key)?;
            Some(OutputRow {
                specification: codec::canonical_json(&codec::query_spec_to_value(spec)),
                queries: queries.join("\n"),
            })
        })
        .collect()
}

pub fn to_json(rows: &[OutputRow]) -> SynthResult<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}

pub fn write(path: impl AsRef<Path>, rows: &[OutputRow]) -> SynthResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, to_json(rows)?)
        .map_err(|e| SynthError::Config(format!("cannot write {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Specification;

    #[test]
    fn test_rows_follow_generated_keys() {
        let mut specs = SpecSet::new("db");
        specs.insert(Specification::default().into());
        let key = specs.specs.keys().next().cloned().unwrap();
        let mut queries = BTreeMap::new();
        queries.insert(key, vec!["SELECT a FROM t".to_string(), "SELECT b FROM t".to_string()]);
        queries.insert("unknown".to_string(), vec!["SELECT 1".to_string()]);
        let generated = GeneratedQueries {
            db_id: "db".into(),
            queries,
            ..GeneratedQueries::default()
        };

        let rows = rows(&specs, &generated);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].queries, "SELECT a FROM t\nSELECT b FROM t");
        assert!(rows[0].specification.starts_with('{'));

        let json = to_json(&rows).unwrap();
        assert!(json.contains("\"Partial Query\""));
        let back: Vec<OutputRow> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rows);
    }
}
