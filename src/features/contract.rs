//! Feature-column contract and the guard that enforces it

use crate::error::{ScoringError, ScoringResult};
use crate::features::row::{EngineeredFeatureRow, ENGINEERED_COLUMNS};
use crate::models::loader::read_json;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Supported version of the feature-list file format.
pub const FEATURE_LIST_VERSION: u32 = 1;

/// On-disk shape shared by the contract and the per-model feature lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureList {
    pub features: Vec<String>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    FEATURE_LIST_VERSION
}

impl FeatureList {
    pub fn new(features: Vec<String>) -> Self {
        Self {
            features,
            version: FEATURE_LIST_VERSION,
        }
    }
}

/// Read `{"features": [..], "version": n}` and check its shape.
pub fn read_feature_list(path: &Path) -> ScoringResult<Vec<String>> {
    let list: FeatureList = read_json(path)?;

    if list.version != FEATURE_LIST_VERSION {
        return Err(ScoringError::schema(
            path,
            format!("unsupported feature list version {}", list.version),
        ));
    }
    if list.features.is_empty() {
        return Err(ScoringError::schema(path, "feature list is empty"));
    }
    let mut seen = HashSet::with_capacity(list.features.len());
    for name in &list.features {
        if !seen.insert(name.as_str()) {
            return Err(ScoringError::schema(
                path,
                format!("duplicate feature name '{name}'"),
            ));
        }
    }

    Ok(list.features)
}

/// Ordered engineered column names frozen at training time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureColumnContract {
    columns: Vec<String>,
    index: HashSet<String>,
}

impl FeatureColumnContract {
    pub fn new(columns: Vec<String>) -> Self {
        let index = columns.iter().cloned().collect();
        Self { columns, index }
    }

    /// The contract fit mode writes: the full engineered schema.
    pub fn engineered() -> Self {
        Self::new(ENGINEERED_COLUMNS.iter().map(|c| c.to_string()).collect())
    }

    pub fn load(path: &Path) -> ScoringResult<Self> {
        let contract = Self::new(read_feature_list(path)?);
        info!(path = %path.display(), columns = contract.len(), "Loaded feature contract");
        Ok(contract)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains(name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Names from `names` the contract does not carry.
    pub fn unknown<'a, S: AsRef<str>>(&self, names: &'a [S]) -> Vec<&'a str> {
        names
            .iter()
            .map(|n| n.as_ref())
            .filter(|n| !self.contains(n))
            .collect()
    }

    /// Reject `row` unless its column set equals the contract, then reorder it
    /// into contract order.
    pub fn enforce(&self, row: EngineeredFeatureRow) -> ScoringResult<EngineeredFeatureRow> {
        let mut missing: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !row.contains(c))
            .cloned()
            .collect();
        let mut extra: Vec<String> = row
            .columns()
            .iter()
            .filter(|c| !self.contains(c))
            .cloned()
            .collect();

        if !missing.is_empty() || !extra.is_empty() {
            missing.sort();
            extra.sort();
            warn!(?missing, ?extra, "Feature contract violated");
            return Err(ScoringError::ContractViolation { missing, extra });
        }

        let mut ordered = EngineeredFeatureRow::with_capacity(self.columns.len());
        for name in &self.columns {
            if let Some(value) = row.get(name) {
                ordered.insert(name.as_str(), value);
            }
        }
        Ok(ordered)
    }
}

/// Guard entry point: `enforce(row, expected_columns)`.
pub fn enforce(
    row: EngineeredFeatureRow,
    expected: &FeatureColumnContract,
) -> ScoringResult<EngineeredFeatureRow> {
    expected.enforce(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn row_of(names: &[&str]) -> EngineeredFeatureRow {
        let mut row = EngineeredFeatureRow::new();
        for (i, name) in names.iter().enumerate() {
            row.insert(*name, i as f64);
        }
        row
    }

    #[test]
    fn test_matching_row_is_reordered() {
        let contract = FeatureColumnContract::new(vec!["a".into(), "b".into(), "c".into()]);
        let row = enforce(row_of(&["c", "a", "b"]), &contract).unwrap();

        assert_eq!(row.columns(), contract.columns());
        assert_eq!(row.get("c"), Some(0.0));
    }

    #[test]
    fn test_reports_exactly_one_missing_column() {
        let contract = FeatureColumnContract::engineered();
        let names: Vec<&str> = ENGINEERED_COLUMNS
            .iter()
            .copied()
            .filter(|c| *c != "last_5_count")
            .collect();

        match contract.enforce(row_of(&names)) {
            Err(ScoringError::ContractViolation { missing, extra }) => {
                assert_eq!(missing, vec!["last_5_count".to_string()]);
                assert!(extra.is_empty());
            }
            other => panic!("expected ContractViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_reports_exactly_one_extra_column() {
        let contract = FeatureColumnContract::engineered();
        let mut names: Vec<&str> = ENGINEERED_COLUMNS.to_vec();
        names.push("debug_score");

        match contract.enforce(row_of(&names)) {
            Err(ScoringError::ContractViolation { missing, extra }) => {
                assert!(missing.is_empty());
                assert_eq!(extra, vec!["debug_score".to_string()]);
            }
            other => panic!("expected ContractViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_read_feature_list_validates_shape() {
        let dir = tempfile::tempdir().unwrap();

        let ok = dir.path().join("ok.json");
        fs::write(&ok, r#"{"features": ["V14", "V4"]}"#).unwrap();
        assert_eq!(read_feature_list(&ok).unwrap(), vec!["V14", "V4"]);

        let wrong_shape = dir.path().join("wrong.json");
        fs::write(&wrong_shape, r#"{"columns": ["V14"]}"#).unwrap();
        assert!(matches!(
            read_feature_list(&wrong_shape),
            Err(ScoringError::ArtifactSchemaError { .. })
        ));

        let dupes = dir.path().join("dupes.json");
        fs::write(&dupes, r#"{"features": ["V14", "V14"]}"#).unwrap();
        assert!(matches!(
            read_feature_list(&dupes),
            Err(ScoringError::ArtifactSchemaError { .. })
        ));

        let future = dir.path().join("future.json");
        fs::write(&future, r#"{"features": ["V14"], "version": 2}"#).unwrap();
        assert!(matches!(
            read_feature_list(&future),
            Err(ScoringError::ArtifactSchemaError { .. })
        ));

        assert!(matches!(
            read_feature_list(&dir.path().join("absent.json")),
            Err(ScoringError::ArtifactNotFound { .. })
        ));
    }

    #[test]
    fn test_unknown_names() {
        let contract = FeatureColumnContract::new(vec!["a".into(), "b".into()]);
        assert_eq!(contract.unknown(&["a", "z"]), vec!["z"]);
    }
}
