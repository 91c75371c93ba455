//! Persisted intermediate state.
//!
//! Each stage materializes its full output before the next stage starts:
//! whole-document JSON stores for paragraph and entity collections, and an
//! append-only JSON Lines store for relations so a long run can be
//! inspected or resumed after the last completed batch. A store is
//! truncated exactly once at stage entry and opened in append mode per
//! batch-flush; there is never more than one writer.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{PipelineError, Result};

/// Well-known store locations under the pipeline output directory.
#[derive(Debug, Clone)]
pub struct StagePaths {
    out_dir: PathBuf,
}

impl StagePaths {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn pages(&self) -> PathBuf {
        self.out_dir.join("structured_text.json")
    }

    pub fn cleaned_paragraphs(&self) -> PathBuf {
        self.out_dir.join("cleaned_paragraphs.json")
    }

    pub fn entities(&self) -> PathBuf {
        self.out_dir.join("entities.json")
    }

    pub fn relations(&self) -> PathBuf {
        self.out_dir.join("relations.jsonl")
    }

    pub fn normalization_map(&self) -> PathBuf {
        self.out_dir.join("normalization_map.json")
    }

    pub fn normalized_entities(&self) -> PathBuf {
        self.out_dir.join("normalized_entities.json")
    }

    pub fn normalized_relations(&self) -> PathBuf {
        self.out_dir.join("normalized_relations.jsonl")
    }

    pub fn nodes_csv(&self) -> PathBuf {
        self.out_dir.join("nodes.csv")
    }

    pub fn edges_csv(&self) -> PathBuf {
        self.out_dir.join("edges.csv")
    }

    pub fn normalization_nodes_csv(&self) -> PathBuf {
        self.out_dir.join("normalization_nodes.csv")
    }

    pub fn normalization_edges_csv(&self) -> PathBuf {
        self.out_dir.join("normalization_edges.csv")
    }
}

fn io_err(path: &Path, source: std::io::Error) -> PipelineError {
    PipelineError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Load a whole-document JSON store.
///
/// A missing file maps to `MissingInput`: the prior stage never ran, which
/// is fatal to the current stage before any batch processing begins.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PipelineError::MissingInput(path.to_path_buf())
        } else {
            io_err(path, e)
        }
    })?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Write a whole-document JSON store, creating parent directories.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let file = File::create(path).map_err(|e| io_err(path, e))?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

/// Append-only JSON Lines store, one record per line.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    /// Truncate (or create) the store. Called exactly once at stage entry.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        File::create(&path).map_err(|e| io_err(&path, e))?;
        Ok(Self { path })
    }

    /// Flush one batch of records to the end of the store.
    pub fn append<T: Serialize>(&self, records: &[T]) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err(&self.path, e))?;
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{line}").map_err(|e| io_err(&self.path, e))?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Load a full JSON Lines store into memory, in write order.
pub fn load_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PipelineError::MissingInput(path.to_path_buf())
        } else {
            io_err(path, e)
        }
    })?;

    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| io_err(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Relation;

    fn relation(source: &str, target: &str) -> Relation {
        Relation {
            source: source.into(),
            target: target.into(),
            relation: "is_associated_with".into(),
            source_pages: [1].into_iter().collect(),
        }
    }

    #[test]
    fn json_store_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/entities.json");

        save_json(&path, &vec![relation("a", "b")]).unwrap();
        let loaded: Vec<Relation> = load_json(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].source, "a");
    }

    #[test]
    fn missing_store_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_json::<Vec<Relation>>(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
    }

    #[test]
    fn jsonl_create_truncates_once_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relations.jsonl");

        let store = JsonlStore::create(&path).unwrap();
        store.append(&[relation("a", "b")]).unwrap();
        store.append(&[relation("c", "d"), relation("e", "f")]).unwrap();

        let loaded: Vec<Relation> = load_jsonl(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[2].source, "e");

        // Re-creating the store starts the stage over
        let store = JsonlStore::create(&path).unwrap();
        store.append(&[relation("x", "y")]).unwrap();
        let loaded: Vec<Relation> = load_jsonl(&path).unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
