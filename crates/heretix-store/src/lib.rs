//! Artifact store abstraction: where run records and intermediate blocks get
//! written.
//!
//! Mirrors `xchecker-utils`'s canonicalization pattern (`emit_jcs`, RFC 8785
//! JSON Canonicalization) so that two runs with identical inputs produce
//! byte-identical artifacts, plus a polymorphic backend so the HTTP server
//! can run with artifact persistence disabled without branching call sites.

use std::path::{Path, PathBuf};

use heretix_types::RunRecord;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to canonicalize artifact: {0}")]
    Canonicalize(#[source] serde_json_canonicalizer::CanonicalJSONError),
    #[error("failed to write artifact at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Canonicalizes `value` to RFC 8785 JCS bytes.
pub fn emit_jcs<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json_canonicalizer::to_vec(value).map_err(StoreError::Canonicalize)
}

/// Where artifacts produced by a run (run records, intermediate blocks) get
/// persisted.
pub trait ArtifactStore: Send + Sync {
    fn write_text(&self, relative_path: &str, contents: &str) -> Result<(), StoreError>;
    fn write_bytes(&self, relative_path: &str, contents: &[u8]) -> Result<(), StoreError>;
    fn root(&self) -> Option<&Path>;

    fn write_run_record(&self, relative_path: &str, record: &RunRecord) -> Result<(), StoreError> {
        let bytes = emit_jcs(record)?;
        self.write_bytes(relative_path, &bytes)
    }
}

/// Writes artifacts under a directory on the local filesystem, creating
/// parent directories as needed and writing via a temp-file-then-rename for
/// crash safety.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn write_text(&self, relative_path: &str, contents: &str) -> Result<(), StoreError> {
        self.write_bytes(relative_path, contents.as_bytes())
    }

    fn write_bytes(&self, relative_path: &str, contents: &[u8]) -> Result<(), StoreError> {
        let path = self.root.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Write { path: path.clone(), source: e })?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, contents).map_err(|e| StoreError::Write { path: path.clone(), source: e })?;
        std::fs::rename(&tmp, &path).map_err(|e| StoreError::Write { path: path.clone(), source: e })?;
        tracing::debug!(path = %path.display(), bytes = contents.len(), "wrote artifact");
        Ok(())
    }

    fn root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

/// Discards every write. Used when artifact persistence is turned off (e.g.
/// the HTTP server handling a burst of ephemeral requests).
pub struct DisabledArtifactStore;

impl ArtifactStore for DisabledArtifactStore {
    fn write_text(&self, _relative_path: &str, _contents: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn write_bytes(&self, _relative_path: &str, _contents: &[u8]) -> Result<(), StoreError> {
        Ok(())
    }

    fn root(&self) -> Option<&Path> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_store_round_trips_text() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        store.write_text("nested/note.txt", "hello").unwrap();
        let read = std::fs::read_to_string(dir.path().join("nested/note.txt")).unwrap();
        assert_eq!(read, "hello");
    }

    #[test]
    fn disabled_store_is_a_no_op() {
        let store = DisabledArtifactStore;
        assert!(store.write_text("x", "y").is_ok());
        assert!(store.root().is_none());
    }

    #[test]
    fn jcs_output_is_deterministic_regardless_of_field_order() {
        #[derive(Serialize)]
        struct A {
            b: i32,
            a: i32,
        }
        #[derive(Serialize)]
        struct B {
            a: i32,
            b: i32,
        }
        let a = emit_jcs(&A { b: 2, a: 1 }).unwrap();
        let b = emit_jcs(&B { a: 1, b: 2 }).unwrap();
        assert_eq!(a, b);
    }
}
