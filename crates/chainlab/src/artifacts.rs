//! Compiled-contract artifacts produced by the external compiler.
//!
//! This crate only reads the object directory; producing it is the
//! compiler's job.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SetupError};

/// One compiled contract: its ABI plus deployable bytecode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractArtifact {
    pub abi: serde_json::Value,
    #[serde(rename = "bin")]
    pub bytecode: String,
}

/// Contract name to artifact mapping for one object directory
#[derive(Debug, Default)]
pub struct ArtifactSet {
    contracts: BTreeMap<String, ContractArtifact>,
}

impl ArtifactSet {
    /// Load every `*.json` artifact in `dir`, keyed by file stem. A missing
    /// directory yields an empty set (the project may not be compiled yet);
    /// a malformed file is an error.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut set = ArtifactSet::default();
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "object directory missing, no artifacts loaded");
            return Ok(set);
        }
        for entry in dir.read_dir()? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let name = match path.file_stem().and_then(|s| s.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let file = File::open(&path)?;
            let artifact: ContractArtifact =
                serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                    SetupError::BadArtifact { path: path.clone(), reason: e.to_string() }
                })?;
            set.contracts.insert(name, artifact);
        }
        tracing::debug!(dir = %dir.display(), count = set.contracts.len(), "loaded contract artifacts");
        Ok(set)
    }

    pub fn get(&self, name: &str) -> Option<&ContractArtifact> {
        self.contracts.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.contracts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_artifacts_by_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Token.json"),
            r#"{"abi": [{"type": "constructor", "inputs": []}], "bin": "0x6080"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let set = ArtifactSet::load_dir(dir.path()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("Token").unwrap().bytecode, "0x6080");
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["Token"]);
    }

    #[test]
    fn missing_dir_is_empty_not_an_error() {
        let set = ArtifactSet::load_dir(Path::new("/nonexistent/build/contracts")).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn malformed_artifact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Broken.json"), "{not json").unwrap();
        let err = ArtifactSet::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, SetupError::BadArtifact { .. }));
    }
}
