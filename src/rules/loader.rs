// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Rule Store
 * Loads YAML fingerprints from files, directories or the embedded
 * library and publishes immutable snapshots to concurrent readers
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::errors::ScannerError;
use crate::rules::model::Fingerprint;

/// Fingerprints compiled into the binary; used when no explicit rule
/// input is given.
const BUILTIN_RULES: &[(&str, &str)] = &[
    ("nginx.yaml", include_str!("builtin/nginx.yaml")),
    ("apache-httpd.yaml", include_str!("builtin/apache-httpd.yaml")),
    ("microsoft-iis.yaml", include_str!("builtin/microsoft-iis.yaml")),
    ("apache-tomcat.yaml", include_str!("builtin/apache-tomcat.yaml")),
    ("wordpress.yaml", include_str!("builtin/wordpress.yaml")),
    ("spring-boot.yaml", include_str!("builtin/spring-boot.yaml")),
    ("grafana.yaml", include_str!("builtin/grafana.yaml")),
    ("jenkins.yaml", include_str!("builtin/jenkins.yaml")),
];

/// Rule inputs, in precedence order: explicit files win over a directory,
/// which wins over the embedded library.
#[derive(Debug, Clone, Default)]
pub struct RuleInput {
    pub files: Vec<PathBuf>,
    pub dir: Option<PathBuf>,
}

type Snapshot = Arc<Vec<Arc<Fingerprint>>>;

/// Process-wide fingerprint store.
///
/// Loads swap the whole set atomically under a write lock; readers take a
/// cheap snapshot and never synchronise again while holding it.
pub struct RuleStore {
    fingers: RwLock<Snapshot>,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore {
    pub fn new() -> Self {
        Self {
            fingers: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Load fingerprints according to the input precedence and swap them
    /// in atomically.
    pub fn load(&self, input: &RuleInput) -> Result<usize, ScannerError> {
        let loaded = if !input.files.is_empty() {
            info!("loading {} fingerprint file(s)", input.files.len());
            Self::load_files(&input.files)?
        } else if let Some(dir) = &input.dir {
            info!("loading fingerprint directory {}", dir.display());
            Self::load_dir(dir)?
        } else {
            info!("using embedded fingerprint library");
            Self::load_embedded()?
        };

        let count = loaded.len();
        *self.fingers.write() = Arc::new(loaded);
        Ok(count)
    }

    /// Cheap immutable view for a scan run. Mutations during the scan do
    /// not affect a snapshot already taken.
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.fingers.read())
    }

    pub fn count(&self) -> usize {
        self.fingers.read().len()
    }

    fn load_files(files: &[PathBuf]) -> Result<Vec<Arc<Fingerprint>>, ScannerError> {
        let mut out = Vec::with_capacity(files.len());
        let single = files.len() == 1;
        for path in files {
            if !is_yaml_file(path) {
                return Err(ScannerError::RuleLoad(format!(
                    "{} is not a yaml file",
                    path.display()
                )));
            }
            match read_fingerprint(path) {
                Ok(fp) => out.push(Arc::new(fp)),
                Err(e) if single => return Err(e),
                Err(e) => warn!("skipping fingerprint file: {}", e),
            }
        }
        if out.is_empty() {
            return Err(ScannerError::RuleLoad(
                "no fingerprint file could be loaded".to_string(),
            ));
        }
        Ok(out)
    }

    fn load_dir(dir: &Path) -> Result<Vec<Arc<Fingerprint>>, ScannerError> {
        if !dir.is_dir() {
            return Err(ScannerError::RuleLoad(format!(
                "fingerprint directory {} does not exist",
                dir.display()
            )));
        }
        let mut files = Vec::new();
        walk_yaml_files(dir, &mut files)
            .map_err(|e| ScannerError::RuleLoad(format!("{}: {}", dir.display(), e)))?;
        files.sort();

        let mut out = Vec::with_capacity(files.len());
        for path in &files {
            match read_fingerprint(path) {
                Ok(fp) => out.push(Arc::new(fp)),
                Err(e) => warn!("skipping fingerprint file: {}", e),
            }
        }
        if out.is_empty() {
            return Err(ScannerError::RuleLoad(format!(
                "no fingerprints loaded from {}",
                dir.display()
            )));
        }
        Ok(out)
    }

    fn load_embedded() -> Result<Vec<Arc<Fingerprint>>, ScannerError> {
        let mut out = Vec::with_capacity(BUILTIN_RULES.len());
        for (name, source) in BUILTIN_RULES {
            match Fingerprint::parse(source, name) {
                Ok(fp) => out.push(Arc::new(fp)),
                // A broken embedded rule is a packaging defect; surface it
                // loudly but keep the rest of the library usable.
                Err(e) => warn!("embedded fingerprint {} rejected: {}", name, e),
            }
        }
        if out.is_empty() {
            return Err(ScannerError::RuleLoad(
                "embedded fingerprint library is empty".to_string(),
            ));
        }
        Ok(out)
    }
}

fn read_fingerprint(path: &Path) -> Result<Fingerprint, ScannerError> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| ScannerError::RuleLoad(format!("{}: {}", path.display(), e)))?;
    let fp = Fingerprint::parse(&source, &path.display().to_string())?;
    debug!("loaded fingerprint {} from {}", fp.id, path.display());
    Ok(fp)
}

fn is_yaml_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn walk_yaml_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_yaml_files(&path, out)?;
        } else if is_yaml_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_embedded_library_loads() {
        let store = RuleStore::new();
        let count = store.load(&RuleInput::default()).unwrap();
        assert!(count >= 8);
        assert_eq!(store.count(), count);
        let snap = store.snapshot();
        assert!(snap.iter().any(|f| f.id == "nginx"));
    }

    #[test]
    fn test_snapshot_survives_reload() {
        let store = RuleStore::new();
        store.load(&RuleInput::default()).unwrap();
        let snap = store.snapshot();
        let before = snap.len();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"id: one\nrules:\n  r0:\n    expression: 'true'\nexpression: r0()\n")
            .unwrap();
        store
            .load(&RuleInput {
                files: vec![path],
                dir: None,
            })
            .unwrap();

        // Old snapshot still sees the embedded set; new reads see the swap.
        assert_eq!(snap.len(), before);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_single_bad_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "rules: {}\n").unwrap();
        let store = RuleStore::new();
        let err = store
            .load(&RuleInput {
                files: vec![path],
                dir: None,
            })
            .unwrap_err();
        assert!(matches!(err, ScannerError::RuleLoad(_)));
    }

    #[test]
    fn test_bad_file_in_directory_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.yaml"), "id: broken\n").unwrap();
        std::fs::write(
            dir.path().join("good.yaml"),
            "id: good\nrules:\n  r0:\n    expression: 'true'\nexpression: r0()\n",
        )
        .unwrap();
        let store = RuleStore::new();
        let count = store
            .load(&RuleInput {
                files: vec![],
                dir: Some(dir.path().to_path_buf()),
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_non_yaml_explicit_file_rejected() {
        let store = RuleStore::new();
        let err = store
            .load(&RuleInput {
                files: vec![PathBuf::from("rules.txt")],
                dir: None,
            })
            .unwrap_err();
        assert!(err.to_string().contains("not a yaml file"));
    }
}
