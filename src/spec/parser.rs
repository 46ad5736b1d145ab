//! Manifest Parser
//!
//! Loads a subject's pipeline manifest from a YAML file: the subject name
//! plus one spec list per operation. Parsing is strict about structure but
//! says nothing about step names; unknown names surface later, at
//! resolution time, as skipped entries.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::model::{ScopeTag, Spec};
use crate::error::EngineError;
use crate::registry::Registry;

/// A subject's operation pipelines, as declared in one manifest file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Resource/model name; the first half of every control-state key.
    pub subject: String,
    /// Operation name to declared spec list.
    #[serde(default)]
    pub operations: BTreeMap<String, Vec<Spec>>,
}

impl Manifest {
    /// The spec list declared for `operation`, if any.
    pub fn operation(&self, operation: &str) -> Option<&[Spec]> {
        self.operations.get(operation).map(Vec::as_slice)
    }

    /// Walks every spec list (children included) and reports entries the
    /// registry cannot serve under the given scope. Diagnostics only; the
    /// resolver skips these at execution time.
    pub async fn unresolvable(&self, registry: &Arc<Registry>, scope: ScopeTag) -> Vec<String> {
        registry.ensure_builtins().await;

        let mut missing = Vec::new();
        for specs in self.operations.values() {
            collect_unresolvable(registry, specs, scope, &mut missing).await;
        }
        missing.sort();
        missing.dedup();
        missing
    }
}

async fn collect_unresolvable(
    registry: &Arc<Registry>,
    specs: &[Spec],
    scope: ScopeTag,
    missing: &mut Vec<String>,
) {
    for spec in specs {
        if registry.resolve(spec.name(), scope).await.is_none() {
            missing.push(spec.name().to_string());
        }
        // Children only ever run privileged.
        for child in spec.children() {
            if registry.resolve(child.name(), ScopeTag::Privileged).await.is_none() {
                missing.push(child.name().to_string());
            }
        }
    }
}

/// Loads a manifest from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use pipewise::spec::load_manifest;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manifest = load_manifest("article.yaml")?;
///     println!("{} operation(s)", manifest.operations.len());
///     Ok(())
/// }
/// ```
pub fn load_manifest(path: impl AsRef<Path>) -> Result<Manifest, EngineError> {
    let path = path.as_ref();
    info!("Loading manifest from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        EngineError::Manifest(format!(
            "failed to read '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        ))
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let manifest: Manifest = serde_yaml::from_str(&yaml_content).map_err(|e| {
        EngineError::Manifest(format!(
            "failed to parse '{}': {}. Check the file format.",
            path.display(),
            e
        ))
    })?;

    if manifest.subject.is_empty() {
        return Err(EngineError::Manifest(format!(
            "'{}' declares an empty subject",
            path.display()
        )));
    }

    info!(
        "Parsed manifest for '{}' with {} operation(s)",
        manifest.subject,
        manifest.operations.len()
    );

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_manifest(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.yaml");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_manifest_valid_yaml() {
        let (_dir, path) = write_manifest(
            r#"
subject: article
operations:
  save:
    - validate
    - name: throttle
      args: { wait_ms: 200 }
  fetch:
    - name: get_request
      children:
        - load_record
"#,
        );

        let manifest = load_manifest(&path).unwrap();
        assert_eq!(manifest.subject, "article");
        assert_eq!(manifest.operations.len(), 2);

        let save = manifest.operation("save").unwrap();
        assert_eq!(save.len(), 2);
        assert_eq!(save[0], Spec::bare("validate"));

        let fetch = manifest.operation("fetch").unwrap();
        assert_eq!(fetch[0].children().len(), 1);
    }

    #[test]
    fn test_load_manifest_file_not_found() {
        let err = load_manifest("/nonexistent/manifest.yaml").unwrap_err();
        assert!(matches!(err, EngineError::Manifest(_)));
    }

    #[test]
    fn test_load_manifest_invalid_yaml() {
        let (_dir, path) = write_manifest("subject: [[[ not yaml");
        let err = load_manifest(&path).unwrap_err();
        assert!(matches!(err, EngineError::Manifest(_)));
    }

    #[test]
    fn test_load_manifest_empty_subject_rejected() {
        let (_dir, path) = write_manifest("subject: \"\"\noperations: {}\n");
        let err = load_manifest(&path).unwrap_err();
        assert!(err.to_string().contains("empty subject"));
    }

    #[test]
    fn test_operation_lookup_missing() {
        let (_dir, path) = write_manifest("subject: article\n");
        let manifest = load_manifest(&path).unwrap();
        assert!(manifest.operation("save").is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_reports_unknown_names() {
        let (_dir, path) = write_manifest(
            r#"
subject: article
operations:
  save:
    - throttle
    - mystery_step
  fetch:
    - name: get_request
      children:
        - another_mystery
"#,
        );
        let manifest = load_manifest(&path).unwrap();
        let registry = Arc::new(Registry::new());

        let missing = manifest.unresolvable(&registry, ScopeTag::Restricted).await;

        // Builtins resolve, user steps that were never registered do not.
        assert_eq!(
            missing,
            vec![
                "another_mystery".to_string(),
                "get_request".to_string(),
                "mystery_step".to_string()
            ]
        );
    }
}
