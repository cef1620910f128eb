use std::path::{Path, PathBuf};

use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use zen_common::SourceConfig;

use crate::ConfigStoreError;

/// Load every `*.yaml`/`*.yml` document under `dir`, each containing one
/// `SourceConfig`, and validate all of them before returning any. A single
/// malformed file fails the whole load — partial config is worse than no
/// config at startup.
pub async fn load_dir(dir: &Path) -> Result<Vec<SourceConfig>, ConfigStoreError> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || load_dir_blocking(&dir))
        .await
        .map_err(|e| ConfigStoreError::Io(e.to_string()))?
}

fn load_dir_blocking(dir: &Path) -> Result<Vec<SourceConfig>, ConfigStoreError> {
    let mut sources = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| ConfigStoreError::Io(format!("{}: {e}", dir.display())))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")))
        .collect();
    paths.sort();

    for path in paths {
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| ConfigStoreError::Io(format!("{}: {e}", path.display())))?;
        let source: SourceConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ConfigStoreError::Parse(format!("{}: {e}", path.display())))?;
        source
            .validate()
            .map_err(|e| ConfigStoreError::Invalid(format!("{}: {e}", path.display())))?;
        sources.push(source);
    }
    Ok(sources)
}

/// Watch `dir` for create/modify/remove events via `notify` and invoke
/// `on_change` with the freshly re-read set on every debounced batch.
/// Runs until `cancel` fires.
pub async fn watch<F>(
    dir: &Path,
    cancel: CancellationToken,
    mut on_change: F,
) -> Result<(), ConfigStoreError>
where
    F: FnMut(Vec<SourceConfig>) -> Result<(), ConfigStoreError>,
{
    let (tx, mut rx) = mpsc::channel(16);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            let _ = tx.blocking_send(event);
        }
    })
    .map_err(|e| ConfigStoreError::Io(e.to_string()))?;
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| ConfigStoreError::Io(e.to_string()))?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = rx.recv() => {
                if event.is_none() {
                    return Ok(());
                }
                match load_dir(dir).await {
                    Ok(sources) => {
                        if let Err(e) = on_change(sources) {
                            tracing::warn!(error = %e, "rejected config reload, keeping prior snapshot");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "config reload failed, keeping prior snapshot");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_source(dir: &Path, name: &str, yaml: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
    }

    const VALID_YAML: &str = r#"
name: scanner-a
binding:
  adapter_kind: webhook
  path: /hooks/a
dedup:
  window_seconds: 60
  key_fields: [summary]
  max_entries: 1000
normalization:
  domain: vulnerability
  type: cve-finding
  field_map: {}
  severity_map: {}
  priority_map: {}
retention:
  max_age_seconds: 3600
  max_per_source: 1000
"#;

    #[tokio::test]
    async fn loads_every_yaml_document_in_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "a.yaml", VALID_YAML);
        let sources = load_dir(dir.path()).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "scanner-a");
    }

    #[tokio::test]
    async fn a_malformed_document_fails_the_whole_load() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "a.yaml", VALID_YAML);
        write_source(dir.path(), "b.yaml", "not: [valid");
        let err = load_dir(dir.path()).await.unwrap_err();
        assert!(matches!(err, ConfigStoreError::Parse(_)));
    }

    #[tokio::test]
    async fn non_yaml_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "a.yaml", VALID_YAML);
        write_source(dir.path(), "README.md", "not config");
        let sources = load_dir(dir.path()).await.unwrap();
        assert_eq!(sources.len(), 1);
    }
}
