use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::runtime::watcher;
use kube::Client;
use tokio_util::sync::CancellationToken;

use zen_common::SourceConfig;

use crate::crd::SourceConfig as SourceConfigResource;
use crate::ConfigStoreError;

pub async fn list_all(client: &Client, namespace: &str) -> Result<Vec<SourceConfig>, ConfigStoreError> {
    let api: Api<SourceConfigResource> = Api::namespaced(client.clone(), namespace);
    let list = api
        .list(&ListParams::default())
        .await
        .map_err(|e| ConfigStoreError::Io(e.to_string()))?;

    let mut sources = Vec::with_capacity(list.items.len());
    for item in list.items {
        let name = item.metadata.name.clone().unwrap_or_default();
        let source = item.into_source_config(name);
        source
            .validate()
            .map_err(|e| ConfigStoreError::Invalid(format!("{}: {e}", source.name)))?;
        sources.push(source);
    }
    Ok(sources)
}

/// Watch `SourceConfig` custom resources in `namespace` via
/// `kube::runtime::watcher` and re-list on every event, mirroring the
/// file-set backend's reread-the-whole-set-on-any-change behavior so both
/// backends give the Pipeline Processor the same consistency guarantee.
pub async fn watch<F>(
    client: &Client,
    namespace: &str,
    cancel: CancellationToken,
    mut on_change: F,
) -> Result<(), ConfigStoreError>
where
    F: FnMut(Vec<SourceConfig>) -> Result<(), ConfigStoreError>,
{
    let api: Api<SourceConfigResource> = Api::namespaced(client.clone(), namespace);
    let mut stream = Box::pin(watcher(api, watcher::Config::default()).boxed());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = stream.next() => {
                match event {
                    None => return Ok(()),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "sourceconfig watch stream error, continuing");
                    }
                    Some(Ok(_)) => {
                        match list_all(client, namespace).await {
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
    }
}
