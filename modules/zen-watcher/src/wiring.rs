//! Builds the per-source adapter + Pipeline Processor pair from a
//! `SourceConfig`'s `binding`, and spawns both as cooperative tasks.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use zen_adapters::log_tail::LogTailAdapter;
use zen_adapters::periodic_list::PeriodicListAdapter;
use zen_adapters::webhook::{self, WebhookState};
use zen_adapters::{Adapter, AdapterHealth, HealthState};
use zen_common::{AuthKind, Binding, Gvk, SourceConfig};
use zen_persist::Persistor;
use zen_pipeline::{CompiledSource, Processor};

use crate::secrets;

pub type ReadinessCheck = Box<dyn Fn() -> HealthState + Send + Sync>;

pub async fn spawn_source(
    source: &SourceConfig,
    client: &kube::Client,
    resolver: &zen_discovery::Resolver,
    namespace: &str,
    persistor: &Arc<Persistor>,
    cancel: &CancellationToken,
    handles: &mut Vec<JoinHandle<()>>,
    webhook_router: &mut Router,
) -> anyhow::Result<Vec<ReadinessCheck>> {
    let compiled = CompiledSource::compile(
        source.version,
        source.name.clone(),
        namespace.to_string(),
        &source.filter_rules,
        &source.dedup,
        source.normalization.clone(),
    )?;
    let processor = Arc::new(Processor::new(
        compiled,
        &source.dedup,
        persistor.clone(),
        source.processing_hint,
    ));

    match &source.binding {
        Binding::Webhook {
            path,
            required_headers,
            auth,
        } => {
            let (tx, rx) = zen_adapters::new_channel(None);
            let health = Arc::new(AdapterHealth::new());
            health.mark_ok();

            let secret = match auth {
                Some(a) if a.kind == AuthKind::Hmac => match &a.secret_ref {
                    Some(reference) => Some(secrets::resolve_hmac_secret(client, namespace, reference).await?.into()),
                    None => None,
                },
                Some(a) if a.kind == AuthKind::Bearer => match &a.secret_ref {
                    Some(reference) => Some(secrets::resolve_bearer_token(client, namespace, reference).await?.into()),
                    None => None,
                },
                _ => None,
            };

            let state = WebhookState {
                source_name: Arc::new(source.name.clone()),
                out: tx,
                auth: auth.clone(),
                secret,
                required_headers: Arc::new(required_headers.clone().unwrap_or_default()),
                config_version: source.version,
                dropped: Arc::new(AtomicU64::new(0)),
                health: health.clone(),
            };
            let source_router = Router::new().route(path, post(webhook::handle)).with_state(state);
            *webhook_router = std::mem::take(webhook_router).merge(source_router);

            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                processor.run(rx, cancel).await;
            }));

            info!(source = %source.name, path, "webhook source registered");
            Ok(vec![Box::new(move || health.state())])
        }
        Binding::Informer {
            group,
            version,
            kind,
            namespace: adapter_namespace,
        } => {
            let gvk = Gvk {
                group: group.clone(),
                version: version.clone(),
                kind: kind.clone(),
            };
            let adapter: Arc<dyn Adapter> = Arc::new(zen_adapters::informer::InformerAdapter::new(
                source.name.clone(),
                gvk,
                adapter_namespace.clone(),
                client.clone(),
                resolver.clone(),
                source.version,
            ));
            Ok(spawn_adapter(adapter, processor, cancel, handles))
        }
        Binding::PeriodicList {
            group,
            version,
            kind,
            namespace: adapter_namespace,
            interval_seconds,
        } => {
            let gvk = Gvk {
                group: group.clone(),
                version: version.clone(),
                kind: kind.clone(),
            };
            let adapter: Arc<dyn Adapter> = Arc::new(PeriodicListAdapter::new(
                source.name.clone(),
                gvk,
                adapter_namespace.clone(),
                *interval_seconds,
                client.clone(),
                resolver.clone(),
                source.version,
            ));
            Ok(spawn_adapter(adapter, processor, cancel, handles))
        }
        Binding::LogTail {
            file_path,
            checkpoint_path,
        } => {
            let adapter: Arc<dyn Adapter> = Arc::new(LogTailAdapter::new(
                source.name.clone(),
                file_path.clone(),
                checkpoint_path.clone(),
                source.version,
            ));
            Ok(spawn_adapter(adapter, processor, cancel, handles))
        }
    }
}

fn spawn_adapter(
    adapter: Arc<dyn Adapter>,
    processor: Arc<Processor<Persistor>>,
    cancel: &CancellationToken,
    handles: &mut Vec<JoinHandle<()>>,
) -> Vec<ReadinessCheck> {
    let (tx, rx) = zen_adapters::new_channel(None);

    let run_adapter = adapter.clone();
    let adapter_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = run_adapter.run(tx, adapter_cancel).await {
            tracing::error!(error = %e, "adapter exited with error");
        }
    }));

    let processor_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        processor.run(rx, processor_cancel).await;
    }));

    vec![Box::new(move || adapter.health())]
}
