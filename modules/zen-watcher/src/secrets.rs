//! Resolves a webhook source's `auth.secret_ref` to the literal value the
//! `WebhookState` needs. `secret_ref` names a `Secret` in the watcher's own
//! namespace; the key read from it depends on the auth kind.

use k8s_openapi::api::core::v1::Secret;
use kube::Api;

const HMAC_KEY: &str = "hmac-secret";
const BEARER_KEY: &str = "bearer-token";

pub async fn resolve_hmac_secret(client: &kube::Client, namespace: &str, secret_ref: &str) -> anyhow::Result<String> {
    resolve(client, namespace, secret_ref, HMAC_KEY).await
}

pub async fn resolve_bearer_token(client: &kube::Client, namespace: &str, secret_ref: &str) -> anyhow::Result<String> {
    resolve(client, namespace, secret_ref, BEARER_KEY).await
}

async fn resolve(client: &kube::Client, namespace: &str, secret_ref: &str, key: &str) -> anyhow::Result<String> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = api.get(secret_ref).await?;
    let data = secret
        .data
        .ok_or_else(|| anyhow::anyhow!("secret {secret_ref} has no data"))?;
    let value = data
        .get(key)
        .ok_or_else(|| anyhow::anyhow!("secret {secret_ref} missing key {key}"))?;
    Ok(String::from_utf8(value.0.clone())?)
}
