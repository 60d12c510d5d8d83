use crate::core::{CertOptions, CertRotator, Readiness, WebhookType};
use anyhow::{bail, Context, Result};
use k8s_openapi::{
    api::{
        admissionregistration::v1::{MutatingWebhookConfiguration, ValidatingWebhookConfiguration},
        core::v1::Secret,
    },
    ByteString,
};
use kube::api::{Api, Patch, PatchParams};
use serde_json::json;
use std::path::Path;
use tokio::time::{self, Duration};
use tracing::{debug, info, info_span, warn, Instrument};

pub(crate) const TLS_CERT: &str = "tls.crt";
pub(crate) const TLS_KEY: &str = "tls.key";
const CA_CERT: &str = "ca.crt";

/// Provisions serving certificates from a TLS secret, publishing its CA bundle to the webhook
/// configurations that call this server.
pub struct SecretCertRotator {
    client: kube::Client,
    interval: Duration,
    shutdown: drain::Watch,
}

/// Waits for serving certificates provisioned by another process.
pub struct StaticCerts {
    interval: Duration,
    shutdown: drain::Watch,
}

struct CertSync {
    secrets: Api<Secret>,
    mutating: Api<MutatingWebhookConfiguration>,
    validating: Api<ValidatingWebhookConfiguration>,
    options: CertOptions,
}

// === impl SecretCertRotator ===

impl SecretCertRotator {
    pub fn new(client: kube::Client, interval: Duration, shutdown: drain::Watch) -> Self {
        Self {
            client,
            interval,
            shutdown,
        }
    }
}

#[async_trait::async_trait]
impl CertRotator for SecretCertRotator {
    async fn setup(&self, options: CertOptions) -> Result<Readiness> {
        tokio::fs::create_dir_all(&options.cert_dir)
            .await
            .with_context(|| format!("failed to create {}", options.cert_dir.display()))?;

        info!(
            secret = %format_args!("{}/{}", options.namespace, options.secret_name),
            dns = %options.dns_name(),
            "Syncing serving certificates"
        );
        let sync = CertSync {
            secrets: Api::namespaced(self.client.clone(), &options.namespace),
            mutating: Api::all(self.client.clone()),
            validating: Api::all(self.client.clone()),
            options,
        };
        let ready = Readiness::new();
        tokio::spawn(
            sync.run(self.interval, ready.clone(), self.shutdown.clone())
                .instrument(info_span!("certs")),
        );
        Ok(ready)
    }
}

// === impl StaticCerts ===

impl StaticCerts {
    pub fn new(interval: Duration, shutdown: drain::Watch) -> Self {
        Self { interval, shutdown }
    }
}

#[async_trait::async_trait]
impl CertRotator for StaticCerts {
    async fn setup(&self, options: CertOptions) -> Result<Readiness> {
        let ready = Readiness::new();
        let interval = self.interval;
        let shutdown = self.shutdown.clone();
        let task_ready = ready.clone();
        tokio::spawn(
            async move {
                let signaled = shutdown.signaled();
                tokio::pin!(signaled);
                while !has_key_pair(&options.cert_dir).await {
                    debug!(dir = %options.cert_dir.display(), "Waiting for certificates");
                    tokio::select! {
                        _ = time::sleep(interval) => {}
                        _ = &mut signaled => return,
                    }
                }
                info!("Certificates found");
                task_ready.fire();
            }
            .instrument(info_span!("certs")),
        );
        Ok(ready)
    }
}

async fn has_key_pair(dir: &Path) -> bool {
    for file in [TLS_CERT, TLS_KEY] {
        if !tokio::fs::try_exists(dir.join(file)).await.unwrap_or(false) {
            return false;
        }
    }
    true
}

// === impl CertSync ===

impl CertSync {
    async fn run(self, interval: Duration, ready: Readiness, shutdown: drain::Watch) {
        let signaled = shutdown.signaled();
        tokio::pin!(signaled);
        loop {
            tokio::select! {
                res = self.sync() => match res {
                    Ok(()) => {
                        if ready.fire() {
                            info!("Certificates provisioned");
                        }
                    }
                    Err(error) => warn!(error = %format_args!("{error:#}"), "Failed to sync certificates"),
                },
                _ = &mut signaled => return,
            }

            tokio::select! {
                _ = time::sleep(interval) => {}
                _ = &mut signaled => return,
            }
        }
    }

    async fn sync(&self) -> Result<()> {
        let name = &self.options.secret_name;
        let Some(secret) = self.secrets.get_opt(name).await? else {
            bail!("secret {}/{name} not found", self.options.namespace);
        };
        let data = secret.data.unwrap_or_default();
        let field = |key: &str| {
            data.get(key)
                .with_context(|| format!("secret {name} is missing {key}"))
        };
        let (cert, key, ca) = (field(TLS_CERT)?, field(TLS_KEY)?, field(CA_CERT)?);

        let dir = &self.options.cert_dir;
        write_if_changed(&dir.join(TLS_CERT), &cert.0).await?;
        write_if_changed(&dir.join(TLS_KEY), &key.0).await?;

        for webhook in &self.options.webhooks {
            self.publish_ca_bundle(&webhook.name, webhook.kind, ca)
                .await
                .with_context(|| format!("failed to update caBundle of {}", webhook.name))?;
        }
        Ok(())
    }

    async fn publish_ca_bundle(&self, name: &str, kind: WebhookType, ca: &ByteString) -> Result<()> {
        let patch = match kind {
            WebhookType::Mutating => {
                let config = self.mutating.get(name).await?;
                ca_bundle_patch(
                    config
                        .webhooks
                        .iter()
                        .flatten()
                        .map(|w| w.client_config.ca_bundle.as_ref()),
                    ca,
                )?
            }
            WebhookType::Validating => {
                let config = self.validating.get(name).await?;
                ca_bundle_patch(
                    config
                        .webhooks
                        .iter()
                        .flatten()
                        .map(|w| w.client_config.ca_bundle.as_ref()),
                    ca,
                )?
            }
        };
        let Some(patch) = patch else {
            return Ok(());
        };

        let params = PatchParams::default();
        let patch = Patch::Json::<()>(patch);
        match kind {
            WebhookType::Mutating => {
                self.mutating.patch(name, &params, &patch).await?;
            }
            WebhookType::Validating => {
                self.validating.patch(name, &params, &patch).await?;
            }
        }
        info!(%name, ?kind, "Updated caBundle");
        Ok(())
    }
}

/// Builds the patch setting `caBundle` on every webhook whose bundle differs from `ca`.
fn ca_bundle_patch<'a>(
    bundles: impl Iterator<Item = Option<&'a ByteString>>,
    ca: &ByteString,
) -> Result<Option<json_patch::Patch>> {
    let value = serde_json::to_value(ca)?;
    let ops = bundles
        .enumerate()
        .filter(|(_, bundle)| *bundle != Some(ca))
        .map(|(i, _)| {
            json!({
                "op": "add",
                "path": format!("/webhooks/{i}/clientConfig/caBundle"),
                "value": value,
            })
        })
        .collect::<Vec<_>>();
    if ops.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(serde_json::Value::Array(ops))?))
}

/// Replaces `path` with `contents` unless it already holds them. Returns whether it was written.
async fn write_if_changed(path: &Path, contents: &[u8]) -> Result<bool> {
    if let Ok(current) = tokio::fs::read(path).await {
        if current == contents {
            return Ok(false);
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;
    debug!(path = %path.display(), "Wrote");
    Ok(true)
}
