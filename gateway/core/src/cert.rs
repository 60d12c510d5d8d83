use crate::Readiness;
use anyhow::Result;
use std::path::PathBuf;

/// Describes where serving certificates come from and which webhook configurations trust them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertOptions {
    pub namespace: String,
    pub secret_name: String,
    pub cert_dir: PathBuf,
    pub ca_name: String,
    pub ca_organization: String,
    pub service_name: String,
    pub webhooks: Vec<WebhookInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookInfo {
    pub name: String,
    pub kind: WebhookType,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WebhookType {
    Mutating,
    Validating,
}

/// Provisions the serving certificate.
#[async_trait::async_trait]
pub trait CertRotator: Send + Sync + 'static {
    /// Begins provisioning and returns a signal that fires once a certificate is in place.
    async fn setup(&self, options: CertOptions) -> Result<Readiness>;
}

// === impl CertOptions ===

impl CertOptions {
    /// The DNS name the serving certificate must be valid for.
    pub fn dns_name(&self) -> String {
        format!("{}.{}.svc", self.service_name, self.namespace)
    }
}
