use crate::{
    cache::Watches,
    cert::{SecretCertRotator, StaticCerts, TLS_CERT, TLS_KEY},
    core::{CertOptions, CertRotator, Gvk, InvalidGvk, Readiness, WebhookInfo, WebhookType},
    k8s::Scheme,
    metrics::AdmissionMetrics,
    policy::{Interceptors, PolicyMetrics},
    router::Router,
    startup::{bootstrap, Startup},
    sync::Caches,
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::prelude::*;
use prometheus_client::registry::Registry;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::time::Duration;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "admission-gateway", about = "A policy-driven Kubernetes admission webhook")]
pub struct Args {
    #[clap(
        long,
        default_value = "admission_gateway=info,warn",
        env = "ADMISSION_GATEWAY_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Resources cached before serving, as `Kind/version` or `Kind/group/version`.
    #[clap(long, default_value = "")]
    pre_cache_resources: Resources,

    /// Directory holding the serving key pair.
    #[clap(long, default_value = "/tmp/k8s-webhook-server/serving-certs")]
    cert_dir: PathBuf,

    #[clap(long, default_value = "10")]
    cert_sync_interval_secs: u64,

    /// Serves certificates placed in the cert directory by another process.
    #[clap(long)]
    disable_cert_rotation: bool,

    #[clap(flatten)]
    cert: CertEnv,
}

/// Certificate rotation settings. Empty values fall back to defaults.
#[derive(Clone, Debug, Default, clap::Args)]
struct CertEnv {
    #[clap(long = "cert-namespace", env = "NAMESPACE", hide = true)]
    namespace: Option<String>,

    #[clap(long = "cert-secret", env = "SECRET", hide = true)]
    secret: Option<String>,

    #[clap(long = "ca-organization", env = "CA_ORGANIZATION", hide = true)]
    ca_organization: Option<String>,

    #[clap(long = "ca-name", env = "CA_NAME", hide = true)]
    ca_name: Option<String>,

    #[clap(long = "service-name", env = "SERVICE_NAME", hide = true)]
    service_name: Option<String>,

    #[clap(long = "mutating-config", env = "MUTATING_CONFIG", hide = true)]
    mutating_config: Option<String>,

    #[clap(long = "validating-config", env = "VALIDATING_CONFIG", hide = true)]
    validating_config: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Resources(Vec<Gvk>);

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            server,
            admin,
            pre_cache_resources: Resources(precache),
            cert_dir,
            cert_sync_interval_secs,
            disable_cert_rotation,
            cert,
        } = self;

        let mut prom = <Registry>::default();
        let admission_metrics =
            AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let policy_metrics = PolicyMetrics::register(&mut prom);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        // The admission server is bound separately, once its certificates are in place.
        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let scheme = Arc::new(Scheme::new());
        let watches = Arc::new(Watches::new(
            runtime.client(),
            scheme,
            runtime.shutdown_handle(),
        ));

        let server = serve_from_cert_dir(server, &cert_dir)?;
        let interval = Duration::from_secs(cert_sync_interval_secs);
        let options = cert.into_options(cert_dir);
        let certs = if disable_cert_rotation {
            StaticCerts::new(interval, runtime.shutdown_handle())
                .setup(options)
                .await?
        } else {
            SecretCertRotator::new(runtime.client(), interval, runtime.shutdown_handle())
                .setup(options)
                .await?
        };

        let startup = Startup::new();
        let router = Router::new(startup.subscribe(), admission_metrics);
        let serve = tokio::spawn(
            serve(server, router, certs.clone(), runtime.shutdown_handle())
                .instrument(info_span!("server")),
        );

        let caches = Caches {
            watches: watches.clone(),
            lister: watches,
            precache,
            metrics: policy_metrics,
        };
        let boot = tokio::spawn(bootstrap(
            startup,
            caches,
            Arc::new(Interceptors::for_policies()),
            certs,
            runtime.shutdown_handle(),
        ));

        // Block the main thread on the shutdown signal. Startup and bind failures abort the
        // process before any admission request is served.
        let run = async move {
            if runtime.run().await.is_err() {
                bail!("Aborted");
            }
            Ok(())
        };
        supervise(run, async move { boot.await? }, async move { serve.await? }).await
    }
}

/// Waits for the runtime to complete, failing as soon as startup or the admission server fails.
async fn supervise(
    run: impl Future<Output = Result<()>>,
    boot: impl Future<Output = Result<()>>,
    serve: impl Future<Output = Result<()>>,
) -> Result<()> {
    tokio::pin!(run, boot, serve);
    let mut booted = false;
    loop {
        tokio::select! {
            res = &mut run => return res,
            res = &mut boot, if !booted => {
                res?;
                booted = true;
            }
            res = &mut serve => {
                res?;
                // The server only returns once shutdown has begun.
                return run.await;
            }
        }
    }
}

/// Serves the key pair in `cert_dir` unless TLS files were configured explicitly.
fn serve_from_cert_dir(
    mut server: kubert::ServerArgs,
    cert_dir: &Path,
) -> Result<kubert::ServerArgs> {
    if server.server_tls_key.is_none() {
        let key = cert_dir.join(TLS_KEY);
        server.server_tls_key = Some(key.to_string_lossy().parse()?);
    }
    if server.server_tls_certs.is_none() {
        let certs = cert_dir.join(TLS_CERT);
        server.server_tls_certs = Some(certs.to_string_lossy().parse()?);
    }
    Ok(server)
}

/// Binds the admission server once certificates are available.
async fn serve(
    server: kubert::ServerArgs,
    router: Router,
    certs: Readiness,
    shutdown: drain::Watch,
) -> Result<()> {
    tokio::select! {
        _ = certs.wait() => {}
        _ = shutdown.clone().signaled() => return Ok(()),
    }

    let bound = server.bind().await?;
    info!(addr = %bound.local_addr(), "Admission server listening");
    bound.spawn(router, shutdown).join().await?;
    Ok(())
}

// === impl CertEnv ===

impl CertEnv {
    fn into_options(self, cert_dir: PathBuf) -> CertOptions {
        fn or(value: Option<String>, default: &str) -> String {
            value
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        }

        let service_name = or(self.service_name, "kinitiras-webhook");
        CertOptions {
            namespace: or(self.namespace, "kinitiras-system"),
            secret_name: or(self.secret, "kinitiras-webhook-cert"),
            cert_dir,
            ca_name: or(self.ca_name, "kinitiras-ca"),
            ca_organization: or(self.ca_organization, "kinitiras"),
            webhooks: vec![
                WebhookInfo {
                    name: or(self.mutating_config, &service_name),
                    kind: WebhookType::Mutating,
                },
                WebhookInfo {
                    name: or(self.validating_config, &service_name),
                    kind: WebhookType::Validating,
                },
            ],
            service_name,
        }
    }
}

// === impl Resources ===

impl std::str::FromStr for Resources {
    type Err = InvalidGvk;

    fn from_str(s: &str) -> Result<Self, InvalidGvk> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        s.split(',')
            .map(|r| r.trim().parse())
            .collect::<Result<Vec<Gvk>, _>>()
            .map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resources() {
        let Resources(kinds) = "Pod/v1, Deployment/apps/v1".parse().unwrap();
        assert_eq!(
            kinds,
            vec![
                Gvk::new("", "v1", "Pod"),
                Gvk::new("apps", "v1", "Deployment"),
            ]
        );
        assert_eq!("".parse::<Resources>().unwrap(), Resources::default());
        assert_eq!(
            "Pod/v1,Pod".parse::<Resources>().unwrap_err().to_string(),
            "invalid gvk(Pod)"
        );
    }

    #[test]
    fn cert_options_default_when_empty() {
        let env = CertEnv {
            namespace: Some(String::new()),
            service_name: Some("gateway".to_string()),
            validating_config: Some("gateway-validating".to_string()),
            ..Default::default()
        };
        let options = env.into_options(PathBuf::from("/certs"));
        assert_eq!(options.namespace, "kinitiras-system");
        assert_eq!(options.secret_name, "kinitiras-webhook-cert");
        assert_eq!(options.ca_name, "kinitiras-ca");
        assert_eq!(options.ca_organization, "kinitiras");
        assert_eq!(options.dns_name(), "gateway.kinitiras-system.svc");
        assert_eq!(
            options.webhooks,
            vec![
                WebhookInfo {
                    name: "gateway".to_string(),
                    kind: WebhookType::Mutating,
                },
                WebhookInfo {
                    name: "gateway-validating".to_string(),
                    kind: WebhookType::Validating,
                },
            ]
        );
    }

    #[test]
    fn serves_key_pair_from_cert_dir() {
        let args = Args::try_parse_from(["admission-gateway"]).unwrap();
        let server = serve_from_cert_dir(args.server, &args.cert_dir).unwrap();
        assert_eq!(
            format!("{:?}", server.server_tls_key),
            format!(
                "{:?}",
                Some("/tmp/k8s-webhook-server/serving-certs/tls.key".parse::<kubert::server::TlsKeyPath>().unwrap())
            )
        );
        assert_eq!(
            format!("{:?}", server.server_tls_certs),
            format!(
                "{:?}",
                Some("/tmp/k8s-webhook-server/serving-certs/tls.crt".parse::<kubert::server::TlsCertPath>().unwrap())
            )
        );

        let args = Args::try_parse_from([
            "admission-gateway",
            "--server-tls-key=/etc/tls/key.pem",
            "--cert-dir=/certs",
        ])
        .unwrap();
        let server = serve_from_cert_dir(args.server, &args.cert_dir).unwrap();
        assert_eq!(
            format!("{:?}", server.server_tls_key),
            format!(
                "{:?}",
                Some("/etc/tls/key.pem".parse::<kubert::server::TlsKeyPath>().unwrap())
            )
        );
        assert_eq!(
            format!("{:?}", server.server_tls_certs),
            format!(
                "{:?}",
                Some("/certs/tls.crt".parse::<kubert::server::TlsCertPath>().unwrap())
            )
        );
    }

    #[tokio::test]
    async fn bind_failure_aborts_pending_startup() {
        let res = tokio::time::timeout(
            Duration::from_secs(10),
            supervise(
                future::pending(),
                future::pending(),
                future::err(anyhow::anyhow!("failed to bind")),
            ),
        )
        .await
        .expect("bind failures must not wait for startup");
        assert_eq!(res.unwrap_err().to_string(), "failed to bind");
    }

    #[tokio::test]
    async fn startup_failure_aborts_pending_server() {
        let res = tokio::time::timeout(
            Duration::from_secs(10),
            supervise(
                future::pending(),
                future::err(anyhow::anyhow!("caches not synced: Pod/v1")),
                future::pending(),
            ),
        )
        .await
        .expect("startup failures must not wait for the server");
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn serving_waits_for_runtime_shutdown() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let run = async move {
            rx.await.ok();
            Ok(())
        };
        let mut task = tokio_test::task::spawn(supervise(run, future::ok(()), future::ok(())));
        tokio_test::assert_pending!(task.poll());

        tx.send(()).unwrap();
        tokio_test::assert_ready_ok!(task.poll());
    }

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "admission-gateway",
            "--pre-cache-resources=Pod/v1",
            "--cert-sync-interval-secs=30",
            "--disable-cert-rotation",
        ])
        .unwrap();
        assert_eq!(args.pre_cache_resources, Resources(vec![Gvk::new("", "v1", "Pod")]));
        assert_eq!(args.cert_sync_interval_secs, 30);
        assert!(args.disable_cert_rotation);
        assert_eq!(
            args.cert_dir,
            PathBuf::from("/tmp/k8s-webhook-server/serving-certs")
        );
    }
}
