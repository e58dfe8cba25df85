use internallb_admission::PolicyConfig;
use internallb_admission::policy::{DEFAULT_ANNOTATION_KEY, DEFAULT_ANNOTATION_VALUE};
use internallb_k8s_util::csr::{CsrSettings, KUBELET_SERVING_SIGNER};
use internallb_k8s_util::identity::IdentityPaths;
use internallb_k8s_util::registration::{
    FailurePolicy, RegistrationMode, RegistrationSettings, WebhookTarget,
};
use internallb_k8s_util::telemetry;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, crate_authors, crate_description, crate_version};

const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum CertSource {
    /// Read certificate, key and CA bundle from files
    Files,
    /// Request a certificate through a CertificateSigningRequest
    Csr,
}

#[derive(Parser, Debug)]
#[command(
    name = "internallb-webhook",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
pub struct Args {
    /// Listen address (use "::" for IPv6, "0.0.0.0" for IPv4)
    #[arg(long, default_value = "0.0.0.0", env)]
    pub listen_address: String,

    /// Listen on given port
    #[arg(short, long, default_value_t = 8443, env)]
    pub port: u16,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`. Example: "info,internallb=debug"
    #[arg(short, long, default_value = "info", env)]
    pub log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    pub log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint.
    ///
    /// This optional argument specifies the URL to which traces will be sent using
    /// OpenTelemetry. If not provided, tracing will be disabled.
    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    pub tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    ///
    /// Specifies the ratio of traces to sample. A value of `1.0` will sample all traces,
    /// while a lower value will sample fewer traces. The default is `0.1`, meaning 10%
    /// of traces are sampled.
    #[arg(short, long, default_value_t = 0.1, env)]
    pub sample_ratio: f64,

    /// Service annotation key to match or mutate
    #[arg(long, default_value = DEFAULT_ANNOTATION_KEY, env)]
    pub svc_annotation_key: String,

    /// Service annotation value to match or mutate
    #[arg(long, default_value = DEFAULT_ANNOTATION_VALUE, env)]
    pub svc_annotation_value: String,

    /// Where the serving certificate comes from
    #[arg(long, value_enum, default_value_t = CertSource::Files, env)]
    pub cert_source: CertSource,

    /// Certificate and key directory
    #[arg(
        long,
        default_value = "/var/run/internallb-webhook-admission-controller",
        env
    )]
    pub cert_dir: PathBuf,

    /// Certificate and key pair name, read as `<cert-dir>/<name>.crt` and `<cert-dir>/<name>.key`
    #[arg(long, default_value = "tls", env)]
    pub keypair_name: String,

    /// CA bundle handed to the API server.
    ///
    /// Defaults to `<cert-dir>/ca.crt` with file certificates and to the service account CA
    /// when the certificate is issued by the cluster.
    #[arg(long, env)]
    pub ca_cert: Option<PathBuf>,

    /// Name of the CertificateSigningRequest object
    #[arg(long, default_value = "internallb-webhook", env)]
    pub csr_name: String,

    /// Signer requested for the CertificateSigningRequest
    #[arg(long, default_value = KUBELET_SERVING_SIGNER, env)]
    pub csr_signer_name: String,

    /// Approve our own CertificateSigningRequest (requires RBAC on the approval subresource)
    #[arg(long, env)]
    pub csr_auto_approve: bool,

    /// Seconds to wait for the certificate to be issued
    #[arg(long, default_value_t = 60, env)]
    pub csr_timeout: u64,

    /// Create or update the webhook configurations on startup
    #[arg(long, env)]
    pub register: bool,

    /// Name prefix of the webhook configuration objects
    #[arg(long, default_value = "internallb-webhook", env)]
    pub webhook_name: String,

    /// Namespace of the Service in front of this webhook
    #[arg(long, default_value = "default", env = "POD_NAMESPACE")]
    pub webhook_namespace: String,

    /// Name of the Service in front of this webhook
    #[arg(long, default_value = "internallb-webhook", env)]
    pub webhook_service: String,

    /// Port of the Service in front of this webhook
    #[arg(long, default_value_t = 443, env)]
    pub webhook_service_port: i32,

    /// Base URL the API server calls instead of the Service
    #[arg(long, env)]
    pub webhook_url: Option<url::Url>,

    /// What the API server does when the webhook cannot be called
    #[arg(long, value_enum, default_value_t = FailurePolicy::Fail, env)]
    pub failure_policy: FailurePolicy,

    /// Which webhook configurations to register
    #[arg(long, value_enum, default_value_t = RegistrationMode::Both, env)]
    pub registration_mode: RegistrationMode,
}

impl Args {
    pub fn policy(&self) -> PolicyConfig {
        PolicyConfig::new(&self.svc_annotation_key, &self.svc_annotation_value)
    }

    pub fn identity_paths(&self) -> IdentityPaths {
        IdentityPaths::from_pair(&self.cert_dir, &self.keypair_name, self.ca_cert.clone())
    }

    /// CA bundle handed to the API server when the certificate is issued by the cluster.
    pub fn issued_ca_path(&self) -> PathBuf {
        self.ca_cert
            .clone()
            .unwrap_or_else(|| PathBuf::from(SERVICE_ACCOUNT_CA))
    }

    pub fn csr_settings(&self) -> CsrSettings {
        CsrSettings {
            name: self.csr_name.clone(),
            signer_name: self.csr_signer_name.clone(),
            service: self.webhook_service.clone(),
            namespace: self.webhook_namespace.clone(),
            auto_approve: self.csr_auto_approve,
            timeout: Duration::from_secs(self.csr_timeout),
        }
    }

    pub fn registration_settings(&self) -> RegistrationSettings {
        let target = match &self.webhook_url {
            Some(url) => WebhookTarget::Url(url.clone()),
            None => WebhookTarget::Service {
                namespace: self.webhook_namespace.clone(),
                name: self.webhook_service.clone(),
                port: self.webhook_service_port,
            },
        };
        RegistrationSettings {
            name: self.webhook_name.clone(),
            domain: format!("{}.{}.svc", self.webhook_service, self.webhook_namespace),
            target,
            failure_policy: self.failure_policy,
            mode: self.registration_mode,
        }
    }

    pub fn needs_client(&self) -> bool {
        self.register || self.cert_source == CertSource::Csr
    }
}
