//! Self-registration of the webhook with the control plane.

use crate::error::{Error, Result};

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use k8s_openapi::ByteString;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

pub const FIELD_MANAGER: &str = "internallb-webhook";

/// Path serving the validating decision.
pub const VALIDATE_PATH: &str = "/services";
/// Path serving the mutating decision.
pub const MUTATE_PATH: &str = "/mutating-services";

const TIMEOUT_SECONDS: i32 = 10;
const MAX_ATTEMPTS: usize = 8;
const MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Reject the request when the webhook cannot be reached
    #[default]
    Fail,
    /// Admit the request when the webhook cannot be reached
    Ignore,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Fail => "Fail",
            FailurePolicy::Ignore => "Ignore",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RegistrationMode {
    Validating,
    Mutating,
    #[default]
    Both,
}

impl RegistrationMode {
    fn validating(&self) -> bool {
        matches!(self, RegistrationMode::Validating | RegistrationMode::Both)
    }

    fn mutating(&self) -> bool {
        matches!(self, RegistrationMode::Mutating | RegistrationMode::Both)
    }
}

/// How the API server reaches the webhook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookTarget {
    Service {
        namespace: String,
        name: String,
        port: i32,
    },
    /// Base URL; the decision path is appended.
    Url(url::Url),
}

#[derive(Clone, Debug)]
pub struct RegistrationSettings {
    /// Prefix of the configuration object names.
    pub name: String,
    /// Suffix of the fully qualified webhook names, e.g. `internallb-webhook.default.svc`.
    pub domain: String,
    pub target: WebhookTarget,
    pub failure_policy: FailurePolicy,
    pub mode: RegistrationMode,
}

impl RegistrationSettings {
    pub fn validating_name(&self) -> String {
        format!("{}-validating", self.name)
    }

    pub fn mutating_name(&self) -> String {
        format!("{}-mutating", self.name)
    }

    fn client_config(&self, path: &str, ca_bundle: &[u8]) -> Result<WebhookClientConfig> {
        let (service, url) = match &self.target {
            WebhookTarget::Service {
                namespace,
                name,
                port,
            } => (
                Some(ServiceReference {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    path: Some(path.to_string()),
                    port: Some(*port),
                }),
                None,
            ),
            WebhookTarget::Url(base) => {
                let url = base.join(path.trim_start_matches('/')).map_err(|e| {
                    Error::UrlParseError(format!("failed to build webhook URL from {base}"), e)
                })?;
                (None, Some(url.to_string()))
            }
        };
        Ok(WebhookClientConfig {
            ca_bundle: Some(ByteString(ca_bundle.to_vec())),
            service,
            url,
        })
    }
}

fn service_rules() -> Vec<RuleWithOperations> {
    vec![RuleWithOperations {
        api_groups: Some(vec![String::new()]),
        api_versions: Some(vec!["v1".to_string()]),
        operations: Some(vec!["CREATE".to_string(), "UPDATE".to_string()]),
        resources: Some(vec!["services".to_string()]),
        scope: Some("*".to_string()),
    }]
}

fn admission_review_versions() -> Vec<String> {
    vec!["v1".to_string(), "v1beta1".to_string()]
}

pub fn validating_configuration(
    settings: &RegistrationSettings,
    ca_bundle: &[u8],
) -> Result<ValidatingWebhookConfiguration> {
    Ok(ValidatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(settings.validating_name()),
            ..ObjectMeta::default()
        },
        webhooks: Some(vec![ValidatingWebhook {
            name: format!("validate.{}", settings.domain),
            admission_review_versions: admission_review_versions(),
            client_config: settings.client_config(VALIDATE_PATH, ca_bundle)?,
            failure_policy: Some(settings.failure_policy.as_str().to_string()),
            rules: Some(service_rules()),
            side_effects: "None".to_string(),
            timeout_seconds: Some(TIMEOUT_SECONDS),
            ..ValidatingWebhook::default()
        }]),
    })
}

pub fn mutating_configuration(
    settings: &RegistrationSettings,
    ca_bundle: &[u8],
) -> Result<MutatingWebhookConfiguration> {
    Ok(MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(settings.mutating_name()),
            ..ObjectMeta::default()
        },
        webhooks: Some(vec![MutatingWebhook {
            name: format!("mutate.{}", settings.domain),
            admission_review_versions: admission_review_versions(),
            client_config: settings.client_config(MUTATE_PATH, ca_bundle)?,
            failure_policy: Some(settings.failure_policy.as_str().to_string()),
            reinvocation_policy: Some("IfNeeded".to_string()),
            rules: Some(service_rules()),
            side_effects: "None".to_string(),
            timeout_seconds: Some(TIMEOUT_SECONDS),
            ..MutatingWebhook::default()
        }]),
    })
}

async fn apply<K>(client: Client, name: &str, object: &K) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
{
    let api = Api::<K>::all(client);
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(object),
    )
    .await
    .map_err(|e| {
        Error::KubeError(
            format!("failed to apply {} {name}", K::kind(&())),
            Box::new(e),
        )
    })?;
    info!(kind = %K::kind(&()), name, "webhook configuration applied");
    Ok(())
}

/// Create or update the webhook configurations selected by `settings.mode`.
pub async fn register(
    client: Client,
    settings: &RegistrationSettings,
    ca_bundle: &[u8],
) -> Result<()> {
    if settings.mode.validating() {
        let configuration = validating_configuration(settings, ca_bundle)?;
        apply(client.clone(), &settings.validating_name(), &configuration).await?;
    }
    if settings.mode.mutating() {
        let configuration = mutating_configuration(settings, ca_bundle)?;
        apply(client, &settings.mutating_name(), &configuration).await?;
    }
    Ok(())
}

fn default_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_max_delay(MAX_DELAY)
        .with_max_times(MAX_ATTEMPTS)
}

async fn register_with_backoff(
    client: Client,
    settings: &RegistrationSettings,
    ca_bundle: &[u8],
    backoff: ExponentialBuilder,
) -> Result<()> {
    (|| register(client.clone(), settings, ca_bundle))
        .retry(backoff)
        .notify(|e, delay| {
            warn!(error = %e, retry_in = ?delay, "webhook registration failed");
        })
        .await
}

/// [`register`] with exponential backoff. Giving up is logged, never fatal: the server keeps
/// running but receives no admission requests until it is restarted.
pub async fn register_with_retry(
    client: Client,
    settings: RegistrationSettings,
    ca_bundle: Vec<u8>,
) {
    if let Err(e) = register_with_backoff(client, &settings, &ca_bundle, default_backoff()).await {
        error!(
            error = %e,
            name = %settings.name,
            "giving up on webhook registration; no admission requests will be received"
        );
    }
}
