//! Serving certificate issued by the cluster through a `CertificateSigningRequest`.

use crate::error::{Error, Result};
use crate::identity::IdentityMaterial;

use std::time::Duration;

use k8s_openapi::ByteString;
use k8s_openapi::api::certificates::v1::{CertificateSigningRequest, CertificateSigningRequestSpec};
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::runtime::wait::await_condition;
use kube::{Client, ResourceExt};
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509NameBuilder, X509ReqBuilder};
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, info};

/// Signer that issues serving certificates for `system:node` subjects.
pub const KUBELET_SERVING_SIGNER: &str = "kubernetes.io/kubelet-serving";

const USAGES: [&str; 3] = ["digital signature", "key encipherment", "server auth"];

#[derive(Clone, Debug)]
pub struct CsrSettings {
    /// Name of the `CertificateSigningRequest` object.
    pub name: String,
    pub signer_name: String,
    /// Service fronting the webhook; the certificate is issued for its DNS names.
    pub service: String,
    pub namespace: String,
    /// Approve the request ourselves instead of waiting for an external approver.
    pub auto_approve: bool,
    pub timeout: Duration,
}

impl CsrSettings {
    /// In-cluster DNS names of the fronting service, most specific last.
    pub fn dns_names(&self) -> Vec<String> {
        let (service, namespace) = (&self.service, &self.namespace);
        vec![
            service.clone(),
            format!("{service}.{namespace}"),
            format!("{service}.{namespace}.svc"),
            format!("{service}.{namespace}.svc.cluster.local"),
        ]
    }

    fn common_name(&self) -> String {
        let host = format!("{}.{}.svc", self.service, self.namespace);
        if self.signer_name == KUBELET_SERVING_SIGNER {
            format!("system:node:{host}")
        } else {
            host
        }
    }
}

/// Freshly generated key and the PKCS#10 request for it, both PEM.
pub struct KeyAndRequest {
    pub key_pem: Vec<u8>,
    pub request_pem: Vec<u8>,
}

pub fn generate_key_and_request(settings: &CsrSettings) -> Result<KeyAndRequest> {
    let openssl_err = |context: &str| {
        let context = context.to_string();
        move |e: ErrorStack| Error::OpensslError(context, e)
    };

    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)
        .map_err(openssl_err("failed to load P-256 curve"))?;
    let key: PKey<Private> = EcKey::generate(&group)
        .and_then(PKey::from_ec_key)
        .map_err(openssl_err("failed to generate private key"))?;
    let request_pem = build_request(settings, &key)
        .map_err(openssl_err("failed to build certificate signing request"))?;
    let key_pem = key
        .private_key_to_pem_pkcs8()
        .map_err(openssl_err("failed to encode private key"))?;

    Ok(KeyAndRequest {
        key_pem,
        request_pem,
    })
}

fn build_request(
    settings: &CsrSettings,
    key: &PKey<Private>,
) -> std::result::Result<Vec<u8>, ErrorStack> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, &settings.common_name())?;
    if settings.signer_name == KUBELET_SERVING_SIGNER {
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "system:nodes")?;
    }
    let name = name.build();

    let mut builder = X509ReqBuilder::new()?;
    builder.set_version(0)?;
    builder.set_subject_name(&name)?;
    builder.set_pubkey(key)?;

    let mut san = SubjectAlternativeName::new();
    for dns_name in settings.dns_names() {
        san.dns(&dns_name);
    }
    let san = san.build(&builder.x509v3_context(None))?;
    let mut extensions = Stack::new()?;
    extensions.push(san)?;
    builder.add_extensions(&extensions)?;

    builder.sign(key, MessageDigest::sha256())?;
    builder.build().to_pem()
}

pub fn certificate_signing_request(
    settings: &CsrSettings,
    request_pem: Vec<u8>,
) -> CertificateSigningRequest {
    CertificateSigningRequest {
        metadata: ObjectMeta {
            name: Some(settings.name.clone()),
            ..ObjectMeta::default()
        },
        spec: CertificateSigningRequestSpec {
            request: ByteString(request_pem),
            signer_name: settings.signer_name.clone(),
            usages: Some(USAGES.iter().map(|u| u.to_string()).collect()),
            ..CertificateSigningRequestSpec::default()
        },
        status: None,
    }
}

/// Outcome of a request as far as the control plane has processed it.
#[derive(Debug, PartialEq, Eq)]
pub enum CsrState {
    Pending,
    Issued(Vec<u8>),
    Rejected { condition: String, message: String },
}

pub fn csr_state(csr: &CertificateSigningRequest) -> CsrState {
    let Some(status) = csr.status.as_ref() else {
        return CsrState::Pending;
    };

    if let Some(rejection) = status.conditions.iter().flatten().find(|c| {
        (c.type_ == "Denied" || c.type_ == "Failed") && c.status == "True"
    }) {
        return CsrState::Rejected {
            condition: rejection.type_.clone(),
            message: rejection
                .message
                .clone()
                .or_else(|| rejection.reason.clone())
                .unwrap_or_default(),
        };
    }

    match status.certificate.as_ref() {
        Some(certificate) if !certificate.0.is_empty() => {
            CsrState::Issued(certificate.0.clone())
        }
        _ => CsrState::Pending,
    }
}

/// Request a serving certificate from the cluster and wait until it is issued.
///
/// Any stale request with the same name is replaced. `ca_bundle` is the CA the API server
/// must trust for the issued certificate.
pub async fn issue(
    client: Client,
    settings: &CsrSettings,
    ca_bundle: Vec<u8>,
) -> Result<IdentityMaterial> {
    let api = Api::<CertificateSigningRequest>::all(client);
    let KeyAndRequest {
        key_pem,
        request_pem,
    } = generate_key_and_request(settings)?;

    match api.delete(&settings.name, &DeleteParams::default()).await {
        Ok(_) => debug!(name = %settings.name, "deleted stale certificate signing request"),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {}
        Err(e) => {
            return Err(Error::KubeError(
                format!("failed to delete certificate signing request {}", settings.name),
                Box::new(e),
            ));
        }
    }

    let csr = api
        .create(
            &PostParams::default(),
            &certificate_signing_request(settings, request_pem),
        )
        .await
        .map_err(|e| {
            Error::KubeError(
                format!("failed to create certificate signing request {}", settings.name),
                Box::new(e),
            )
        })?;
    info!(
        name = csr.name_any(),
        signer = %settings.signer_name,
        "created certificate signing request"
    );

    if settings.auto_approve {
        approve(&api, &settings.name).await?;
    }

    let issued = timeout(
        settings.timeout,
        await_condition(api, &settings.name, |csr: Option<&CertificateSigningRequest>| {
            csr.is_some_and(|csr| csr_state(csr) != CsrState::Pending)
        }),
    )
    .await
    .map_err(|_| {
        Error::Timeout(
            format!("certificate signing request {}", settings.name),
            settings.timeout,
        )
    })?
    .map_err(|e| {
        Error::WaitError(
            format!("failed to watch certificate signing request {}", settings.name),
            e,
        )
    })?
    .ok_or_else(|| {
        Error::MissingData(format!(
            "certificate signing request {} was deleted",
            settings.name
        ))
    })?;

    match csr_state(&issued) {
        CsrState::Issued(cert_pem) => {
            info!(name = %settings.name, "serving certificate issued");
            IdentityMaterial::from_pem(cert_pem, key_pem, ca_bundle)
        }
        CsrState::Rejected { condition, message } => Err(Error::CsrRejected {
            name: settings.name.clone(),
            condition,
            message,
        }),
        CsrState::Pending => Err(Error::MissingData(format!(
            "certificate signing request {} has no certificate",
            settings.name
        ))),
    }
}

async fn approve(api: &Api<CertificateSigningRequest>, name: &str) -> Result<()> {
    let approval = json!({
        "status": {
            "conditions": [{
                "type": "Approved",
                "status": "True",
                "reason": "WebhookSelfApproved",
                "message": "serving certificate requested by the admission webhook",
            }]
        }
    });
    api.patch_approval(name, &PatchParams::default(), &Patch::Merge(&approval))
        .await
        .map_err(|e| {
            Error::KubeError(
                format!("failed to approve certificate signing request {name}"),
                Box::new(e),
            )
        })?;
    debug!(name, "approved certificate signing request");
    Ok(())
}
