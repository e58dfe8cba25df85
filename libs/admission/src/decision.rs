use crate::error::{Error, Result};
use crate::policy::PolicyConfig;
use crate::review::{AdmissionRequest, AdmissionResponse, GroupVersionResource, Operation};

use k8s_openapi::api::core::v1::Service;
use serde_json::json;
use tracing::debug;

/// Reason shown to users whose `LoadBalancer` service lacks the required annotation.
pub const MISSING_ANNOTATION_REASON: &str =
    "the service annotations do not contain required key and value";

const LOAD_BALANCER: &str = "LoadBalancer";

/// Decide whether a service may be persisted as submitted.
///
/// `LoadBalancer` services are denied unless they carry the configured annotation; every
/// other service type is allowed. An `Err` means no decision could be reached.
pub fn validate(policy: &PolicyConfig, request: &AdmissionRequest) -> Result<AdmissionResponse> {
    let Some(service) = subject(request)? else {
        return Ok(AdmissionResponse::allow(&request.uid));
    };

    if is_load_balancer(&service) && !has_annotation(&service, policy) {
        return Ok(AdmissionResponse::deny(
            &request.uid,
            MISSING_ANNOTATION_REASON,
        ));
    }
    Ok(AdmissionResponse::allow(&request.uid))
}

/// Allow every service, patching `LoadBalancer` ones so that they carry the configured
/// annotation. Existing annotations are kept.
pub fn mutate(policy: &PolicyConfig, request: &AdmissionRequest) -> Result<AdmissionResponse> {
    let Some(service) = subject(request)? else {
        return Ok(AdmissionResponse::allow(&request.uid));
    };

    if !is_load_balancer(&service) || has_annotation(&service, policy) {
        return Ok(AdmissionResponse::allow(&request.uid));
    }

    debug!(
        uid = %request.uid,
        name = service.metadata.name.as_deref().unwrap_or_default(),
        "patching service type LoadBalancer"
    );
    let patch = annotation_patch(&service, policy)?;
    let patch = serde_json::to_vec(&patch).map_err(Error::BuildPatch)?;
    Ok(AdmissionResponse::allow(&request.uid).with_patch(patch))
}

/// Decode the service under review, or `None` when the operation carries nothing to judge.
fn subject(request: &AdmissionRequest) -> Result<Option<Service>> {
    let expected = GroupVersionResource::services();
    if request.resource != expected {
        return Err(Error::UnexpectedResource {
            expected,
            actual: request.resource.clone(),
        });
    }

    match request.operation {
        Operation::Create | Operation::Update => {}
        Operation::Delete | Operation::Connect => return Ok(None),
    }

    let object = request
        .object
        .clone()
        .ok_or(Error::MissingObject(request.operation))?;
    serde_json::from_value(object)
        .map(Some)
        .map_err(Error::DecodeService)
}

fn is_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        == Some(LOAD_BALANCER)
}

fn has_annotation(service: &Service, policy: &PolicyConfig) -> bool {
    service
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(&policy.annotation_key))
        .is_some_and(|value| *value == policy.annotation_value)
}

fn annotation_patch(service: &Service, policy: &PolicyConfig) -> Result<json_patch::Patch> {
    let operation = match service.metadata.annotations {
        Some(_) => json!({
            "op": "add",
            "path": format!("/metadata/annotations/{}", escape_pointer(&policy.annotation_key)),
            "value": policy.annotation_value,
        }),
        None => json!({
            "op": "add",
            "path": "/metadata/annotations",
            "value": { (policy.annotation_key.as_str()): policy.annotation_value },
        }),
    };
    serde_json::from_value(json!([operation])).map_err(Error::BuildPatch)
}

/// Escape a map key as a JSON Pointer reference token (RFC 6901).
fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}
