//! `AdmissionReview` envelope exchanged with the API server.
//!
//! The request object is kept as raw JSON so that decoding it into a typed resource is a
//! decision of its own, and a decode failure never prevents the envelope from being answered.

use std::fmt;

use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";

fn default_api_version() -> String {
    ADMISSION_API_VERSION.to_string()
}

fn default_kind() -> String {
    ADMISSION_REVIEW_KIND.to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AdmissionReview {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

impl AdmissionReview {
    /// Wrap a response into an envelope of the same version the request came in.
    pub fn into_response(self, response: AdmissionResponse) -> AdmissionReview {
        AdmissionReview {
            api_version: self.api_version,
            kind: self.kind,
            request: None,
            response: Some(response),
        }
    }

    /// Envelope carrying no decision at all.
    ///
    /// The API server treats a missing response as a failed call and falls back to the
    /// webhook's failure policy, which is what must happen when no decision was reached.
    pub fn undecided(self) -> AdmissionReview {
        AdmissionReview {
            api_version: self.api_version,
            kind: self.kind,
            request: None,
            response: None,
        }
    }

    /// Envelope answering a review that could not be decoded at all.
    pub fn undecodable(message: impl Into<String>) -> AdmissionReview {
        AdmissionReview {
            api_version: default_api_version(),
            kind: default_kind(),
            request: None,
            response: Some(AdmissionResponse::invalid(String::new(), message)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GroupVersionResource {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }

    /// Core `v1` services, the only resource the webhook registers for.
    pub fn services() -> Self {
        Self::new("", "v1", "services")
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}, Resource={}",
            self.group, self.version, self.resource
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operation = match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Connect => "CONNECT",
        };
        f.write_str(operation)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    pub resource: GroupVersionResource,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Status {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum PatchType {
    #[serde(rename = "JSONPatch")]
    JsonPatch,
}

/// Decision returned to the API server.
///
/// A response either denies with a status, or allows with an optional patch; the
/// constructors are the only way to build one.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<ByteString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<PatchType>,
}

impl AdmissionResponse {
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            status: None,
            patch: None,
            patch_type: None,
        }
    }

    /// Policy denial. `reason` is what the API server shows to the user.
    pub fn deny(uid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            status: Some(Status {
                code: Some(403),
                reason: Some(reason.into()),
                message: None,
            }),
            patch: None,
            patch_type: None,
        }
    }

    /// The review itself was malformed.
    pub fn invalid(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            status: Some(Status {
                code: None,
                reason: None,
                message: Some(message.into()),
            }),
            patch: None,
            patch_type: None,
        }
    }

    /// Attach a serialized JSON-Patch. Only meaningful on an allowed response.
    pub fn with_patch(mut self, patch: Vec<u8>) -> Self {
        debug_assert!(self.allowed, "a denied response cannot carry a patch");
        self.patch = Some(ByteString(patch));
        self.patch_type = Some(PatchType::JsonPatch);
        self
    }
}
