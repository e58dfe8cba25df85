use crate::review::{GroupVersionResource, Operation};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("expect resource to be {expected}, got {actual}")]
    UnexpectedResource {
        expected: GroupVersionResource,
        actual: GroupVersionResource,
    },

    #[error("missing object in {0} request")]
    MissingObject(Operation),

    #[error("failed to decode service: {0}")]
    DecodeService(#[source] serde_json::Error),

    #[error("failed to build annotation patch: {0}")]
    BuildPatch(#[source] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
