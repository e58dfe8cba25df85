pub mod decision;
pub mod error;
pub mod policy;
pub mod review;

pub use decision::{mutate, validate};
pub use error::{Error, Result};
pub use policy::PolicyConfig;
pub use review::{AdmissionRequest, AdmissionResponse, AdmissionReview, GroupVersionResource};
