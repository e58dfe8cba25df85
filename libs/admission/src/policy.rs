/// Annotation key matched or injected when none is configured.
pub const DEFAULT_ANNOTATION_KEY: &str = "service.beta.kubernetes.io/azure-load-balancer-internal";

/// Annotation value matched or injected when none is configured.
pub const DEFAULT_ANNOTATION_VALUE: &str = "true";

/// Annotation that every `LoadBalancer` service must carry.
///
/// Built once at startup and shared read-only between requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyConfig {
    pub annotation_key: String,
    pub annotation_value: String,
}

impl PolicyConfig {
    pub fn new(annotation_key: impl Into<String>, annotation_value: impl Into<String>) -> Self {
        Self {
            annotation_key: annotation_key.into(),
            annotation_value: annotation_value.into(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ANNOTATION_KEY, DEFAULT_ANNOTATION_VALUE)
    }
}
