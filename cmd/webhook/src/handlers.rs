use crate::state::WebhookState;

use internallb_admission::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, PolicyConfig, mutate, validate,
};
use internallb_k8s_util::registration::{MUTATE_PATH, VALIDATE_PATH};

use axum::body::{Body, to_bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{Router, get, post};
use tracing::{debug, error, info, warn};

/// Admission reviews are small; anything past this is not a service object.
const MAX_BODY_BYTES: usize = 3 * 1024 * 1024;

type Decide = fn(&PolicyConfig, &AdmissionRequest) -> internallb_admission::Result<AdmissionResponse>;

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(VALIDATE_PATH, post(validate_services))
        .route(MUTATE_PATH, post(mutate_services))
        .route("/", post(mutate_services))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<WebhookState>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

pub async fn validate_services(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    serve(&state, &headers, body, validate, "validate").await
}

pub async fn mutate_services(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    serve(&state, &headers, body, mutate, "mutate").await
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// Decode the review, run `decide` and answer with a review envelope.
///
/// A malformed review is answered with a 200 envelope carrying the error. When no decision
/// can be reached the answer is a 500 without a response, so the API server applies its
/// failure policy instead of reporting a denial.
async fn serve(
    state: &WebhookState,
    headers: &HeaderMap,
    body: Body,
    decide: Decide,
    decision: &'static str,
) -> Response {
    if !is_json(headers) {
        let content_type = headers
            .get(CONTENT_TYPE)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .unwrap_or_default();
        error!(content_type, "unexpected content type, expect application/json");
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }

    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, limit = MAX_BODY_BYTES, "failed to read request body");
            let message = format!("failed to read request body: {e}");
            return Json(AdmissionReview::undecodable(message)).into_response();
        }
    };

    let mut review: AdmissionReview = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            error!(error = %e, "failed to decode admission review");
            return Json(AdmissionReview::undecodable(e.to_string())).into_response();
        }
    };

    let Some(request) = review.request.take() else {
        error!("missing request in admission review");
        let response = AdmissionResponse::invalid("", "admission review has no request");
        return Json(review.into_response(response)).into_response();
    };

    debug!(
        uid = %request.uid,
        operation = %request.operation,
        namespace = request.namespace.as_deref().unwrap_or_default(),
        name = request.name.as_deref().unwrap_or_default(),
        decision,
        "processing admission request"
    );

    match decide(&state.policy, &request) {
        Ok(response) => {
            if response.allowed {
                debug!(uid = %request.uid, patched = response.patch.is_some(), "admission request allowed");
            } else {
                info!(
                    uid = %request.uid,
                    namespace = request.namespace.as_deref().unwrap_or_default(),
                    name = request.name.as_deref().unwrap_or_default(),
                    "admission request denied"
                );
            }
            Json(review.into_response(response)).into_response()
        }
        Err(e) => {
            error!(uid = %request.uid, error = %e, decision, "no admission decision");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(review.undecided())).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use http::{Method, Request};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const UID: &str = "e911857d-c318-11e8-bbad-025000000001";

    fn app() -> Router {
        router(WebhookState::new(PolicyConfig::new("internal", "true")))
    }

    fn review(type_: &str, annotations: Value) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": UID,
                "kind": {"group": "", "version": "v1", "kind": "Service"},
                "resource": {"group": "", "version": "v1", "resource": "services"},
                "name": "web",
                "namespace": "default",
                "operation": "CREATE",
                "object": {
                    "apiVersion": "v1",
                    "kind": "Service",
                    "metadata": {"name": "web", "namespace": "default", "annotations": annotations},
                    "spec": {"type": type_}
                }
            }
        })
    }

    async fn send(
        uri: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> (StatusCode, axum::body::Bytes) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, content_type)
            .body(body.into())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body)
    }

    async fn post_review(uri: &str, review: Value) -> Value {
        let (status, body) = send(uri, "application/json", review.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let request = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_follows_state() {
        let state = WebhookState::new(PolicyConfig::default());
        let request = || Request::builder().uri("/readyz").body(Body::empty()).unwrap();

        let response = router(state.clone()).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        state.set_not_ready();
        let response = router(state).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_validate_denies_missing_annotation() {
        let out = post_review("/services", review("LoadBalancer", json!({}))).await;
        assert_eq!(out["apiVersion"], json!("admission.k8s.io/v1"));
        assert_eq!(out["kind"], json!("AdmissionReview"));
        assert_eq!(out["response"]["uid"], json!(UID));
        assert_eq!(out["response"]["allowed"], json!(false));
        assert_eq!(
            out["response"]["status"]["reason"],
            json!("the service annotations do not contain required key and value")
        );
        assert!(out["response"].get("patch").is_none());
    }

    #[tokio::test]
    async fn test_validate_allows_annotated_load_balancer() {
        let out = post_review(
            "/services",
            review("LoadBalancer", json!({"internal": "true"})),
        )
        .await;
        assert_eq!(out["response"]["allowed"], json!(true));
        assert_eq!(out["response"]["uid"], json!(UID));
    }

    #[tokio::test]
    async fn test_cluster_ip_allowed_on_every_route() {
        for uri in ["/services", "/mutating-services", "/"] {
            let out = post_review(uri, review("ClusterIP", json!({}))).await;
            assert_eq!(out["response"]["allowed"], json!(true), "{uri}");
            assert!(out["response"].get("patch").is_none(), "{uri}");
        }
    }

    #[tokio::test]
    async fn test_mutate_returns_annotation_patch() {
        for uri in ["/mutating-services", "/"] {
            let out = post_review(uri, review("LoadBalancer", json!({}))).await;
            assert_eq!(out["response"]["allowed"], json!(true));
            assert_eq!(out["response"]["patchType"], json!("JSONPatch"));

            let encoded: AdmissionResponse =
                serde_json::from_value(out["response"].clone()).unwrap();
            let patch: json_patch::Patch =
                serde_json::from_slice(&encoded.patch.unwrap().0).unwrap();
            let mut object = review("LoadBalancer", json!({}))["request"]["object"].clone();
            json_patch::patch(&mut object, &patch).unwrap();
            assert_eq!(object["metadata"]["annotations"], json!({"internal": "true"}));
        }
    }

    #[tokio::test]
    async fn test_malformed_body_returns_envelope_with_error() {
        let (status, body) = send("/services", "application/json", "{not json").await;
        assert_eq!(status, StatusCode::OK);

        let out: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(out["kind"], json!("AdmissionReview"));
        let message = out["response"]["status"]["message"].as_str().unwrap();
        assert!(message.contains("key must be a string"), "{message}");
    }

    #[tokio::test]
    async fn test_empty_body_returns_envelope_with_error() {
        let (status, body) = send("/mutating-services", "application/json", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let out: Value = serde_json::from_slice(&body).unwrap();
        assert!(out["response"]["status"]["message"].is_string());
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_rejected() {
        let body = review("LoadBalancer", json!({})).to_string();
        let (status, body) = send("/services", "text/plain", body).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_content_type_parameters_are_accepted() {
        let body = review("ClusterIP", json!({})).to_string();
        let (status, _) = send("/services", "application/json; charset=utf-8", body).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unexpected_resource_yields_no_decision() {
        let mut input = review("LoadBalancer", json!({}));
        input["request"]["resource"] = json!({"group": "apps", "version": "v1", "resource": "deployments"});

        let (status, body) = send("/services", "application/json", input.to_string()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let out: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(out["kind"], json!("AdmissionReview"));
        assert!(out.get("response").is_none());
    }

    #[tokio::test]
    async fn test_undecodable_service_yields_no_decision() {
        for spec in [json!({"type": ["LoadBalancer"]}), json!({"type": 7})] {
            let mut input = review("LoadBalancer", json!({}));
            input["request"]["object"]["spec"] = spec;

            let (status, body) =
                send("/mutating-services", "application/json", input.to_string()).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            let out: Value = serde_json::from_slice(&body).unwrap();
            assert!(out.get("response").is_none(), "{out}");
        }
    }

    #[tokio::test]
    async fn test_oversized_body_reports_length_limit() {
        let body = vec![b' '; MAX_BODY_BYTES + 1];
        let (status, body) = send("/services", "application/json", body).await;
        assert_eq!(status, StatusCode::OK);

        let out: Value = serde_json::from_slice(&body).unwrap();
        let message = out["response"]["status"]["message"].as_str().unwrap();
        assert!(message.contains("length limit exceeded"), "{message}");
        assert_eq!(out["response"]["allowed"], json!(false));
    }

    #[tokio::test]
    async fn test_review_without_request() {
        let out = post_review(
            "/services",
            json!({"apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview"}),
        )
        .await;
        assert_eq!(out["response"]["allowed"], json!(false));
        assert!(out["response"]["status"]["message"].is_string());
    }

    #[tokio::test]
    async fn test_v1beta1_review_is_answered_in_kind() {
        let mut input = review("LoadBalancer", json!({"internal": "true"}));
        input["apiVersion"] = json!("admission.k8s.io/v1beta1");
        let out = post_review("/services", input).await;
        assert_eq!(out["apiVersion"], json!("admission.k8s.io/v1beta1"));
        assert_eq!(out["response"]["allowed"], json!(true));
    }
}
