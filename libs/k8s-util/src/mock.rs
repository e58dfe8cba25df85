//! In-process API server for tests driving code that talks to Kubernetes.

use std::time::Duration;

use http::{Request, Response, StatusCode};
use kube::Client;
use kube::client::Body;
use serde::Serialize;
use serde_json::json;

pub type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

pub fn client() -> (Client, ApiServerHandle) {
    let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    (Client::new(mock_service, "default"), handle)
}

pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded")
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

/// `metav1.Status` failure as the API server sends it.
pub fn status_response(status: StatusCode, reason: &str) -> Response<Body> {
    json_response(
        status,
        &json!({
            "apiVersion": "v1",
            "kind": "Status",
            "metadata": {},
            "status": "Failure",
            "message": reason,
            "reason": reason,
            "code": status.as_u16(),
        }),
    )
}

pub async fn body_json<T: serde::de::DeserializeOwned>(request: Request<Body>) -> T {
    let body = request.into_body().collect_bytes().await.unwrap();
    serde_json::from_slice(&body).expect("request body is json")
}
