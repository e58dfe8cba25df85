use internallb_admission::policy::{DEFAULT_ANNOTATION_KEY, DEFAULT_ANNOTATION_VALUE};

use std::time::Duration;

use futures::future::join_all;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tokio::time::{sleep, timeout};

const NAMESPACE: &str = "default";

fn service(name: &str, type_: &str, annotations: serde_json::Value) -> Service {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": name,
            "annotations": annotations,
            "labels": {"app.kubernetes.io/part-of": "internallb-e2e"},
        },
        "spec": {
            "type": type_,
            "selector": {"app": name},
            "ports": [{"port": 80, "targetPort": 8080}],
        }
    }))
    .unwrap()
}

async fn setup() -> Api<Service> {
    let client = Client::try_default().await.unwrap();
    wait_for_registration(client.clone()).await;
    Api::namespaced(client, NAMESPACE)
}

async fn wait_for_registration(client: Client) {
    let validating = Api::<ValidatingWebhookConfiguration>::all(client.clone());
    let mutating = Api::<MutatingWebhookConfiguration>::all(client);
    timeout(Duration::from_secs(60), async {
        loop {
            let registered = validating
                .list(&ListParams::default())
                .await
                .is_ok_and(|list| list.items.iter().any(|c| c.name_any().starts_with("internallb-webhook")))
                && mutating
                    .list(&ListParams::default())
                    .await
                    .is_ok_and(|list| list.items.iter().any(|c| c.name_any().starts_with("internallb-webhook")));
            if registered {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    })
    .await
    .expect("timeout waiting for webhook registration");
}

async fn cleanup(api: &Api<Service>, names: &[&str]) {
    let dp = DeleteParams::default();
    join_all(names.iter().map(|name| api.delete(name, &dp)),
    )
    .await;
}

#[tokio::test]
async fn load_balancer_is_annotated_on_create() {
    let api = setup().await;
    let name = "e2e-lb-annotated";
    cleanup(&api, &[name]).await;

    let created = api
        .create(&PostParams::default(), &service(name, "LoadBalancer", json!({})))
        .await
        .unwrap();

    assert_eq!(
        created.annotations().get(DEFAULT_ANNOTATION_KEY).map(String::as_str),
        Some(DEFAULT_ANNOTATION_VALUE)
    );
    cleanup(&api, &[name]).await;
}

#[tokio::test]
async fn existing_annotations_are_preserved() {
    let api = setup().await;
    let name = "e2e-lb-preserved";
    cleanup(&api, &[name]).await;

    let created = api
        .create(
            &PostParams::default(),
            &service(name, "LoadBalancer", json!({"team": "infra"})),
        )
        .await
        .unwrap();

    let annotations = created.annotations();
    assert_eq!(annotations.get("team").map(String::as_str), Some("infra"));
    assert_eq!(
        annotations.get(DEFAULT_ANNOTATION_KEY).map(String::as_str),
        Some(DEFAULT_ANNOTATION_VALUE)
    );
    cleanup(&api, &[name]).await;
}

#[tokio::test]
async fn cluster_ip_is_left_untouched() {
    let api = setup().await;
    let name = "e2e-cluster-ip";
    cleanup(&api, &[name]).await;

    let created = api
        .create(&PostParams::default(), &service(name, "ClusterIP", json!({})))
        .await
        .unwrap();

    assert!(!created.annotations().contains_key(DEFAULT_ANNOTATION_KEY));
    cleanup(&api, &[name]).await;
}

#[tokio::test]
async fn update_to_load_balancer_is_annotated() {
    let api = setup().await;
    let name = "e2e-cluster-ip-to-lb";
    cleanup(&api, &[name]).await;

    api.create(&PostParams::default(), &service(name, "ClusterIP", json!({})))
        .await
        .unwrap();
    let updated = api
        .patch(
            name,
            &PatchParams::default(),
            &Patch::Merge(json!({"spec": {"type": "LoadBalancer"}})),
        )
        .await
        .unwrap();

    assert_eq!(
        updated.annotations().get(DEFAULT_ANNOTATION_KEY).map(String::as_str),
        Some(DEFAULT_ANNOTATION_VALUE)
    );
    cleanup(&api, &[name]).await;
}

#[tokio::test]
async fn wrong_value_is_overwritten_by_mutation() {
    let api = setup().await;
    let name = "e2e-lb-wrong-value";
    cleanup(&api, &[name]).await;

    let created = api
        .create(
            &PostParams::default(),
            &service(name, "LoadBalancer", json!({(DEFAULT_ANNOTATION_KEY): "false"})),
        )
        .await
        .unwrap();

    assert_eq!(
        created.annotations().get(DEFAULT_ANNOTATION_KEY).map(String::as_str),
        Some(DEFAULT_ANNOTATION_VALUE)
    );
    cleanup(&api, &[name]).await;
}
