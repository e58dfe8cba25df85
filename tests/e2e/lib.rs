//! End-to-end tests run against a cluster where the webhook is deployed and registered with
//! its default annotation `service.beta.kubernetes.io/azure-load-balancer-internal=true`.
//!
//! Run with `cargo test -p internallb-e2e-tests --features e2e-test`.

#[cfg(all(test, feature = "e2e-test"))]
mod test;
