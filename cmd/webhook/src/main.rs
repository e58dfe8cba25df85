use internallb_k8s_util::identity::IdentityMaterial;
use internallb_k8s_util::{csr, registration, telemetry};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use kube::Client;
use rustls::crypto::aws_lc_rs::default_provider;
use tokio::signal::unix::{SignalKind, signal};

mod args;
mod handlers;
mod state;

use args::{Args, CertSource};
use state::WebhookState;

async fn load_identity(args: &Args, client: Option<&Client>) -> anyhow::Result<IdentityMaterial> {
    match (args.cert_source, client) {
        (CertSource::Files, _) => {
            let paths = args.identity_paths();
            tracing::info!(
                cert = %paths.cert.display(),
                key = %paths.key.display(),
                ca = %paths.ca.display(),
                "loading serving certificate from files"
            );
            Ok(IdentityMaterial::from_files(&paths)?)
        }
        (CertSource::Csr, Some(client)) => {
            let ca_path = args.issued_ca_path();
            let ca_bundle = std::fs::read(&ca_path)
                .with_context(|| format!("failed to read CA bundle {}", ca_path.display()))?;
            Ok(csr::issue(client.clone(), &args.csr_settings(), ca_bundle).await?)
        }
        (CertSource::Csr, None) => anyhow::bail!("certificate issuance requires a Kubernetes client"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let args: Args = Args::parse();

    telemetry::init(
        &args.log_filter,
        args.log_format,
        args.tracing_url.as_deref(),
        args.sample_ratio,
    )
    .await?;

    let policy = args.policy();
    tracing::info!(
        key = %policy.annotation_key,
        value = %policy.annotation_value,
        "service annotation to match/mutate"
    );

    let client = if args.needs_client() {
        Some(Client::try_default().await?)
    } else {
        None
    };

    let identity = load_identity(&args, client.as_ref()).await?;
    let tls_config = identity.tls_config()?;
    let rustls_config = RustlsConfig::from_config(Arc::new(tls_config));

    if let Some(client) = client.filter(|_| args.register) {
        let settings = args.registration_settings();
        let ca_bundle = identity.ca_bundle().to_vec();
        tokio::spawn(registration::register_with_retry(client, settings, ca_bundle));
    }

    let state = WebhookState::new(policy);
    let app = handlers::router(state.clone());

    let addr = format!("{}:{}", args.listen_address, args.port);
    let socket_addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid listen address {addr}"))?;

    let handle = Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        state.set_not_ready();
        tracing::info!("Received shutdown signal, starting graceful shutdown");
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(30)));
    });

    tracing::info!("Starting HTTPS server on {}", socket_addr);
    axum_server::bind_rustls(socket_addr, rustls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM signal handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}
