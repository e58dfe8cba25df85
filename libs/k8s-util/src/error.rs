use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: {1}")]
    IoError(String, #[source] std::io::Error),

    #[error("{0}: {1:?}")]
    // Boxing this error because the size can be large
    KubeError(String, #[source] Box<kube::Error>),

    #[error("{0}: {1}")]
    WaitError(String, #[source] kube::runtime::wait::Error),

    #[error("{0}")]
    MissingData(String),

    #[error("{0}: {1}")]
    OpensslError(String, #[source] openssl::error::ErrorStack),

    #[error("{0}: {1}")]
    TlsError(String, #[source] rustls::Error),

    #[error("certificate signing request {name} was {condition}: {message}")]
    CsrRejected {
        name: String,
        condition: String,
        message: String,
    },

    #[error("timed out after {1:?} waiting for {0}")]
    Timeout(String, std::time::Duration),

    #[error("{0}: {1}")]
    UrlParseError(String, #[source] url::ParseError),

    #[error("telemetry error: {0}")]
    TelemetryError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
