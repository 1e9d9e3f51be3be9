//! Unified error types for Signpost.
//!
//! Defines [`SignpostError`] (bootstrap and CLI failures),
//! [`ProviderError`] (everything an adapter can fail with),
//! [`TemplateError`] (rule and template rendering failures) and
//! [`ValidationError`] for static/dynamic config validation. All use
//! `thiserror` for `Display` and `Error` derives. Error messages include
//! contextual hints to guide the user toward a fix.

use std::path::PathBuf;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub location: String,
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "  {}: {}: {}", self.location, self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn format_errors(errors: &[ValidationError]) -> String {
    use std::fmt::Write;
    let mut buf = String::new();
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        // write! to String is infallible (only fails on OOM which is unrecoverable)
        let _ = write!(buf, "{e}");
    }
    buf
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SignpostError {
    #[error("No config source found.\n\n  {hint}")]
    NoConfigSource { hint: String },

    #[error("Config file not found: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    #[error("Config parse error in {path}:\n  {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("Config validation failed:\n{}", format_errors(.errors))]
    ConfigValidation { errors: Vec<ValidationError> },

    #[error("Unsupported config format: '{0}'")]
    UnsupportedFormat(String),

    #[error("Invalid address: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    #[error("Invalid URI: {source}")]
    UriParse {
        #[source]
        source: BoxError,
    },

    #[error("HTTP request failed: {source}")]
    HttpRequest {
        #[source]
        source: BoxError,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Health check failed with status {0}")]
    HealthCheckFailed(hyper::StatusCode),

    #[error("Provider setup failed: {0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("invalid constraint '{expression}': {reason}")]
    InvalidConstraint { expression: String, reason: String },

    #[error("{provider}: missing required setting '{field}'")]
    MissingField {
        provider: &'static str,
        field: &'static str,
    },

    #[error("{provider}: {source}")]
    Template {
        provider: &'static str,
        #[source]
        source: TemplateError,
    },

    #[error("{provider}: connection failed: {source}")]
    Connection {
        provider: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{provider}: fetch failed: {source}")]
    Fetch {
        provider: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{provider}: cannot decode {what}: {source}")]
    Decode {
        provider: &'static str,
        what: String,
        #[source]
        source: BoxError,
    },

    #[error("Database error ({backend}): {source}")]
    Database {
        backend: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{provider}: task panicked: {message}")]
    Panic {
        provider: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TemplateError {
    #[error("malformed template '{template}': {reason}")]
    Parse { template: String, reason: String },

    #[error("record '{record}': invalid rule '{rule}': {reason}")]
    InvalidRule {
        record: String,
        rule: String,
        reason: String,
    },

    #[error("record '{record}': invalid server url '{url}'")]
    InvalidServerUrl { record: String, url: String },
}
