//! Static configuration loading and validation.
//!
//! [`resolve_config_file`] finds the file (explicit path or an
//! auto-detected `signpost.*` in the working directory), [`load`] parses
//! and validates it into a [`GlobalConfiguration`]. [`parse_config_str`]
//! is shared with the file provider, which reads dynamic
//! [`Configuration`](crate::types::Configuration) documents in the same
//! formats.

pub mod model;
pub mod validation;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::error::SignpostError;
use model::GlobalConfiguration;

const CANDIDATES: &[&str] = &[
    "signpost.toml",
    "signpost.yaml",
    "signpost.yml",
    "signpost.json",
];

/// File extensions this build can parse.
#[must_use]
pub fn supported_extensions() -> Vec<&'static str> {
    let mut exts = Vec::new();
    #[cfg(feature = "toml")]
    exts.push("toml");
    #[cfg(feature = "yaml")]
    exts.extend(["yaml", "yml"]);
    exts.push("json");
    exts
}

/// Parse a document based on file extension.
pub fn parse_config_str<T: DeserializeOwned>(
    ext: &str,
    content: &str,
    path_display: &str,
) -> Result<T, SignpostError> {
    match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => serde_yml::from_str(content).map_err(|e| SignpostError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        "json" => serde_json::from_str(content).map_err(|e| SignpostError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        #[cfg(feature = "toml")]
        "toml" => toml::from_str(content).map_err(|e| SignpostError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        other => Err(SignpostError::UnsupportedFormat(other.to_string())),
    }
}

/// Compute a lowercase hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[must_use]
pub fn extension_of(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("")
}

/// Use `explicit` if given, otherwise the first `signpost.*` found in the
/// working directory.
pub async fn resolve_config_file(explicit: Option<&Path>) -> Result<PathBuf, SignpostError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    for name in CANDIDATES {
        let path = PathBuf::from(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "auto-detected config file");
            return Ok(path);
        }
    }

    Err(SignpostError::NoConfigSource {
        hint: "Provide --config <file> or create ./signpost.toml.".into(),
    })
}

/// Read, parse and validate the static configuration at `path`.
pub async fn load(path: &Path) -> Result<GlobalConfiguration, SignpostError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SignpostError::ConfigFileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            SignpostError::Io(e)
        }
    })?;

    let config: GlobalConfiguration =
        parse_config_str(extension_of(path), &content, &path.display().to_string())?;

    validation::validate(&config).map_err(|errors| SignpostError::ConfigValidation { errors })?;

    Ok(config)
}
