//! `signpost validate`: check a configuration file for errors.
//!
//! Parses and validates either the static configuration or, with
//! `--dynamic`, a routing document as the file provider would read it.
//! Results are reported as human-readable text or machine-readable JSON.

use std::path::Path;

use serde_json::Value;

use crate::cli::{ValidateArgs, ValidateFormat};
use crate::config::model::GlobalConfiguration;
use crate::config::{extension_of, parse_config_str, validation};
use crate::error::{SignpostError, ValidationError};
use crate::types::Configuration;

pub fn execute(args: &ValidateArgs) -> Result<(), SignpostError> {
    let path = &args.config;

    if !path.exists() {
        return Err(SignpostError::ConfigFileNotFound { path: path.clone() });
    }

    let content = std::fs::read_to_string(path)?;
    let display = path.display().to_string();

    if args.dynamic {
        let config: Configuration = parse_config_str(extension_of(path), &content, &display)?;
        report(
            &args.format,
            path,
            validation::validate_dynamic(&config),
            || validation::format_dynamic_report(&display, &config),
            || {
                serde_json::json!({
                    "valid": true,
                    "frontends": config.frontends.len(),
                    "backends": config.backends.len(),
                    "servers": config.total_servers(),
                })
            },
        )
    } else {
        let config: GlobalConfiguration =
            parse_config_str(extension_of(path), &content, &display)?;
        report(
            &args.format,
            path,
            validation::validate(&config),
            || validation::format_validation_report(&display, &config),
            || {
                serde_json::json!({
                    "valid": true,
                    "providers": config.configured_providers(),
                })
            },
        )
    }
}

fn report(
    format: &ValidateFormat,
    path: &Path,
    result: Result<(), Vec<ValidationError>>,
    text: impl FnOnce() -> String,
    json: impl FnOnce() -> Value,
) -> Result<(), SignpostError> {
    if let Err(errors) = result {
        match format {
            ValidateFormat::Text => {
                eprintln!("\u{2717} {} has {} errors\n", path.display(), errors.len());
                for error in &errors {
                    eprintln!("{error}");
                }
            }
            ValidateFormat::Json => {
                let json_errors: Vec<Value> = errors
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "location": e.location,
                            "field": e.field,
                            "message": e.message,
                            "suggestion": e.suggestion,
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::json!({
                        "valid": false,
                        "errors": json_errors,
                    })
                );
            }
        }
        return Err(SignpostError::ConfigValidation { errors });
    }

    match format {
        ValidateFormat::Text => println!("\u{2713} {}", text()),
        ValidateFormat::Json => println!("{}", json()),
    }
    Ok(())
}
