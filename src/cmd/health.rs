//! `signpost health`: check the health of a running instance.
//!
//! Sends a `GET /health` request to the specified URL and displays
//! the response as formatted text or raw JSON.

use std::time::Duration;

use crate::cli::HealthArgs;
use crate::error::SignpostError;
use crate::health::HealthResponse;
use crate::http_client;

pub async fn execute(args: HealthArgs) -> Result<(), SignpostError> {
    let url = format!("{}/health", args.url.trim_end_matches('/'));
    url.parse::<hyper::Uri>()
        .map_err(|e| SignpostError::UriParse {
            source: Box::new(e),
        })?;

    let client = http_client::build_http_client();
    let response = http_client::get(&client, &url, &[], Duration::from_secs(10))
        .await
        .map_err(|source| SignpostError::HttpRequest { source })?;

    if !response.status.is_success() {
        return Err(SignpostError::HealthCheckFailed(response.status));
    }

    if args.json {
        println!("{}", String::from_utf8_lossy(&response.body));
        return Ok(());
    }

    match serde_json::from_slice::<HealthResponse>(&response.body) {
        Ok(health) => {
            let uptime = format_uptime(health.uptime_seconds);
            println!("\u{2713} signpost is healthy ({})", args.url);
            println!("  uptime:         {uptime}");
            println!("  version:        {} [{}]", health.version, health.build);
            println!("  providers:      {}", health.providers.join(", "));
            println!(
                "  config version: {} (loaded {}s ago, {} reloads)",
                health.config.version, health.config.loaded_ago_seconds, health.config.reloads
            );
            println!(
                "  routing:        {} frontends, {} backends",
                health.config.frontends, health.config.backends
            );
        }
        Err(e) => {
            eprintln!("Failed to parse health response: {e}");
            println!("{}", String::from_utf8_lossy(&response.body));
        }
    }

    Ok(())
}

fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
