//! The unit exchanged between providers and the configuration watcher.

use serde::{Deserialize, Serialize};

use super::Configuration;

/// One provider's complete view of the world at a point in time.
///
/// Ownership moves into the channel on send; the watcher replaces the
/// provider's previous contribution with it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfigMessage {
    pub provider_name: String,
    pub configuration: Configuration,
}

impl ConfigMessage {
    #[must_use]
    pub fn new(provider_name: impl Into<String>, configuration: Configuration) -> Self {
        Self {
            provider_name: provider_name.into(),
            configuration,
        }
    }
}
