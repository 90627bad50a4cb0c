//! Server configuration: an optional TOML file plus flag/env overrides.

use std::path::Path;

use anyhow::Context;
use ride_core::config::DispatchConfig;
use ride_core::routing::DistanceProviderKind;
use ride_core::scoring::ScorerKind;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_BIND: &str = "0.0.0.0:5000";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub dispatch: DispatchConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    /// Address the HTTP and websocket listener binds to.
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub distance: DistanceProviderKind,
    pub scorer: ScorerKind,
}

/// Values given on the command line or in the environment. They win over the
/// file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<String>,
    pub osrm_endpoint: Option<String>,
    pub scorer_endpoint: Option<String>,
}

impl ServerConfig {
    /// Reads `path` when it exists; a missing file means defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply(&mut self, overrides: Overrides) -> anyhow::Result<()> {
        if let Some(bind) = overrides.bind {
            self.server.bind = bind;
        }
        if let Some(endpoint) = overrides.osrm_endpoint {
            self.providers.distance = osrm_provider(endpoint)?;
        }
        if let Some(endpoint) = overrides.scorer_endpoint {
            self.providers.scorer = remote_scorer(endpoint)?;
        }
        Ok(())
    }
}

#[cfg(feature = "osrm")]
fn osrm_provider(endpoint: String) -> anyhow::Result<DistanceProviderKind> {
    Ok(DistanceProviderKind::Osrm {
        endpoint,
        fallback_to_haversine: true,
    })
}

#[cfg(not(feature = "osrm"))]
fn osrm_provider(_endpoint: String) -> anyhow::Result<DistanceProviderKind> {
    anyhow::bail!("an OSRM endpoint was given but ride_server was built without the `osrm` feature")
}

#[cfg(feature = "remote-scorer")]
fn remote_scorer(endpoint: String) -> anyhow::Result<ScorerKind> {
    Ok(ScorerKind::Remote { endpoint })
}

#[cfg(not(feature = "remote-scorer"))]
fn remote_scorer(_endpoint: String) -> anyhow::Result<ScorerKind> {
    anyhow::bail!("a scorer endpoint was given but ride_server was built without the `remote-scorer` feature")
}
