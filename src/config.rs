//! Configuration: CLI flags with env-var fallback (§6), plus the
//! declarative backend-list file.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use toolhost::BackendDescriptor;

use crate::error::GatewayError;

#[derive(Debug, Parser, Clone)]
#[command(name = "toolproxy", about = "Agentic tool-calling reverse proxy")]
pub struct Config {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "DEBUG", default_value_t = false)]
    pub debug: bool,

    #[arg(long, env = "UPSTREAM_BASE_URL")]
    pub upstream_base_url: String,

    #[arg(long, env = "UPSTREAM_API_KEY")]
    pub upstream_api_key: Option<String>,

    #[arg(long, env = "MAX_TOOL_ROUNDS", default_value_t = 5)]
    pub max_tool_rounds: u32,

    #[arg(long, env = "TOOL_EXECUTION_TIMEOUT", default_value_t = 30)]
    pub tool_execution_timeout: u64,

    #[arg(long, env = "ENABLE_HYBRID_STREAMING", default_value_t = false)]
    pub enable_hybrid_streaming: bool,

    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 300)]
    pub request_timeout: u64,

    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 100)]
    pub max_connections: usize,

    #[arg(long, env = "MAX_KEEPALIVE_CONNECTIONS", default_value_t = 20)]
    pub max_keepalive_connections: usize,

    #[arg(long, env = "BACKEND_LIST_PATH")]
    pub backend_list_path: Option<PathBuf>,
}

impl Config {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if reqwest::Url::parse(&self.upstream_base_url).is_err() {
            return Err(GatewayError::ConfigInvalid(format!(
                "UPSTREAM_BASE_URL is not a valid URL: {}",
                self.upstream_base_url
            )));
        }
        Ok(())
    }

    /// Load the declarative backend list. Absent file -> empty catalog,
    /// per §6 ("orchestrator degenerates into a transparent proxy").
    pub fn load_backends(&self) -> Result<Vec<BackendDescriptor>, GatewayError> {
        let Some(path) = &self.backend_list_path else {
            return Ok(Vec::new());
        };
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::ConfigInvalid(format!("reading backend list {}: {e}", path.display()))
        })?;
        let parsed: BackendListFile = serde_yaml::from_str(&raw).map_err(|e| {
            GatewayError::ConfigInvalid(format!("parsing backend list {}: {e}", path.display()))
        })?;
        Ok(parsed
            .into_iter()
            .map(|(name, entry)| BackendDescriptor {
                name,
                command: entry.command,
                args: entry.args,
                env: entry.env,
                workdir: entry.workdir.map(PathBuf::from),
            })
            .collect())
    }
}

/// `name -> { transport, command, args, env, description }`.
type BackendListFile = HashMap<String, BackendListEntry>;

#[derive(Debug, Deserialize)]
struct BackendListEntry {
    #[serde(default = "default_transport")]
    #[allow(dead_code)]
    transport: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

fn default_transport() -> String {
    "stdio".to_string()
}
