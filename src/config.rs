use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::gateway::{GatewayConfig, DEFAULT_ENDPOINT};
use crate::poller::PollConfig;
use crate::DEFAULT_HISTORY_PATH;

/// Connection and polling flags shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Proxy endpoint that relays requests to the transcription backend
    #[arg(long, env = "SUBTITLE_HELPER_ENDPOINT", default_value = DEFAULT_ENDPOINT, global = true)]
    pub endpoint: String,

    /// Bearer token for the proxy
    #[arg(long, env = "SUBTITLE_HELPER_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// History database directory
    #[arg(long, env = "SUBTITLE_HELPER_HISTORY", default_value = DEFAULT_HISTORY_PATH, global = true)]
    pub history: PathBuf,

    /// Per-request timeout in seconds
    #[arg(long, env = "SUBTITLE_HELPER_TIMEOUT", default_value = "30", global = true)]
    pub request_timeout: u64,

    /// Status checks before a job is considered timed out
    #[arg(long, env = "SUBTITLE_HELPER_MAX_RETRIES", default_value = "45", global = true)]
    pub max_retries: u32,
}

/// Runtime configuration assembled from flags and environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub poll: PollConfig,
    pub history_path: PathBuf,
}

impl From<ConnectionArgs> for AppConfig {
    fn from(args: ConnectionArgs) -> Self {
        Self {
            gateway: GatewayConfig {
                endpoint: args.endpoint,
                api_key: args.api_key,
                request_timeout: Duration::from_secs(args.request_timeout.max(1)),
            },
            poll: PollConfig { max_retries: args.max_retries.max(1), ..PollConfig::default() },
            history_path: args.history,
        }
    }
}
