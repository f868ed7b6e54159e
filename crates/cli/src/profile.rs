//! Who the CLI acts as and where it connects.
//!
//! Resolution order per field: command-line flag, then environment variable
//! (both handled by clap), then `~/.consultline/config.toml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use consultline_client::{HttpConsultationApi, SessionConfig};
use consultline_protocol::{Principal, PrincipalId, Role};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";

/// Connection flags shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct ProfileArgs {
    /// Base URL of the consultation backend (http or https).
    #[arg(long, env = "CONSULTLINE_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// Bearer token presented to the broker and the REST API.
    #[arg(long, env = "CONSULTLINE_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Principal id to act as.
    #[arg(long, env = "CONSULTLINE_USER_ID", global = true)]
    pub user_id: Option<PrincipalId>,

    /// END_USER, CONSULTANT or ADMIN.
    #[arg(long, env = "CONSULTLINE_ROLE", global = true)]
    pub role: Option<Role>,

    /// Alternate config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileFile {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub user_id: Option<PrincipalId>,
    pub role: Option<String>,
}

impl ProfileFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub endpoint: String,
    pub token: Option<String>,
    pub principal: Principal,
}

impl Profile {
    pub fn resolve(args: &ProfileArgs, data_dir: &Path) -> anyhow::Result<Self> {
        let path = args
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join(CONFIG_FILE));
        let file = ProfileFile::load(&path)?;
        Self::merge(args, file)
    }

    fn merge(args: &ProfileArgs, file: ProfileFile) -> anyhow::Result<Self> {
        let endpoint = args
            .endpoint
            .clone()
            .or(file.endpoint)
            .context("no endpoint: pass --endpoint or set CONSULTLINE_ENDPOINT")?;
        let user_id = args
            .user_id
            .or(file.user_id)
            .context("no user id: pass --user-id or set CONSULTLINE_USER_ID")?;
        let role = match (args.role, file.role) {
            (Some(role), _) => role,
            (None, Some(raw)) => raw.parse().map_err(anyhow::Error::msg)?,
            (None, None) => Role::EndUser,
        };

        Ok(Self {
            endpoint,
            token: args.token.clone().or(file.token),
            principal: Principal::new(user_id, role),
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.endpoint.clone(), self.principal, self.token.clone())
    }

    pub fn api(&self) -> Arc<HttpConsultationApi> {
        Arc::new(HttpConsultationApi::new(
            self.endpoint.clone(),
            self.token.clone(),
        ))
    }
}

/// `~/.consultline`, or `CONSULTLINE_HOME` when set.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CONSULTLINE_HOME") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".consultline")
}
