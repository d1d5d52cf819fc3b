use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use sqlx::SqlitePool;
use tracing::info;

use crate::db;

const SHOW_RESULTS_KEY: &str = "show_results_to_students";

/// Runtime settings, resolved from flags or the environment.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:votes.db?mode=rwc")]
    pub database_url: String,
    /// URL returning the case catalog as a JSON array
    #[arg(long, env = "CASES_URL")]
    pub cases_url: Option<String>,
    /// Local JSON case catalog, used instead of CASES_URL
    #[arg(long, env = "CASES_FILE", conflicts_with = "cases_url")]
    pub cases_file: Option<PathBuf>,
    #[arg(long, env = "CASES_CACHE_TTL_SECS", default_value_t = 3600)]
    pub cache_ttl_secs: u64,
    #[arg(long, env = "ADMIN_PWD", hide_env_values = true)]
    pub admin_pwd: Option<String>,
}

impl Settings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Settings the admin changes at runtime, persisted in the config table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub show_results_to_students: bool,
}

pub async fn load_app_config(pool: &SqlitePool) -> anyhow::Result<AppConfig> {
    let show_results = db::get_config(pool, SHOW_RESULTS_KEY, "false").await?;
    Ok(AppConfig {
        show_results_to_students: show_results.eq_ignore_ascii_case("true"),
    })
}

pub async fn save_app_config(pool: &SqlitePool, config: &AppConfig) -> anyhow::Result<()> {
    let value = if config.show_results_to_students {
        "true"
    } else {
        "false"
    };
    db::set_config(pool, SHOW_RESULTS_KEY, value).await?;
    info!(show_results_to_students = config.show_results_to_students, "config saved");
    Ok(())
}
