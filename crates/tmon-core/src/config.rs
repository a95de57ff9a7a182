use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    errors::Error,
    reconcile, resolver,
    scheduler::{self, SchedulerSettings},
    service::ServiceSettings,
    supervisor, Result,
};

pub const DEFAULT_BOT_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_PAGE_SIZE: usize = 5;

/// Typed configuration for the monitor, read from `TMON_*` environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    // Identities
    pub monitor_bot_token: String,
    pub operator_bot_token: String,
    pub owner_id: i64,
    pub bot_api_url: String,

    // Persistence
    pub settings_file: PathBuf,

    // Reactions
    pub reaction_delay: Duration,
    pub reaction_emoji: String,
    pub processed_cap: usize,

    // Resolution
    pub cache_ttl: Duration,
    pub resolve_retries: u32,

    // Loops
    pub reconcile_interval: Duration,
    pub supervisor_interval: Duration,
    pub housekeeping_interval: Duration,

    // Operator menu
    pub page_size: usize,
}

impl Config {
    /// Load from the process environment, after applying `.env` if present.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    /// Build from any key lookup; `load` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let monitor_bot_token = required(&get, "TMON_MONITOR_BOT_TOKEN")?;
        let operator_bot_token = required(&get, "TMON_OPERATOR_BOT_TOKEN")?;
        let owner_raw = required(&get, "TMON_OWNER_ID")?;
        let owner_id = owner_raw.trim().parse::<i64>().map_err(|_| {
            Error::Config(format!("TMON_OWNER_ID must be a numeric user id, got {owner_raw:?}"))
        })?;

        let bot_api_url = get("TMON_BOT_API_URL")
            .and_then(non_empty)
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BOT_API_URL.to_string());

        let settings_file = PathBuf::from(
            get("TMON_SETTINGS_FILE")
                .and_then(non_empty)
                .unwrap_or_else(|| "monitor_settings.json".to_string()),
        );

        let reaction_delay = secs(&get, "TMON_REACTION_DELAY_SECS", scheduler::DEFAULT_DELAY);
        let reaction_emoji = get("TMON_REACTION_EMOJI")
            .and_then(non_empty)
            .unwrap_or_else(|| scheduler::DEFAULT_EMOJI.to_string());
        let processed_cap = parse::<usize>(&get, "TMON_PROCESSED_CAP")
            .filter(|n| *n > 0)
            .unwrap_or(scheduler::DEFAULT_PROCESSED_CAP);

        let cache_ttl = secs(&get, "TMON_CACHE_TTL_SECS", resolver::DEFAULT_TTL);
        let resolve_retries = parse::<u32>(&get, "TMON_RESOLVE_RETRIES")
            .filter(|n| *n > 0)
            .unwrap_or(resolver::DEFAULT_MAX_RETRIES);

        let reconcile_interval = secs(
            &get,
            "TMON_RECONCILE_INTERVAL_SECS",
            reconcile::DEFAULT_INTERVAL,
        );
        let supervisor_interval = secs(
            &get,
            "TMON_SUPERVISOR_INTERVAL_SECS",
            supervisor::DEFAULT_INTERVAL,
        );
        let housekeeping_interval = secs(
            &get,
            "TMON_HOUSEKEEPING_INTERVAL_SECS",
            scheduler::DEFAULT_HOUSEKEEPING_INTERVAL,
        );

        let page_size = parse::<usize>(&get, "TMON_PAGE_SIZE")
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);

        Ok(Self {
            monitor_bot_token,
            operator_bot_token,
            owner_id,
            bot_api_url,
            settings_file,
            reaction_delay,
            reaction_emoji,
            processed_cap,
            cache_ttl,
            resolve_retries,
            reconcile_interval,
            supervisor_interval,
            housekeeping_interval,
            page_size,
        })
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            settings_file: self.settings_file.clone(),
            scheduler: SchedulerSettings {
                delay: self.reaction_delay,
                processed_cap: self.processed_cap,
                emoji: self.reaction_emoji.clone(),
            },
            cache_ttl: self.cache_ttl,
            resolve_retries: self.resolve_retries,
            reconcile_interval: self.reconcile_interval,
            supervisor_interval: self.supervisor_interval,
            housekeeping_interval: self.housekeeping_interval,
        }
    }
}

fn required(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    get(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn parse<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.trim().parse::<T>().ok())
}

fn secs(get: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    parse::<u64>(get, key)
        .filter(|n| *n > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
