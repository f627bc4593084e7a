use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub event_channel_capacity: usize,
    pub gc_retention_days: i64,
    pub gc_interval: Duration,
    /// Usernames guaranteed to exist as officials at start-up.
    pub bootstrap_officials: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self, String> {
        Ok(Self {
            port: try_load("PORT", "3001")?,
            database_path: try_load("DATABASE_PATH", "barangay_server.db")?,
            event_channel_capacity: try_load("EVENT_CHANNEL_CAPACITY", "100")?,
            gc_retention_days: try_load("GC_RETENTION_DAYS", "30")?,
            gc_interval: Duration::from_secs(try_load("GC_INTERVAL_SECS", "86400")?),
            bootstrap_officials: username_list(&try_load::<String>("BOOTSTRAP_OFFICIALS", "")?),
        })
    }

    pub fn addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn username_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, String>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        format!("invalid {key} value '{raw}': {e}")
    })
}
