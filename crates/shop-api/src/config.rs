//! Process configuration from environment variables.

use shop_types::Tenant;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    /// SQLite file; `None` selects the in-memory stores.
    pub db_path: Option<PathBuf>,
    pub tenants: Vec<Tenant>,
    pub intervals: JobIntervals,
}

/// Scheduler firing intervals.
#[derive(Debug, Clone, Copy)]
pub struct JobIntervals {
    pub cart_pass: Duration,
    pub checkout_pass: Duration,
    pub retention: Duration,
}

impl Default for JobIntervals {
    fn default() -> Self {
        Self {
            cart_pass: Duration::from_secs(60 * 60),
            checkout_pass: Duration::from_secs(2 * 60 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let listen = get("SHOP_LISTEN")
            .unwrap_or_else(|| "0.0.0.0:3001".to_string())
            .parse()
            .map_err(|_| "SHOP_LISTEN must be a socket address".to_string())?;

        let db_path = get("SHOP_DB_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let tenants = match get("SHOP_TENANTS") {
            Some(raw) => parse_tenants(&raw)?,
            None => Vec::new(),
        };

        let defaults = JobIntervals::default();
        let intervals = JobIntervals {
            cart_pass: secs(&get, "SHOP_CART_PASS_INTERVAL_SECS", defaults.cart_pass)?,
            checkout_pass: secs(&get, "SHOP_CHECKOUT_PASS_INTERVAL_SECS", defaults.checkout_pass)?,
            retention: secs(&get, "SHOP_RETENTION_INTERVAL_SECS", defaults.retention)?,
        };

        Ok(Config {
            listen,
            db_path,
            tenants,
            intervals,
        })
    }
}

fn secs(get: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Result<Duration, String> {
    match get(key) {
        None => Ok(default),
        Some(v) => match v.trim().parse::<u64>() {
            Ok(n) if n > 0 => Ok(Duration::from_secs(n)),
            _ => Err(format!("{key} must be a positive integer")),
        },
    }
}

/// `id=shop-domain[,id=shop-domain...]`
fn parse_tenants(raw: &str) -> Result<Vec<Tenant>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (id, domain) = pair
                .split_once('=')
                .map(|(i, d)| (i.trim(), d.trim()))
                .filter(|(i, d)| !i.is_empty() && !d.is_empty())
                .ok_or_else(|| format!("SHOP_TENANTS entry `{pair}` must be id=shop-domain"))?;
            Ok(Tenant {
                id: id.to_string(),
                name: domain.to_string(),
                shopify_url: domain.to_string(),
            })
        })
        .collect()
}
