use std::{fmt::Display, str::FromStr, time::Duration};

use anyhow::anyhow;

use crate::{filter::DEFAULT_BANNED_WORDS, geo::Partitioning};

/// Knobs for the room broker. Defaults mirror the behaviour users know from the web relay.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub message_ttl: Duration,
    pub max_message_chars: usize,
    pub report_threshold: u32,
    pub ban_days: u32,
    /// Time a banned connection gets to receive its notice before being dropped.
    pub ban_disconnect_grace: Duration,
    /// Jitter applied to locations in the nearby list. Zero sends them as reported.
    pub location_jitter_meters: f64,
    pub banned_words: Vec<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            message_ttl: Duration::from_secs(24 * 60 * 60),
            max_message_chars: 500,
            report_threshold: 7,
            ban_days: 7,
            ban_disconnect_grace: Duration::from_secs(3),
            location_jitter_meters: 100.0,
            banned_words: DEFAULT_BANNED_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub sweep_interval: Duration,
    pub partitioning: Partitioning,
    pub broker: BrokerSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3001".to_owned(),
            sweep_interval: Duration::from_secs(60 * 60),
            partitioning: Partitioning::default(),
            broker: BrokerSettings::default(),
        }
    }
}

impl Config {
    /// Reads `GEOCHAT_*` variables, loading `.env` first if there is one.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Config::default();
        let broker = defaults.broker;

        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let banned_words = match get("GEOCHAT_BANNED_WORDS") {
            Some(list) => list.split(',').map(|w| w.trim().to_owned()).filter(|w| !w.is_empty()).collect(),
            None => broker.banned_words,
        };

        let config = Config {
            bind_addr: get("GEOCHAT_BIND_ADDR").unwrap_or(defaults.bind_addr),
            sweep_interval: secs(&get, "GEOCHAT_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            partitioning: parsed(&get, "GEOCHAT_PARTITION", defaults.partitioning)?,
            broker: BrokerSettings {
                message_ttl: secs(&get, "GEOCHAT_MESSAGE_TTL_SECS", broker.message_ttl)?,
                max_message_chars: parsed(&get, "GEOCHAT_MAX_MESSAGE_CHARS", broker.max_message_chars)?,
                report_threshold: parsed(&get, "GEOCHAT_REPORT_THRESHOLD", broker.report_threshold)?,
                ban_days: parsed(&get, "GEOCHAT_BAN_DAYS", broker.ban_days)?,
                ban_disconnect_grace: secs(&get, "GEOCHAT_BAN_DISCONNECT_GRACE_SECS", broker.ban_disconnect_grace)?,
                location_jitter_meters: parsed(&get, "GEOCHAT_LOCATION_JITTER_METERS", broker.location_jitter_meters)?,
                banned_words,
            },
        };

        if config.sweep_interval.is_zero() {
            return Err(anyhow!("GEOCHAT_SWEEP_INTERVAL_SECS must be positive"));
        }
        if config.broker.report_threshold == 0 {
            return Err(anyhow!("GEOCHAT_REPORT_THRESHOLD must be positive"));
        }
        if !(config.broker.location_jitter_meters.is_finite() && config.broker.location_jitter_meters >= 0.0) {
            return Err(anyhow!("GEOCHAT_LOCATION_JITTER_METERS must be a non-negative number"));
        }

        Ok(config)
    }
}

fn parsed<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e| anyhow!("invalid {key}={raw:?}: {e}")),
        None => Ok(default),
    }
}

fn secs(get: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> anyhow::Result<Duration> {
    parsed(get, key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3001");
        assert_eq!(config.broker.max_message_chars, 500);
        assert_eq!(config.broker.report_threshold, 7);
        assert_eq!(config.broker.message_ttl, Duration::from_secs(86_400));
        assert_eq!(config.sweep_interval, Duration::from_secs(3_600));
        assert_eq!(config.partitioning, Partitioning::default());
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("GEOCHAT_BIND_ADDR", "127.0.0.1:9000"),
            ("GEOCHAT_PARTITION", "geohash:7"),
            ("GEOCHAT_BANNED_WORDS", "foo, bar ,,"),
            ("GEOCHAT_MESSAGE_TTL_SECS", "60"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.partitioning, Partitioning::Geohash { precision: 7 });
        assert_eq!(config.broker.banned_words, vec!["foo", "bar"]);
        assert_eq!(config.broker.message_ttl, Duration::from_secs(60));
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = Config::from_lookup(lookup(&[("GEOCHAT_MAX_MESSAGE_CHARS", "lots")])).unwrap_err();
        assert!(err.to_string().contains("GEOCHAT_MAX_MESSAGE_CHARS"));

        assert!(Config::from_lookup(lookup(&[("GEOCHAT_REPORT_THRESHOLD", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("GEOCHAT_PARTITION", "hex")])).is_err());
    }
}
