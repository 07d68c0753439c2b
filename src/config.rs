//! Environment-driven configuration.
use std::str::FromStr;
use std::time::Duration;

use crate::engine::{DEFAULT_ENGINE_BINARY, Engine};
use crate::service::Settings;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid value for `{name}`: `{value}`")]
    InvalidValue { name: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct Config {
    pub engine: Engine,
    pub listen_addr: String,
    pub settings: Settings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: Engine::default(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_owned(),
            settings: Settings::default(),
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment. Unset variables
    /// keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Settings::default();

        let engine = match lookup("ENGINE_COMMAND") {
            Some(command_line) => {
                Engine::from_command_line(&command_line).ok_or_else(|| Error::InvalidValue {
                    name: "ENGINE_COMMAND",
                    value: command_line,
                })?
            }
            None => Engine::new(DEFAULT_ENGINE_BINARY),
        };
        let include_size = parse_or(&lookup, "ENGINE_LIST_SIZE", true)?;

        let millis = |name: &'static str, default: Duration| -> Result<Duration> {
            let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
            parse_or(&lookup, name, default).map(Duration::from_millis)
        };
        let poll_debounce = millis("POLL_DEBOUNCE_MS", defaults.poll_debounce)?;
        let remove_debounce = millis("REMOVE_DEBOUNCE_MS", defaults.remove_debounce)?;
        let event_restart_delay = millis("EVENT_RESTART_DELAY_MS", defaults.event_restart_delay)?;

        let default_interval = defaults.resync_interval.map_or(0, |interval| interval.as_secs());
        let resync_interval = match parse_or(&lookup, "RESYNC_INTERVAL_SECS", default_interval)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let broadcast_capacity = parse_or(&lookup, "BROADCAST_CAPACITY", defaults.broadcast_capacity)?;
        if broadcast_capacity == 0 {
            return Err(Error::InvalidValue {
                name: "BROADCAST_CAPACITY",
                value: broadcast_capacity.to_string(),
            });
        }

        Ok(Self {
            engine: engine.with_size(include_size),
            listen_addr: lookup("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_owned()),
            settings: Settings {
                poll_debounce,
                remove_debounce,
                event_restart_delay,
                resync_interval,
                broadcast_capacity,
                vocabulary: defaults.vocabulary,
            },
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| Error::InvalidValue { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.engine, Engine::new("podman"));
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
        assert_eq!(config.settings.poll_debounce, Duration::from_millis(500));
        assert_eq!(config.settings.remove_debounce, Duration::from_secs(2));
        assert_eq!(config.settings.event_restart_delay, Duration::from_secs(2));
        assert_eq!(config.settings.resync_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.settings.broadcast_capacity, 64);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("ENGINE_COMMAND", "docker --context remote"),
            ("ENGINE_LIST_SIZE", "false"),
            ("LISTEN_ADDR", "127.0.0.1:8080"),
            ("POLL_DEBOUNCE_MS", "250"),
            ("REMOVE_DEBOUNCE_MS", " 5000 "),
            ("RESYNC_INTERVAL_SECS", "0"),
            ("BROADCAST_CAPACITY", "8"),
        ])
        .unwrap();

        assert_eq!(
            config.engine,
            Engine::new("docker")
                .with_prefix_args(["--context", "remote"])
                .with_size(false)
        );
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.settings.poll_debounce, Duration::from_millis(250));
        assert_eq!(config.settings.remove_debounce, Duration::from_secs(5));
        assert_eq!(config.settings.resync_interval, None);
        assert_eq!(config.settings.broadcast_capacity, 8);
    }

    #[test]
    fn test_invalid_values() {
        match config(&[("POLL_DEBOUNCE_MS", "soon")]) {
            Err(Error::InvalidValue { name, value }) => {
                assert_eq!(name, "POLL_DEBOUNCE_MS");
                assert_eq!(value, "soon");
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
        assert!(config(&[("ENGINE_COMMAND", "   ")]).is_err());
        assert!(config(&[("ENGINE_LIST_SIZE", "maybe")]).is_err());
        assert!(config(&[("BROADCAST_CAPACITY", "0")]).is_err());
    }
}
