//! Debugger configuration.
//!
//! Defaults can be overridden from the environment:
//!
//! - `DEBUGBOX_LISTEN`: address the controller endpoint listens on
//! - `DEBUGBOX_SKIP_IRQ_HANDLERS`: run hardware interrupt handlers at full
//!   speed while stopped, off by default (`1`/`true`/`yes`/`on` or `0`/`false`/`no`/`off`)
//! - `DEBUGBOX_MEMORY_KB`: guest memory size of the reference machine
//!
//! The binary applies its command line flags on top.

use std::env;

use thiserror::Error;

/// Default controller endpoint.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:5455";

/// Default guest memory size in KiB (real mode address space).
pub const DEFAULT_MEMORY_KB: usize = 1024;

/// Errors raised while reading the configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError
{
    /// An environment variable holds a value that cannot be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue
    {
        var: &'static str, value: String
    },
}

/// Runtime settings of the debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugConfig
{
    /// Socket address of the controller endpoint.
    pub listen: String,
    /// When a hardware interrupt handler starts while the guest is stopped,
    /// let it run and stop again when it returns. Off by default: every tick
    /// then serves the controller, and handlers can be stepped into.
    pub skip_interrupt_handlers: bool,
    /// Guest memory of the reference machine, in KiB.
    pub memory_kb: usize,
}

impl Default for DebugConfig
{
    fn default() -> Self
    {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            skip_interrupt_handlers: false,
            memory_kb: DEFAULT_MEMORY_KB,
        }
    }
}

impl DebugConfig
{
    /// Defaults overridden by the `DEBUGBOX_*` environment variables.
    ///
    /// ## Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a variable is set but
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError>
    {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Same as [`DebugConfig::from_env`] with a custom variable source.
    ///
    /// ## Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError>
    {
        let mut config = Self::default();
        if let Some(listen) = lookup("DEBUGBOX_LISTEN") {
            config.listen = listen;
        }
        if let Some(value) = lookup("DEBUGBOX_SKIP_IRQ_HANDLERS") {
            config.skip_interrupt_handlers = parse_bool("DEBUGBOX_SKIP_IRQ_HANDLERS", &value)?;
        }
        if let Some(value) = lookup("DEBUGBOX_MEMORY_KB") {
            config.memory_kb = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: "DEBUGBOX_MEMORY_KB",
                value,
            })?;
        }
        Ok(config)
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError>
{
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_defaults_without_env()
    {
        let config = DebugConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, DebugConfig::default());
        assert!(!config.skip_interrupt_handlers);
    }

    #[test]
    fn test_overrides()
    {
        let config = DebugConfig::from_lookup(|var| match var {
            "DEBUGBOX_LISTEN" => Some("0.0.0.0:9000".to_string()),
            "DEBUGBOX_SKIP_IRQ_HANDLERS" => Some("On".to_string()),
            "DEBUGBOX_MEMORY_KB" => Some("640".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert!(config.skip_interrupt_handlers);
        assert_eq!(config.memory_kb, 640);
    }

    #[test]
    fn test_invalid_values()
    {
        let err = DebugConfig::from_lookup(|var| (var == "DEBUGBOX_MEMORY_KB").then(|| "lots".to_string())).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "DEBUGBOX_MEMORY_KB",
                value: "lots".to_string(),
            }
        );
        assert!(DebugConfig::from_lookup(|var| (var == "DEBUGBOX_SKIP_IRQ_HANDLERS").then(|| "maybe".to_string())).is_err());
    }
}
