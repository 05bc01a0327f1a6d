//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::gpio::{MockPinDriver, SharedPinDriver, SysfsPinDriver};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub gpio: GpioConfig,
}

fn default_port() -> u16 {
    8080
}

/// Which pin driver backs the relays
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Sysfs,
    Mock,
}

#[derive(Debug, Deserialize)]
pub struct GpioConfig {
    #[serde(default)]
    pub driver: DriverKind,

    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,

    /// Polarity for relays that don't set `active_low` themselves. Most
    /// Raspberry Pi relay boards switch on when the line is pulled low.
    #[serde(default = "default_active_low")]
    pub active_low: bool,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::default(),
            sysfs_root: default_sysfs_root(),
            active_low: default_active_low(),
        }
    }
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

fn default_active_low() -> bool {
    true
}

impl GpioConfig {
    pub fn build_driver(&self) -> SharedPinDriver {
        match self.driver {
            DriverKind::Sysfs => Arc::new(SysfsPinDriver::new(self.sysfs_root.clone())),
            DriverKind::Mock => Arc::new(MockPinDriver::new()),
        }
    }
}

/// Subdirectory under the platform config root
const CONFIG_SUBDIR_NAME: &str = "pi-relay";

/// Get config directory (PI_RELAY_CONFIG_DIR, XDG_CONFIG_HOME or ~/.config)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PI_RELAY_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join(CONFIG_SUBDIR_NAME);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(CONFIG_SUBDIR_NAME);
    }

    // Fallback to current directory
    PathBuf::from(".")
}

/// Env vars read directly rather than through the `PI_RELAY` source
const DIRECT_ENV_VARS: &[&str] = &["PI_RELAY_PORT", "PI_RELAY_CONFIG_DIR"];

/// Load configuration
///
/// Precedence, highest first: `PI_RELAY_PORT` / `PORT` for the port,
/// `PI_RELAY_*` env vars (`PI_RELAY_GPIO__DRIVER=mock`), `config.{toml,json,yaml}`
/// in the config directory, built-in defaults.
pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let prefixed: ::config::Map<String, String> = std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .filter(|(key, _)| key.starts_with("PI_RELAY_") && !DIRECT_ENV_VARS.contains(&key.as_str()))
        .collect();

    let mut builder = ::config::Config::builder()
        .set_default("port", default_port() as i64)?
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        .add_source(
            ::config::Environment::with_prefix("PI_RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(prefixed)),
        );

    // PI_RELAY_PORT > PORT > config > default
    if let Some(port) = env_port("PI_RELAY_PORT").or_else(|| env_port("PORT")) {
        builder = builder.set_override("port", port as i64)?;
    }

    let config = builder.build()?;

    Ok(config.try_deserialize()?)
}

/// Port from `var`; unparseable values are ignored
fn env_port(var: &str) -> Option<u16> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<u16>() {
        Ok(port) => Some(port),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a port number", var, raw);
            None
        }
    }
}
