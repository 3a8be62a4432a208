use crate::prelude::*;

use serde::Deserialize;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub chargers: Vec<Charger>,

    #[serde(default = "Config::default_listen_port")]
    pub listen_port: u16,

    /// Seconds between status polls.
    #[serde(default = "Config::default_poll_interval")]
    pub poll_interval: u64,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Charger {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Charger {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub name: String,
    /// host[:port]
    pub uri: String,
    pub serial: Option<String>,
    pub timeout_ms: Option<u64>,
    pub rfid: Option<Rfid>,
}
impl Charger {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// `uri` with the protocol port filled in when it has none.
    pub fn host_port(&self) -> String {
        default_port(&self.uri, keba::PORT)
    }

    pub async fn addr(&self) -> Result<SocketAddr> {
        let host_port = self.host_port();
        let addr = tokio::net::lookup_host(&host_port)
            .await
            .map_err(|err| anyhow!("charger {}: cannot resolve {}: {}", self.name, host_port, err))?
            .next();

        addr.ok_or_else(|| anyhow!("charger {}: {} resolved to nothing", self.name, host_port))
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref().filter(|s| !s.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(1000))
    }

    pub fn rfid(&self) -> Option<&Rfid> {
        self.rfid.as_ref()
    }
} // }}}

// Rfid {{{
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Rfid {
    #[serde(default)]
    pub tag: String,
    pub class: Option<String>,
}
impl Rfid {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            class: None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn class(&self) -> Option<&str> {
        self.class.as_deref().filter(|c| !c.is_empty())
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        Ok(Self::from_config(Config::new(file)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Config> {
        self.config
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn chargers(&self) -> Vec<Charger> {
        self.lock().chargers.clone()
    }

    pub fn enabled_chargers(&self) -> Vec<Charger> {
        self.chargers().into_iter().filter(|c| c.enabled()).collect()
    }

    pub fn charger_with_name(&self, name: &str) -> Option<Charger> {
        self.chargers().into_iter().find(|c| c.name() == name)
    }

    pub fn listen_port(&self) -> u16 {
        self.lock().listen_port
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.lock().poll_interval)
    }

    pub fn loglevel(&self) -> String {
        self.lock().loglevel.clone()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        let config = Self::from_yaml(&content)?;

        info!("Configuration loaded successfully:");
        info!("  Listen port: {}", config.listen_port);
        info!("  Poll interval: {}s", config.poll_interval);
        info!(
            "  Chargers: {} configured, {} enabled",
            config.chargers.len(),
            config.chargers.iter().filter(|c| c.enabled).count()
        );
        for (i, charger) in config.chargers.iter().enumerate() {
            info!("    Charger[{}]:", i);
            info!("      Name: {}", charger.name);
            info!("      Enabled: {}", charger.enabled);
            info!("      Address: {} ({})", charger.uri(), charger.host_port());
            info!("      Serial: {}", charger.serial().unwrap_or_default());
            info!("      Timeout: {}ms", charger.timeout().as_millis());
            info!("      RFID: {}", if charger.rfid.is_some() { "configured" } else { "none" });
        }
        info!("  Log Level: {}", config.loglevel);

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval == 0 {
            bail!("poll_interval must be at least 1 second");
        }

        let mut names = HashSet::new();
        for (i, charger) in self.chargers.iter().enumerate() {
            if charger.name.is_empty() {
                bail!("charger[{}].name cannot be empty", i);
            }
            if !names.insert(charger.name.as_str()) {
                bail!("charger[{}].name {} is used more than once", i, charger.name);
            }
            if charger.uri.is_empty() {
                bail!("charger[{}].uri cannot be empty", i);
            }
            if charger.timeout_ms == Some(0) {
                bail!("charger[{}].timeout_ms must be greater than 0", i);
            }
        }

        Ok(())
    }

    fn default_listen_port() -> u16 {
        keba::PORT
    }

    fn default_poll_interval() -> u64 {
        30
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

/// Append `port` to `uri` unless it already names one.
pub fn default_port(uri: &str, port: u16) -> String {
    if uri.parse::<SocketAddr>().is_ok() {
        return uri.to_string();
    }

    if let Ok(ip) = uri.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return SocketAddr::new(ip, port).to_string();
    }

    match uri.rsplit_once(':') {
        Some((_, p)) if p.parse::<u16>().is_ok() => uri.to_string(),
        _ => format!("{}:{}", uri, port),
    }
}
