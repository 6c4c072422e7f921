//! Printer configuration.
//!
//! The core only sees [`Device`]s and the [`ConfigStore`] trait. The default
//! store is a TOML file:
//!
//! ```toml
//! [[printers]]
//! host = "octopi.local"
//! backend = "octoprint"
//! api_key = "0123456789ABCDEF"
//! tool_preheat = 215
//! bed_preheat = 60
//!
//! [[printers]]
//! host = "voron.local"
//! backend = "moonraker"
//! jog_speed = 3000
//! webcam = 1
//! ```
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

pub const DEFAULT_JOG_SPEED: u32 = 600;
pub const DEFAULT_JOG_LENGTH: u32 = 10;
pub const JOG_SPEED_RANGE: RangeInclusive<u32> = 1..=6000;
pub const JOG_LENGTH_RANGE: RangeInclusive<u32> = 1..=100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    OctoPrint,
    Moonraker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(SmolStr),
    None,
}

/// One printer endpoint. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Hostname or IP, optionally with `:port`, without scheme.
    pub host: String,
    pub backend: BackendKind,
    pub credential: Credential,
    pub tool_preheat: Option<u32>,
    pub bed_preheat: Option<u32>,
    /// mm/min
    pub jog_speed: u32,
    /// mm
    pub jog_length: u32,
    /// Moonraker only.
    pub webcam_index: usize,
}

impl Device {
    pub fn octoprint(host: impl Into<String>, api_key: impl Into<SmolStr>) -> Self {
        Self {
            host: host.into(),
            backend: BackendKind::OctoPrint,
            credential: Credential::ApiKey(api_key.into()),
            tool_preheat: None,
            bed_preheat: None,
            jog_speed: DEFAULT_JOG_SPEED,
            jog_length: DEFAULT_JOG_LENGTH,
            webcam_index: 0,
        }
    }

    pub fn moonraker(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            backend: BackendKind::Moonraker,
            credential: Credential::None,
            tool_preheat: None,
            bed_preheat: None,
            jog_speed: DEFAULT_JOG_SPEED,
            jog_length: DEFAULT_JOG_LENGTH,
            webcam_index: 0,
        }
    }

    pub fn with_preheat(mut self, tool: Option<u32>, bed: Option<u32>) -> Self {
        self.tool_preheat = tool;
        self.bed_preheat = bed;
        self
    }

    pub fn with_jog(mut self, speed: u32, length: u32) -> Self {
        self.jog_speed = speed;
        self.jog_length = length;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &'static str| {
            Err(ConfigError::Invalid {
                host: self.host.clone(),
                reason,
            })
        };
        if self.host.trim().is_empty() {
            return invalid("host is empty");
        }
        if self.host.contains("://") {
            return invalid("host must not include a scheme");
        }
        match (self.backend, &self.credential) {
            (BackendKind::OctoPrint, Credential::ApiKey(key)) if !key.is_empty() => {}
            (BackendKind::OctoPrint, _) => return invalid("OctoPrint needs an API key"),
            (BackendKind::Moonraker, _) => {}
        }
        if !JOG_SPEED_RANGE.contains(&self.jog_speed) {
            return invalid("jog speed must be within 1-6000 mm/min");
        }
        if !JOG_LENGTH_RANGE.contains(&self.jog_length) {
            return invalid("jog length must be within 1-100 mm");
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to write configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("printer {host:?}: {reason}")]
    Invalid { host: String, reason: &'static str },
}

/// Where the device list lives between runs.
pub trait ConfigStore: Send + Sync {
    fn load_devices(&self) -> Result<Vec<Device>, ConfigError>;
    fn save_devices(&self, devices: &[Device]) -> Result<(), ConfigError>;
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ConfigFile {
    #[serde(default)]
    printers: Vec<PrinterEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
struct PrinterEntry {
    host: String,
    backend: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_preheat: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bed_preheat: Option<u32>,
    #[serde(default = "default_jog_speed")]
    jog_speed: u32,
    #[serde(default = "default_jog_length")]
    jog_length: u32,
    #[serde(default)]
    webcam: usize,
}

fn default_jog_speed() -> u32 {
    DEFAULT_JOG_SPEED
}

fn default_jog_length() -> u32 {
    DEFAULT_JOG_LENGTH
}

impl TryFrom<PrinterEntry> for Device {
    type Error = ConfigError;

    fn try_from(entry: PrinterEntry) -> Result<Self, Self::Error> {
        let credential = match (entry.backend, entry.api_key) {
            (BackendKind::OctoPrint, Some(key)) => Credential::ApiKey(key),
            _ => Credential::None,
        };
        let device = Device {
            host: entry.host,
            backend: entry.backend,
            credential,
            tool_preheat: entry.tool_preheat,
            bed_preheat: entry.bed_preheat,
            jog_speed: entry.jog_speed,
            jog_length: entry.jog_length,
            webcam_index: entry.webcam,
        };
        device.validate()?;
        Ok(device)
    }
}

impl From<&Device> for PrinterEntry {
    fn from(device: &Device) -> Self {
        PrinterEntry {
            host: device.host.clone(),
            backend: device.backend,
            api_key: match &device.credential {
                Credential::ApiKey(key) => Some(key.clone()),
                Credential::None => None,
            },
            tool_preheat: device.tool_preheat,
            bed_preheat: device.bed_preheat,
            jog_speed: device.jog_speed,
            jog_length: device.jog_length,
            webcam: device.webcam_index,
        }
    }
}

/// Picks a device by its position in the list or by host.
pub fn select<'a>(devices: &'a [Device], selector: &str) -> Option<&'a Device> {
    match selector.parse::<usize>() {
        Ok(index) => devices.get(index),
        Err(_) => devices.iter().find(|device| device.host == selector),
    }
}

/// Parses a TOML device list.
pub fn parse_devices(text: &str) -> Result<Vec<Device>, ConfigError> {
    let file: ConfigFile = toml::from_str(text)?;
    file.printers.into_iter().map(Device::try_from).collect()
}

/// Renders a device list as TOML.
pub fn render_devices(devices: &[Device]) -> Result<String, ConfigError> {
    for device in devices {
        device.validate()?;
    }
    let file = ConfigFile {
        printers: devices.iter().map(PrinterEntry::from).collect(),
    };
    Ok(toml::to_string_pretty(&file)?)
}

/// [`ConfigStore`] backed by a TOML file. A missing file is an empty list.
#[derive(Debug, Clone)]
pub struct TomlConfigStore {
    path: PathBuf,
}

impl TomlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$OCTOTRAY_CONFIG`, else `$XDG_CONFIG_HOME/octotray/printers.toml`,
    /// else `$HOME/.config/octotray/printers.toml`.
    pub fn from_env() -> Self {
        if let Some(path) = std::env::var_os("OCTOTRAY_CONFIG") {
            return Self::new(path);
        }
        let config_dir = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| Path::new(&home).join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(config_dir.join("octotray").join("printers.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ConfigStore for TomlConfigStore {
    fn load_devices(&self) -> Result<Vec<Device>, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => parse_devices(&text),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(error) => Err(self.io_error(error)),
        }
    }

    fn save_devices(&self, devices: &[Device]) -> Result<(), ConfigError> {
        let text = render_devices(devices)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        std::fs::write(&self.path, text).map_err(|e| self.io_error(e))
    }
}

/// [`ConfigStore`] kept in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    devices: Mutex<Vec<Device>>,
}

impl InMemoryConfigStore {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices: Mutex::new(devices),
        }
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_devices(&self) -> Result<Vec<Device>, ConfigError> {
        Ok(self
            .devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn save_devices(&self, devices: &[Device]) -> Result<(), ConfigError> {
        for device in devices {
            device.validate()?;
        }
        *self
            .devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = devices.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[printers]]
        host = "octopi.local"
        backend = "octoprint"
        api_key = "0123456789ABCDEF"
        tool_preheat = 215
        bed_preheat = 60

        [[printers]]
        host = "voron.local:7125"
        backend = "moonraker"
        jog_speed = 3000
        jog_length = 50
        webcam = 1
    "#;

    #[test]
    fn parse_sample() {
        let devices = parse_devices(SAMPLE).unwrap();
        assert_eq!(
            devices,
            [
                Device::octoprint("octopi.local", "0123456789ABCDEF").with_preheat(Some(215), Some(60)),
                Device {
                    webcam_index: 1,
                    ..Device::moonraker("voron.local:7125").with_jog(3000, 50)
                },
            ]
        );
    }

    #[test]
    fn octoprint_needs_a_key() {
        let error = parse_devices(
            r#"
            [[printers]]
            host = "octopi"
            backend = "octoprint"
            "#,
        )
        .unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { reason: "OctoPrint needs an API key", .. }));
    }

    #[test]
    fn jog_ranges_are_enforced() {
        assert!(Device::moonraker("voron").with_jog(6000, 100).validate().is_ok());
        assert!(Device::moonraker("voron").with_jog(0, 10).validate().is_err());
        assert!(Device::moonraker("voron").with_jog(6001, 10).validate().is_err());
        assert!(Device::moonraker("voron").with_jog(600, 0).validate().is_err());
        assert!(Device::moonraker("voron").with_jog(600, 101).validate().is_err());
    }

    #[test]
    fn hosts_are_bare() {
        assert!(Device::moonraker("").validate().is_err());
        assert!(Device::moonraker("http://voron").validate().is_err());
    }

    #[test]
    fn unknown_backend_is_a_parse_error() {
        let error = parse_devices(
            r#"
            [[printers]]
            host = "duet"
            backend = "reprapfirmware"
            "#,
        )
        .unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn toml_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlConfigStore::new(dir.path().join("nested").join("printers.toml"));
        assert!(store.load_devices().unwrap().is_empty());

        let devices = parse_devices(SAMPLE).unwrap();
        store.save_devices(&devices).unwrap();
        assert_eq!(store.load_devices().unwrap(), devices);
    }

    #[test]
    fn invalid_devices_are_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlConfigStore::new(dir.path().join("printers.toml"));
        let error = store
            .save_devices(&[Device::moonraker("voron").with_jog(0, 10)])
            .unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { .. }));
        assert!(!store.path().exists());
    }

    #[test]
    fn select_by_index_or_host() {
        let devices = parse_devices(SAMPLE).unwrap();
        assert_eq!(select(&devices, "1").unwrap().host, "voron.local:7125");
        assert_eq!(select(&devices, "octopi.local").unwrap().host, "octopi.local");
        assert!(select(&devices, "2").is_none());
        assert!(select(&devices, "ender").is_none());
    }

    #[test]
    fn in_memory_store() {
        let store = InMemoryConfigStore::default();
        store.save_devices(&[Device::moonraker("voron")]).unwrap();
        assert_eq!(store.load_devices().unwrap(), [Device::moonraker("voron")]);
    }
}
