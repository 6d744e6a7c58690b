//! Settings store
//!
//! Last used port parameters and line ending, kept as YAML.

use crate::link::{Handshake, LineEnding, Parity, PortSettings, StopBits};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Default location of the settings file, relative to the working directory.
pub const DEFAULT_SETTINGS_PATH: &str = "comconsole.yaml";

/// Default location of the hotkey store, relative to the working directory.
pub const DEFAULT_HOTKEYS_PATH: &str = "hotkeys.dat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: String,
    pub rate: u32,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub handshake: Handshake,
    pub append: LineEnding,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::from_port(&PortSettings::default(), LineEnding::Nothing)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    IO(#[from] io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Settings {
    pub fn from_port(port: &PortSettings, append: LineEnding) -> Settings {
        Settings {
            port: port.port.clone(),
            rate: port.rate,
            data_bits: port.data_bits,
            stop_bits: port.stop_bits,
            parity: port.parity,
            handshake: port.handshake,
            append,
        }
    }

    pub fn port_settings(&self) -> PortSettings {
        PortSettings {
            port: self.port.clone(),
            rate: self.rate,
            parity: self.parity,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            handshake: self.handshake,
        }
    }

    /// Replaces the port parameters, keeping the line ending.
    pub fn set_port(&mut self, port: &PortSettings) {
        *self = Settings::from_port(port, self.append);
    }

    pub fn load(path: &Path) -> Result<Settings, SettingsError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Loads `path`, falling back to defaults. Only an unreadable or
    /// malformed file is logged; a missing one is the first run.
    pub fn load_or_default(path: &Path) -> Settings {
        match Settings::load(path) {
            Ok(settings) => settings,
            Err(SettingsError::IO(e)) if e.kind() == io::ErrorKind::NotFound => {
                Settings::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring settings file");
                Settings::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        let settings = Settings {
            port: "/dev/ttyUSB1".to_string(),
            rate: 115200,
            data_bits: 7,
            stop_bits: StopBits::Two,
            parity: Parity::Even,
            handshake: Handshake::XOnXOff,
            append: LineEnding::CRLF,
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(&path, "port: COM3\nappend: LF\n").unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.port, "COM3");
        assert_eq!(settings.append, LineEnding::LF);
        assert_eq!(settings.rate, 9600);
        assert_eq!(settings.stop_bits, StopBits::One);
    }

    #[test]
    fn bad_or_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            Settings::load_or_default(&dir.path().join("none.yaml")),
            Settings::default()
        );
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "rate: [fast").unwrap();
        assert!(Settings::load(&path).is_err());
        assert_eq!(Settings::load_or_default(&path), Settings::default());
    }

    #[test]
    fn port_settings_round_trip() {
        let mut settings = Settings::default();
        settings.append = LineEnding::CR;
        let port = PortSettings {
            port: "COM7".to_string(),
            rate: 57600,
            ..PortSettings::default()
        };
        settings.set_port(&port);
        assert_eq!(settings.port_settings(), port);
        assert_eq!(settings.append, LineEnding::CR);
    }
}
