// Configuration for fatkit: device table plus solver/format knobs.
// Loaded once by the front-end and passed down explicitly.

use crate::device::DeviceDescriptor;
use crate::error::{FatError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DEBUG_FAT: &str = "FATKIT_DEBUG_FAT";
pub const ENV_DEBUG_FAT_SUMMARY: &str = "FATKIT_DEBUG_FAT_SUMMARY";
pub const ENV_DIR_LEN: &str = "FATKIT_DIR_LEN";
pub const ENV_NFATS: &str = "FATKIT_NFATS";

/// Diagnostics switches for the layout solver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Report every (fat bits, cluster size) attempt.
    pub trace_steps: bool,
    /// Report the final layout.
    pub summary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FatkitConfig {
    pub devices: Vec<DeviceDescriptor>,
    pub solver: SolverConfig,
    /// Default root directory length in sectors.
    pub dir_len: Option<u16>,
    /// Default number of FAT copies.
    pub num_fats: Option<u8>,
}

impl FatkitConfig {
    /// Default location: `<config dir>/fatkit/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fatkit").join("config.json"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FatError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Defaults, then the config file if it exists, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(ref p) if p.exists() => {
                debug!("Loading configuration from {}", p.display());
                Self::from_file(p)?
            }
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from an environment lookup. Zero or unparsable sizes are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup(ENV_DEBUG_FAT).is_some() {
            self.solver.trace_steps = true;
        }
        if lookup(ENV_DEBUG_FAT_SUMMARY).is_some() {
            self.solver.summary = true;
        }
        if let Some(dir_len) = lookup(ENV_DIR_LEN).and_then(|v| v.trim().parse::<u16>().ok()) {
            if dir_len > 0 {
                self.dir_len = Some(dir_len);
            }
        }
        if let Some(nfats) = lookup(ENV_NFATS).and_then(|v| v.trim().parse::<u8>().ok()) {
            if nfats > 0 {
                self.num_fats = Some(nfats);
            }
        }
    }

    /// All descriptors configured for `drive`, in table order.
    pub fn devices_for(&self, drive: char) -> Vec<DeviceDescriptor> {
        let drive = drive.to_ascii_uppercase();
        self.devices
            .iter()
            .filter(|d| d.drive.to_ascii_uppercase() == drive)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_DEBUG_FAT, "1"),
            (ENV_DIR_LEN, "0"),
            (ENV_NFATS, "1"),
        ]
        .into_iter()
        .collect();

        let mut config = FatkitConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert!(config.solver.trace_steps);
        assert!(!config.solver.summary);
        assert_eq!(config.dir_len, None);
        assert_eq!(config.num_fats, Some(1));
    }

    #[test]
    fn test_load_device_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"devices":[{{"drive":"a","name":"/dev/fd0","tracks":80,"heads":2,"sectors":18}},
                           {{"drive":"B","name":"b.img"}}],
                "solver":{{"summary":true}}}}"#
        )
        .unwrap();

        let config = FatkitConfig::from_file(file.path()).unwrap();
        assert!(config.solver.summary);
        let a = config.devices_for('A');
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].sectors, 18);
        assert!(config.devices_for('C').is_empty());
    }

    #[test]
    fn test_bad_config_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(
            FatkitConfig::from_file(file.path()),
            Err(FatError::Serialization(_))
        ));
    }
}
