use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::csw::DEFAULT_ENDPOINT;
use crate::error::CollocateError;

pub const CONFIG_FILE: &str = "sat-collocate.json";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollocateConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_norkyst_path")]
    pub norkyst_path: String,
    #[serde(default = "default_norkyst_prefile")]
    pub norkyst_prefile: String,
    #[serde(default = "default_met_nordic_path")]
    pub met_nordic_path: String,
    #[serde(default = "default_met_nordic_prefile")]
    pub met_nordic_prefile: String,
    #[serde(default)]
    pub norkyst_output: Option<String>,
    #[serde(default)]
    pub met_nordic_output: Option<String>,
}

impl Default for CollocateConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            norkyst_path: default_norkyst_path(),
            norkyst_prefile: default_norkyst_prefile(),
            met_nordic_path: default_met_nordic_path(),
            met_nordic_prefile: default_met_nordic_prefile(),
            norkyst_output: None,
            met_nordic_output: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file. An explicit path must be readable; without
    /// one, a missing sat-collocate.json in the working directory falls back
    /// to the defaults, since every key has one.
    pub fn resolve(path: Option<&str>) -> Result<CollocateConfig, CollocateError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(CollocateConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CollocateError::ConfigRead(config_path.clone()))?;
        let config: CollocateConfig = serde_json::from_str(&content)
            .map_err(|err| CollocateError::ConfigParse(err.to_string()))?;
        Ok(config)
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_norkyst_path() -> String {
    "https://thredds.met.no/thredds/dodsC/fou-hi/norkyst800m-1h".to_string()
}

fn default_norkyst_prefile() -> String {
    "NorKyst-800m_ZDEPTHS_his.an".to_string()
}

fn default_met_nordic_path() -> String {
    "https://thredds.met.no/thredds/dodsC/metpparchivev3".to_string()
}

fn default_met_nordic_prefile() -> String {
    "met_analysis_1_0km_nordic".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config: CollocateConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.endpoint, "https://data.csw.met.no");
        assert_eq!(
            config.norkyst_path,
            "https://thredds.met.no/thredds/dodsC/fou-hi/norkyst800m-1h"
        );
        assert_eq!(config.norkyst_prefile, "NorKyst-800m_ZDEPTHS_his.an");
        assert_eq!(
            config.met_nordic_path,
            "https://thredds.met.no/thredds/dodsC/metpparchivev3"
        );
        assert_eq!(config.met_nordic_prefile, "met_analysis_1_0km_nordic");
        assert_eq!(config.norkyst_output, None);
        assert_eq!(config.met_nordic_output, None);
    }

    #[test]
    fn explicit_keys_override_defaults() {
        let config: CollocateConfig = serde_json::from_str(
            r#"{
                "endpoint": "https://csw.example.org",
                "norkyst_path": "https://thredds.met.no/thredds/fileServer/fou-hi/norkyst800m-1h",
                "norkyst_output": "/tmp/norkyst"
            }"#,
        )
        .unwrap();
        assert_eq!(config.endpoint, "https://csw.example.org");
        assert_eq!(
            config.norkyst_path,
            "https://thredds.met.no/thredds/fileServer/fou-hi/norkyst800m-1h"
        );
        assert_eq!(config.norkyst_output.as_deref(), Some("/tmp/norkyst"));
        // Untouched keys keep their defaults.
        assert_eq!(config.met_nordic_prefile, "met_analysis_1_0km_nordic");
    }
}
