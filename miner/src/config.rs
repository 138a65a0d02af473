use std::{fs::File, path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::miner::HEARTBEAT_FREQ;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MinerConfig {
    /// pool address, `host:port`
    pub pool: String,
    /// artificial delay spent on every nonce
    pub speed_millis: u64,
    pub heartbeat_millis: u64,
    /// how many times a lost pool connection is re-established
    pub reconnect: u32,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            pool: String::new(),
            speed_millis: 0,
            heartbeat_millis: HEARTBEAT_FREQ.as_millis() as u64,
            reconnect: 0,
        }
    }
}

impl MinerConfig {
    pub fn speed(&self) -> Duration {
        Duration::from_millis(self.speed_millis)
    }

    pub fn heartbeat(&self) -> Duration {
        // a zero period would make the ticker panic
        Duration::from_millis(self.heartbeat_millis.max(1))
    }
}

pub fn load_config_file<P>(config_file: P) -> anyhow::Result<MinerConfig>
where
    P: AsRef<Path>, {
    let path = config_file.as_ref();
    let file = File::open(path)
        .with_context(|| format!("fail to open config file {}", path.display()))?;
    let config = serde_json::from_reader(file)
        .with_context(|| format!("fail to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::{fs, process};

    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let path = std::env::temp_dir().join(format!("miner-config-{}.json", process::id()));
        fs::write(&path, r#"{ "pool": "10.0.0.2:5000", "speed_millis": 3 }"#).unwrap();

        let config = load_config_file(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.pool, "10.0.0.2:5000");
        assert_eq!(config.speed(), Duration::from_millis(3));
        assert_eq!(config.heartbeat(), HEARTBEAT_FREQ);
        assert_eq!(config.reconnect, 0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_config_file("/nonexistent/miner.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/miner.json"));
    }

    #[test]
    fn zero_heartbeat_is_clamped() {
        let config = MinerConfig { heartbeat_millis: 0, ..Default::default() };
        assert_eq!(config.heartbeat(), Duration::from_millis(1));
    }
}
