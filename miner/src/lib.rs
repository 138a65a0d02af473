pub mod config;
pub mod miner;

pub use config::{load_config_file, MinerConfig};
pub use miner::{Miner, MinerState, HEARTBEAT_FREQ};

#[cfg(test)]
mod tests;
