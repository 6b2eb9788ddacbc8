use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chain_adapter::SUPPORTED_ADAPTERS;
use crate::listener::{DepositKind, PollerConfig, ResourceDepositHandler};
use crate::types::{Address, DomainId, ResourceId};
use crate::Error;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ResourceConfig {
    pub resource_id: ResourceId,
    pub kind: DepositKind,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainConfig {
    pub domain_id: DomainId,
    pub name: String,
    pub adapter_type: String,
    pub bridge_address: Address,
    #[serde(default)]
    pub start_block: u64,
    #[serde(default = "default_block_confirmations")]
    pub block_confirmations: u64,
    #[serde(default = "default_block_retry_interval_ms")]
    pub block_retry_interval_ms: u64,
    #[serde(default = "default_max_block_retries")]
    pub max_block_retries: u32,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// dry-run 适配器回放的事件文件
    #[serde(default)]
    pub fixture: Option<PathBuf>,
    /// dry-run 适配器是否接受写入的注册
    #[serde(default = "default_true")]
    pub accept_registrations: bool,
}

fn default_block_confirmations() -> u64 {
    10
}

fn default_block_retry_interval_ms() -> u64 {
    5_000
}

fn default_max_block_retries() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

impl ChainConfig {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            start_block: self.start_block,
            block_confirmations: self.block_confirmations,
            block_retry_interval: Duration::from_millis(self.block_retry_interval_ms),
            max_block_retries: self.max_block_retries,
        }
    }

    pub fn deposit_handler(&self) -> ResourceDepositHandler {
        self.resources
            .iter()
            .map(|r| (r.resource_id, r.kind))
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayerConfig {
    /// 每个目标链凑满多少笔转账后批量写入
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// 同时运行的路由任务上限
    #[serde(default = "default_max_in_flight_routes")]
    pub max_in_flight_routes: usize,
    /// 首次回滚失败后的额外重试次数
    #[serde(default = "default_rollback_retries")]
    pub rollback_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_batch_size() -> usize {
    2
}

fn default_channel_capacity() -> usize {
    crate::channels::DEFAULT_CHANNEL_CAPACITY
}

fn default_max_in_flight_routes() -> usize {
    64
}

fn default_rollback_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            channel_capacity: default_channel_capacity(),
            max_in_flight_routes: default_max_in_flight_routes(),
            rollback_retries: default_rollback_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RelayerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub relayer: RelayerConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&config_str)
    }

    pub fn from_json(config_str: &str) -> Result<Self, Error> {
        let config: Config = serde_json::from_str(config_str)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.chains.is_empty() {
            return Err(Error::Config("At least one chain must be configured".to_string()));
        }

        let mut domains = HashSet::new();
        for chain in &self.chains {
            if !SUPPORTED_ADAPTERS.contains(&chain.adapter_type.as_str()) {
                return Err(Error::Config(format!("Invalid adapter type: {}", chain.adapter_type)));
            }
            if !domains.insert(chain.domain_id) {
                return Err(Error::Config(format!("Duplicate domain id: {}", chain.domain_id)));
            }
            if chain.max_block_retries == 0 {
                return Err(Error::Config(format!(
                    "Chain {} max_block_retries must be greater than 0",
                    chain.name
                )));
            }

            let mut resources = HashSet::new();
            for resource in &chain.resources {
                if !resources.insert(resource.resource_id) {
                    return Err(Error::Config(format!(
                        "Chain {} lists resource {} twice",
                        chain.name, resource.resource_id
                    )));
                }
            }
        }

        if self.relayer.batch_size == 0 {
            return Err(Error::Config("Relayer batch size must be greater than 0".to_string()));
        }
        if self.relayer.max_in_flight_routes == 0 {
            return Err(Error::Config(
                "Relayer max in-flight routes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn get_chain_config(&self, domain_id: DomainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.domain_id == domain_id)
    }

    /// 所有链上配置的资源 id
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self
            .chains
            .iter()
            .flat_map(|c| c.resources.iter().map(|r| r.resource_id))
            .collect();
        ids.sort_by_key(|id| id.0);
        ids.dedup();
        ids
    }
}
