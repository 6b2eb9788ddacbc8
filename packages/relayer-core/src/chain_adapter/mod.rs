use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use crate::{
    channels::{ErrorSender, RegistrationSender, TransferSender},
    config::ChainConfig,
    types::{DomainId, RegistrationMessage, TransferMessage},
    Error, Result,
};

/// 中继器对单条链所需的能力，每个链族实现一个适配器
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainWriter: Send + Sync {
    /// 该链注册的 domain
    fn domain_id(&self) -> DomainId;

    /// 提交单笔转账
    async fn write(&self, message: &TransferMessage) -> Result<()>;

    /// 一次调用提交发往本链的一批转账
    async fn write_batch(&self, messages: &[TransferMessage]) -> Result<()>;

    /// 作为目标链应用注册，返回是否被接受
    async fn write_registration(&self, message: &RegistrationMessage) -> Result<bool>;

    /// 作为源链确认已被接受的注册
    async fn confirm_registration(&self, message: &RegistrationMessage) -> Result<()>;

    /// 确认失败后，作为源链撤销注册
    async fn rollback_registration(&self, message: &RegistrationMessage) -> Result<()>;

    /// 监听链上事件并发布转换后的消息，直到 `shutdown` 变为 true。每个进程只启动一次
    async fn poll_events(
        &self,
        shutdown: watch::Receiver<bool>,
        errors: ErrorSender,
        transfers: TransferSender,
        registrations: RegistrationSender,
    );
}

/// 根据配置创建链适配器
#[async_trait]
pub trait ChainFactory: Send + Sync {
    async fn create_chain(&self, config: &ChainConfig) -> Result<Arc<dyn ChainWriter>>;
}

/// 默认工厂支持的适配器类型
pub const SUPPORTED_ADAPTERS: &[&str] = &[dry_run::ADAPTER_TYPE];

pub struct DefaultChainFactory;

#[async_trait]
impl ChainFactory for DefaultChainFactory {
    async fn create_chain(&self, config: &ChainConfig) -> Result<Arc<dyn ChainWriter>> {
        match config.adapter_type.as_str() {
            dry_run::ADAPTER_TYPE => {
                let chain = DryRunChain::from_config(config)?;
                Ok(Arc::new(chain))
            }
            _ => Err(Error::Chain(format!("Unsupported adapter type: {}", config.adapter_type))),
        }
    }
}

pub mod dry_run;

pub use dry_run::{DryRunChain, JournalEntry};
