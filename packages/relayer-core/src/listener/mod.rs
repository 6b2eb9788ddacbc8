//! 将链上事件转换为可中继的消息

use async_trait::async_trait;
use log::{debug, error};
use std::collections::HashMap;

use crate::channels::MessageSenders;
use crate::hash::mapping_hash;
use crate::types::{
    Address, DepositEvent, DomainId, RegisterTokenEvent, RegistrationMessage, ResourceId,
    TransferMessage,
};
use crate::{Error, Result};

pub mod deposit;
pub mod nonce;
pub mod poller;

pub use deposit::{DepositKind, ResourceDepositHandler};
pub use nonce::{NonceWindow, DEFAULT_NONCE_WINDOW};
pub use poller::{BlockPoller, PollerConfig};

/// 按区块范围读取单条链上的桥事件
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_deposits(&self, bridge: Address, start: u64, end: u64) -> Result<Vec<DepositEvent>>;

    async fn fetch_registrations(
        &self,
        bridge: Address,
        start: u64,
        end: u64,
    ) -> Result<Vec<RegisterTokenEvent>>;
}

/// 获取当前链头高度
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn latest_block(&self) -> Result<u64>;
}

/// 解析某个资源的存款 calldata
#[cfg_attr(test, mockall::automock)]
pub trait DepositHandler: Send + Sync {
    fn handle_deposit(
        &self,
        source: DomainId,
        destination: DomainId,
        nonce: u64,
        resource_id: ResourceId,
        calldata: &[u8],
        handler_response: &[u8],
    ) -> Result<TransferMessage>;
}

/// 将单条链的桥事件转换为消息并发布
pub struct EventHandler<S, H> {
    source: S,
    deposit_handler: H,
    bridge_address: Address,
    domain_id: DomainId,
    nonce_window: usize,
    seen_deposits: NonceWindow,
    seen_registrations: HashMap<DomainId, NonceWindow>,
}

impl<S: EventSource, H: DepositHandler> EventHandler<S, H> {
    pub fn new(source: S, deposit_handler: H, bridge_address: Address, domain_id: DomainId) -> Self {
        Self {
            source,
            deposit_handler,
            bridge_address,
            domain_id,
            nonce_window: DEFAULT_NONCE_WINDOW,
            seen_deposits: NonceWindow::default(),
            seen_registrations: HashMap::new(),
        }
    }

    /// 每个 domain 记住的最近 nonce 数量
    pub fn with_nonce_window(mut self, capacity: usize) -> Self {
        self.nonce_window = capacity;
        self.seen_deposits = NonceWindow::new(capacity);
        self.seen_registrations.clear();
        self
    }

    pub fn domain_id(&self) -> DomainId {
        self.domain_id
    }

    /// 去重窗口当前持有的存款 nonce 数
    pub fn tracked_deposit_nonces(&self) -> usize {
        self.seen_deposits.len()
    }

    /// 转换存款事件，已经产出过消息的 nonce 会被拒绝，不会再次中继
    pub fn convert_deposit(&mut self, event: &DepositEvent) -> Result<TransferMessage> {
        if self.seen_deposits.contains(event.deposit_nonce) {
            return Err(Error::Conversion(format!(
                "Duplicate deposit nonce {} on domain {}",
                event.deposit_nonce, self.domain_id
            )));
        }
        let message = self.deposit_handler.handle_deposit(
            self.domain_id,
            event.destination_domain_id,
            event.deposit_nonce,
            event.resource_id,
            &event.data,
            &event.handler_response,
        )?;
        self.seen_deposits.insert(event.deposit_nonce);
        Ok(message)
    }

    pub fn convert_registration(&mut self, event: &RegisterTokenEvent) -> Result<RegistrationMessage> {
        let window = self.nonce_window;
        let seen = self
            .seen_registrations
            .entry(event.domain_id)
            .or_insert_with(|| NonceWindow::new(window));
        if !seen.insert(event.deposit_nonce) {
            return Err(Error::Conversion(format!(
                "Duplicate registration nonce {} on domain {}",
                event.deposit_nonce, event.domain_id
            )));
        }
        Ok(RegistrationMessage {
            source: event.domain_id,
            destination: event.destination_domain_id,
            deposit_nonce: event.deposit_nonce,
            mapping_hash: mapping_hash(&event.dest_token, event.domain_id, event.destination_domain_id),
            source_handler: event.source_handler,
            dest_handler: event.dest_handler,
            source_bridge_contract: event.source_bridge_contract,
            dest_bridge_contract: event.dest_bridge_contract,
            source_token: event.source_token,
            dest_token: event.dest_token,
        })
    }

    /// 拉取、转换并发布 `block` 中的全部事件
    ///
    /// 拉取失败会中止该区块并返回错误，由调用方重试；单个事件转换失败只跳过该事件
    pub async fn handle_block(&mut self, block: u64, senders: &MessageSenders) -> Result<()> {
        let deposits = self
            .source
            .fetch_deposits(self.bridge_address, block, block)
            .await
            .map_err(|e| self.fetch_error(block, e))?;

        for deposit in &deposits {
            let message = match self.convert_deposit(deposit) {
                Ok(message) => message,
                Err(e) => {
                    error!("Skipping deposit in block {} of domain {}: {}", block, self.domain_id, e);
                    continue;
                }
            };
            debug!("Resolved transfer {:?} in block {}", message, block);
            senders
                .transfers
                .send(message)
                .await
                .map_err(|_| Error::Chain("Transfer channel closed".to_string()))?;
        }

        let registrations = self
            .source
            .fetch_registrations(self.bridge_address, block, block)
            .await
            .map_err(|e| self.fetch_error(block, e))?;

        for registration in &registrations {
            let message = match self.convert_registration(registration) {
                Ok(message) => message,
                Err(e) => {
                    error!(
                        "Skipping registration in block {} of domain {}: {}",
                        block, self.domain_id, e
                    );
                    continue;
                }
            };
            debug!("Resolved registration {:?} in block {}", message, block);
            senders
                .registrations
                .send(message)
                .await
                .map_err(|_| Error::Chain("Registration channel closed".to_string()))?;
        }

        debug!("Queried block {} of domain {}", block, self.domain_id);
        Ok(())
    }

    fn fetch_error(&self, block: u64, e: Error) -> Error {
        match e {
            e @ Error::Fetch { .. } => e,
            other => Error::Fetch {
                domain: self.domain_id,
                block,
                reason: other.to_string(),
            },
        }
    }
}
