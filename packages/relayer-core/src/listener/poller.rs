use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::watch;

use crate::channels::{ErrorSender, MessageSenders};
use crate::listener::{BlockSource, DepositHandler, EventHandler, EventSource};
use crate::{Error, Result};

/// 单条链的区块扫描参数
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub start_block: u64,
    pub block_confirmations: u64,
    pub block_retry_interval: Duration,
    /// 同一区块连续失败多少次后上报错误通道，之后继续重试
    pub max_block_retries: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            block_confirmations: 10,
            block_retry_interval: Duration::from_secs(5),
            max_block_retries: 5,
        }
    }
}

enum Step {
    Processed,
    NotFinal,
}

/// 逐块驱动 [`EventHandler`]
pub struct BlockPoller<B, S, H> {
    blocks: B,
    handler: EventHandler<S, H>,
    config: PollerConfig,
}

impl<B, S, H> BlockPoller<B, S, H>
where
    B: BlockSource,
    S: EventSource,
    H: DepositHandler,
{
    pub fn new(blocks: B, handler: EventHandler<S, H>, config: PollerConfig) -> Self {
        Self {
            blocks,
            handler,
            config,
        }
    }

    /// 扫描区块，直到收到关闭信号或中继器不再接收
    ///
    /// 返回第一个尚未处理的区块
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        errors: ErrorSender,
        senders: MessageSenders,
    ) -> u64 {
        let domain = self.handler.domain_id();
        let mut block = self.config.start_block;
        let mut failures = 0u32;
        info!("Polling domain {} from block {}", domain, block);

        loop {
            if *shutdown.borrow() {
                info!("Poller of domain {} received shutdown signal", domain);
                break;
            }
            if senders.transfers.is_closed() || senders.registrations.is_closed() {
                info!("Relayer stopped, poller of domain {} exiting", domain);
                break;
            }

            match self.step(block, &senders).await {
                Ok(Step::Processed) => {
                    failures = 0;
                    block += 1;
                    continue;
                }
                Ok(Step::NotFinal) => {
                    failures = 0;
                    debug!("Block {} of domain {} not final yet", block, domain);
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Failed to process block {} of domain {} (attempt {}): {}",
                        block, domain, failures, e
                    );
                    if failures % self.config.max_block_retries.max(1) == 0 {
                        error!(
                            "Block {} of domain {} failed {} times in a row",
                            block, domain, failures
                        );
                        if errors.send(e).await.is_err() {
                            warn!("Error sink of domain {} closed", domain);
                        }
                    }
                }
            }

            if !sleep_or_shutdown(&mut shutdown, self.config.block_retry_interval).await {
                info!("Poller of domain {} received shutdown signal", domain);
                break;
            }
        }

        block
    }

    async fn step(&mut self, block: u64, senders: &MessageSenders) -> Result<Step> {
        let head = self
            .blocks
            .latest_block()
            .await
            .map_err(|e| Error::Fetch {
                domain: self.handler.domain_id(),
                block,
                reason: format!("latest block: {}", e),
            })?;
        if head.saturating_sub(self.config.block_confirmations) < block {
            return Ok(Step::NotFinal);
        }
        self.handler.handle_block(block, senders).await?;
        Ok(Step::Processed)
    }
}

/// 休眠 `duration`，先收到关闭信号时返回 `false`
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}
