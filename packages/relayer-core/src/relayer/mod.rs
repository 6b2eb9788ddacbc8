use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::{
    chain_adapter::{ChainFactory, ChainWriter},
    channels::{registration_channel, transfer_channel, ErrorSender, RegistrationReceiver, TransferReceiver},
    config::{Config, RelayerConfig},
    metrics::MetricsSink,
    processor::ProcessorPipeline,
    types::{RegistrationMessage, TransferMessage},
    Result,
};

mod batch;
mod router;

pub use batch::BatchAccumulator;
pub use router::{ChainRegistry, RegistrationOutcome, Router};

/// 接收各链消息，按目标链攒批转账，并把批次和注册交给路由任务
pub struct Relayer {
    router: Arc<Router>,
    batch_size: usize,
    channel_capacity: usize,
    in_flight: Arc<Semaphore>,
}

impl Relayer {
    pub fn new(
        chains: Vec<Arc<dyn ChainWriter>>,
        metrics: Arc<dyn MetricsSink>,
        processors: ProcessorPipeline,
        config: &RelayerConfig,
    ) -> Result<Self> {
        let registry = ChainRegistry::new(chains)?;
        let router = Router::new(registry, processors, metrics)
            .with_rollback_retries(config.rollback_retries, config.retry_delay());

        Ok(Self {
            router: Arc::new(router),
            batch_size: config.batch_size,
            channel_capacity: config.channel_capacity,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight_routes.max(1))),
        })
    }

    /// 通过 `factory` 为每条配置的链创建写入器
    pub async fn from_config(
        config: &Config,
        factory: &dyn ChainFactory,
        metrics: Arc<dyn MetricsSink>,
        processors: ProcessorPipeline,
    ) -> Result<Self> {
        let mut chains = Vec::with_capacity(config.chains.len());
        for chain in &config.chains {
            let writer = factory.create_chain(chain).await?;
            info!(
                "Initialized {} adapter for domain {} ({})",
                chain.adapter_type, chain.domain_id, chain.name
            );
            chains.push(writer);
        }
        Self::new(chains, metrics, processors, &config.relayer)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// 为每条链启动轮询任务并中继消息，直到 `shutdown` 变为 true 或所有轮询任务结束
    pub async fn start(self, shutdown: watch::Receiver<bool>, errors: ErrorSender) {
        info!(
            "Starting relayer with {} chains, batch size {}",
            self.router.registry().len(),
            self.batch_size
        );

        let (transfers_tx, transfers_rx) = transfer_channel(self.channel_capacity);
        let (registrations_tx, registrations_rx) = registration_channel(self.channel_capacity);

        let pollers: Vec<JoinHandle<()>> = self
            .router
            .registry()
            .chains()
            .map(|chain| {
                let chain = chain.clone();
                let shutdown = shutdown.clone();
                let errors = errors.clone();
                let transfers = transfers_tx.clone();
                let registrations = registrations_tx.clone();
                tokio::spawn(async move {
                    chain.poll_events(shutdown, errors, transfers, registrations).await;
                })
            })
            .collect();

        // 发送端只由轮询任务持有，全部结束后通道自然关闭
        drop(transfers_tx);
        drop(registrations_tx);
        drop(errors);

        self.run(transfers_rx, registrations_rx, shutdown).await;

        for poller in pollers {
            if let Err(e) = poller.await {
                error!("Polling task failed: {}", e);
            }
        }
        info!("Relayer stopped");
    }

    /// 接收循环，关闭时丢弃未满的批次
    pub async fn run(
        &self,
        mut transfers: TransferReceiver,
        mut registrations: RegistrationReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut batches = BatchAccumulator::new(self.batch_size);
        let mut transfers_open = true;
        let mut registrations_open = true;

        loop {
            if *shutdown.borrow() {
                info!("Relayer received shutdown signal");
                break;
            }
            if !transfers_open && !registrations_open {
                info!("All message channels closed");
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("Shutdown sender dropped, stopping relayer");
                        break;
                    }
                }
                message = transfers.recv(), if transfers_open => match message {
                    Some(message) => {
                        debug!("Received transfer {:?} for domain {}", message.id(), message.destination);
                        if let Some(batch) = batches.push(message) {
                            let Some(permit) = self.acquire(&mut shutdown).await else {
                                break;
                            };
                            self.spawn_batch(batch, permit);
                        }
                    }
                    None => transfers_open = false,
                },
                message = registrations.recv(), if registrations_open => match message {
                    Some(message) => {
                        debug!("Received registration {:?} for domain {}", message.id(), message.destination);
                        let Some(permit) = self.acquire(&mut shutdown).await else {
                            break;
                        };
                        self.spawn_registration(message, permit);
                    }
                    None => registrations_open = false,
                },
            }
        }
    }

    /// 等待路由名额，先收到关闭信号时返回 `None`
    async fn acquire(&self, shutdown: &mut watch::Receiver<bool>) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;

            _ = stopped(shutdown) => None,
            permit = self.in_flight.clone().acquire_owned() => permit.ok(),
        }
    }

    fn spawn_batch(&self, batch: Vec<TransferMessage>, permit: OwnedSemaphorePermit) {
        let router = self.router.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = router.route_batch(batch).await {
                error!("Batch dropped: {}", e);
            }
        });
    }

    fn spawn_registration(&self, message: RegistrationMessage, permit: OwnedSemaphorePermit) {
        let router = self.router.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match router.route_registration(message).await {
                Ok(outcome) => debug!("Registration finished: {:?}", outcome),
                Err(e) => error!("Registration failed: {}", e),
            }
        });
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // 发送端被丢弃也视为关闭
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_adapter::{DryRunChain, JournalEntry};
    use crate::metrics::RelayMetrics;
    use crate::types::{Address, DomainId, ResourceId, TransferType, H256};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn transfer(destination: DomainId, nonce: u64) -> TransferMessage {
        TransferMessage::new(1, destination, nonce, ResourceId::default(), TransferType::Generic, vec![vec![nonce as u8]])
    }

    fn registration(nonce: u64) -> RegistrationMessage {
        RegistrationMessage {
            source: 1,
            destination: 2,
            deposit_nonce: nonce,
            mapping_hash: H256([nonce as u8; 32]),
            source_handler: Address::default(),
            dest_handler: Address::default(),
            source_bridge_contract: Address::default(),
            dest_bridge_contract: Address::default(),
            source_token: Address::default(),
            dest_token: Address::default(),
        }
    }

    fn relayer(chains: &[Arc<DryRunChain>], batch_size: usize) -> Relayer {
        let config = RelayerConfig {
            batch_size,
            ..RelayerConfig::default()
        };
        let writers = chains
            .iter()
            .map(|c| c.clone() as Arc<dyn ChainWriter>)
            .collect();
        Relayer::new(writers, Arc::new(RelayMetrics::new()), ProcessorPipeline::new(), &config).unwrap()
    }

    fn chain(domain_id: DomainId) -> Arc<DryRunChain> {
        Arc::new(DryRunChain::new(domain_id, format!("chain-{}", domain_id), Address::default()))
    }

    #[tokio::test]
    async fn test_batch_written_at_threshold() {
        let destination = chain(2);
        let relayer = relayer(&[chain(1), destination.clone()], 3);

        let (transfers_tx, transfers_rx) = transfer_channel(4);
        let (_registrations_tx, registrations_rx) = registration_channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            relayer.run(transfers_rx, registrations_rx, shutdown_rx).await;
        });
        for nonce in 1..=3 {
            transfers_tx.send(transfer(2, nonce)).await.unwrap();
        }
        destination.wait_for_entries(1).await;

        assert_eq!(
            destination.journal().await,
            vec![JournalEntry::WriteBatch(vec![transfer(2, 1), transfer(2, 2), transfer(2, 3)])]
        );
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_batch_is_not_flushed_on_shutdown() {
        let destination = chain(2);
        let relayer = relayer(&[destination.clone()], 2);

        let (transfers_tx, transfers_rx) = transfer_channel(1);
        let (_registrations_tx, registrations_rx) = registration_channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        transfers_tx.send(transfer(2, 1)).await.unwrap();
        let handle = tokio::spawn(async move {
            relayer.run(transfers_rx, registrations_rx, shutdown_rx).await;
        });
        // 等消息被取出通道
        transfers_tx.reserve().await.unwrap();
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(destination.journal().await.is_empty());
    }

    #[tokio::test]
    async fn test_stops_when_all_channels_close() {
        let relayer = relayer(&[chain(2)], 2);
        let (transfers_tx, transfers_rx) = transfer_channel(1);
        let (registrations_tx, registrations_rx) = registration_channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        drop(transfers_tx);
        drop(registrations_tx);
        tokio::time::timeout(
            Duration::from_secs(5),
            relayer.run(transfers_rx, registrations_rx, shutdown_rx),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_stops_loop() {
        let relayer = relayer(&[chain(2)], 2);
        let (_transfers_tx, transfers_rx) = transfer_channel(1);
        let (_registrations_tx, registrations_rx) = registration_channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        drop(shutdown_tx);
        tokio::time::timeout(
            Duration::from_secs(5),
            relayer.run(transfers_rx, registrations_rx, shutdown_rx),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_registration_is_routed_without_batching() {
        let source = chain(1);
        let destination = chain(2);
        let relayer = relayer(&[source.clone(), destination.clone()], 10);

        let (_transfers_tx, transfers_rx) = transfer_channel(1);
        let (registrations_tx, registrations_rx) = registration_channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            relayer.run(transfers_rx, registrations_rx, shutdown_rx).await;
        });
        registrations_tx.send(registration(7)).await.unwrap();
        source.wait_for_entries(1).await;

        assert_eq!(
            destination.journal().await,
            vec![JournalEntry::WriteRegistration(registration(7))]
        );
        assert_eq!(
            source.journal().await,
            vec![JournalEntry::ConfirmRegistration(registration(7))]
        );
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_start_exits_when_pollers_stop() {
        let destination = chain(2);
        let relayer = relayer(&[destination], 2);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (errors, _error_rx) = crate::channels::error_channel();

        let handle = tokio::spawn(relayer.start(shutdown_rx, errors));
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    /// 批量写入较慢、并记录并发调用数的写入器
    #[derive(Default)]
    struct SlowChain {
        running: AtomicUsize,
        max_running: AtomicUsize,
        completed: AtomicUsize,
        done: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl ChainWriter for SlowChain {
        fn domain_id(&self) -> DomainId {
            2
        }

        async fn write(&self, _message: &TransferMessage) -> Result<()> {
            Ok(())
        }

        async fn write_batch(&self, _messages: &[TransferMessage]) -> Result<()> {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
            self.done.notify_one();
            Ok(())
        }

        async fn write_registration(&self, _message: &RegistrationMessage) -> Result<bool> {
            Ok(false)
        }

        async fn confirm_registration(&self, _message: &RegistrationMessage) -> Result<()> {
            Ok(())
        }

        async fn rollback_registration(&self, _message: &RegistrationMessage) -> Result<()> {
            Ok(())
        }

        async fn poll_events(
            &self,
            _shutdown: watch::Receiver<bool>,
            _errors: ErrorSender,
            _transfers: crate::channels::TransferSender,
            _registrations: crate::channels::RegistrationSender,
        ) {
        }
    }

    #[tokio::test]
    async fn test_in_flight_routes_are_bounded() {
        let destination = Arc::new(SlowChain::default());
        let config = RelayerConfig {
            batch_size: 1,
            max_in_flight_routes: 1,
            ..RelayerConfig::default()
        };
        let relayer = Relayer::new(
            vec![destination.clone() as Arc<dyn ChainWriter>],
            Arc::new(RelayMetrics::new()),
            ProcessorPipeline::new(),
            &config,
        )
        .unwrap();

        let (transfers_tx, transfers_rx) = transfer_channel(4);
        let (_registrations_tx, registrations_rx) = registration_channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            relayer.run(transfers_rx, registrations_rx, shutdown_rx).await;
        });
        for nonce in 1..=4 {
            transfers_tx.send(transfer(2, nonce)).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while destination.completed.load(Ordering::SeqCst) < 4 {
                destination.done.notified().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(destination.max_running.load(Ordering::SeqCst), 1);
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
