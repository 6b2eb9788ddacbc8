use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::{
    chain_adapter::ChainWriter,
    metrics::MetricsSink,
    processor::ProcessorPipeline,
    types::{DomainId, RegistrationMessage, TransferMessage},
    Error, Result,
};

/// domain id 到写入器的映射，中继器启动后不再变化
#[derive(Clone, Default)]
pub struct ChainRegistry {
    chains: HashMap<DomainId, Arc<dyn ChainWriter>>,
}

impl ChainRegistry {
    pub fn new(chains: impl IntoIterator<Item = Arc<dyn ChainWriter>>) -> Result<Self> {
        let mut registry = HashMap::new();
        for chain in chains {
            let domain_id = chain.domain_id();
            if registry.insert(domain_id, chain).is_some() {
                return Err(Error::Config(format!("Duplicate domain id: {}", domain_id)));
            }
        }
        Ok(Self { chains: registry })
    }

    pub fn get(&self, domain_id: DomainId) -> Option<&Arc<dyn ChainWriter>> {
        self.chains.get(&domain_id)
    }

    pub fn chains(&self) -> impl Iterator<Item = &Arc<dyn ChainWriter>> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// 注册两阶段流程的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// 目标链拒绝，未做确认
    Rejected,
    /// 已在目标链应用并在源链确认
    Confirmed,
    /// 已在目标链应用但确认失败，源链已回滚
    RolledBack,
}

/// 把消息投递给目标链写入器
pub struct Router {
    registry: ChainRegistry,
    processors: ProcessorPipeline,
    metrics: Arc<dyn MetricsSink>,
    rollback_retries: u32,
    retry_delay: Duration,
}

impl Router {
    pub fn new(
        registry: ChainRegistry,
        processors: ProcessorPipeline,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            registry,
            processors,
            metrics,
            rollback_retries: 0,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_rollback_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.rollback_retries = retries;
        self.retry_delay = delay;
        self
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    fn writer(&self, domain_id: DomainId) -> Result<&Arc<dyn ChainWriter>> {
        self.registry.get(domain_id).ok_or_else(|| {
            error!("No writer registered for domain {}, dropping message", domain_id);
            Error::UnknownDestination(domain_id)
        })
    }

    /// 写入单笔转账
    pub async fn route_single(&self, message: TransferMessage) -> Result<()> {
        let destination = self.writer(message.destination).inspect_err(|_| {
            self.metrics.record_dropped(message.destination);
        })?;
        self.metrics.record_transfer(&message);

        if let Err(e) = self.processors.run(&message) {
            error!("Dropping transfer {:?}: {}", message.id(), e);
            self.metrics.record_dropped(message.destination);
            return Err(e);
        }

        debug!("Sending transfer {:?} to domain {}", message.id(), message.destination);
        destination.write(&message).await.map_err(|e| {
            error!("Writing transfer {:?} failed: {}", message.id(), e);
            Error::Write(e.to_string())
        })
    }

    /// 一次调用写入发往同一目标链的批次，任一消息被拒绝则整批丢弃
    pub async fn route_batch(&self, batch: Vec<TransferMessage>) -> Result<()> {
        let Some(first) = batch.first() else {
            return Ok(());
        };
        let domain_id = first.destination;
        let destination = self.writer(domain_id).inspect_err(|_| {
            self.metrics.record_dropped(domain_id);
        })?;

        for message in &batch {
            if message.destination != domain_id {
                error!(
                    "Transfer {:?} for domain {} found in batch for domain {}, dropping batch",
                    message.id(),
                    message.destination,
                    domain_id
                );
                self.metrics.record_dropped(domain_id);
                return Err(Error::UnknownDestination(message.destination));
            }
            self.metrics.record_transfer(message);

            if let Err(e) = self.processors.run(message) {
                error!(
                    "Dropping batch of {} transfers for domain {}: {}",
                    batch.len(),
                    domain_id,
                    e
                );
                self.metrics.record_dropped(domain_id);
                return Err(e);
            }
        }

        debug!("Sending batch of {} transfers to domain {}", batch.len(), domain_id);
        destination.write_batch(&batch).await.map_err(|e| {
            error!("Writing batch for domain {} failed: {}", domain_id, e);
            Error::Write(e.to_string())
        })?;
        self.metrics.record_batch_written(domain_id, batch.len());
        Ok(())
    }

    /// 在目标链应用注册并在源链确认，确认失败时回滚源链
    pub async fn route_registration(&self, message: RegistrationMessage) -> Result<RegistrationOutcome> {
        let destination = self.writer(message.destination)?;
        let source = self.registry.get(message.source).ok_or_else(|| {
            error!(
                "No writer registered for source domain {}, dropping registration {:?}",
                message.source,
                message.id()
            );
            Error::UnknownSource(message.source)
        })?;

        let accepted = destination.write_registration(&message).await.map_err(|e| {
            error!("Writing registration {:?} failed: {}", message.id(), e);
            Error::Write(e.to_string())
        })?;
        if !accepted {
            info!(
                "Registration {:?} not accepted by domain {}",
                message.id(),
                message.destination
            );
            return Ok(RegistrationOutcome::Rejected);
        }

        let confirm_error = match source.confirm_registration(&message).await {
            Ok(()) => {
                debug!("Registration {:?} confirmed on domain {}", message.id(), message.source);
                return Ok(RegistrationOutcome::Confirmed);
            }
            Err(e) => e,
        };
        warn!(
            "Confirming registration {:?} on domain {} failed, rolling back: {}",
            message.id(),
            message.source,
            confirm_error
        );

        let mut attempt = 0u32;
        loop {
            match source.rollback_registration(&message).await {
                Ok(()) => {
                    info!("Registration {:?} rolled back on domain {}", message.id(), message.source);
                    return Ok(RegistrationOutcome::RolledBack);
                }
                Err(e) if attempt < self.rollback_retries => {
                    attempt += 1;
                    let delay = self.retry_delay * attempt;
                    warn!(
                        "Retry {}/{} rolling back registration {:?} after {:?}: {}",
                        attempt,
                        self.rollback_retries,
                        message.id(),
                        delay,
                        e
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    let divergence = Error::RegistrationDivergence {
                        source_domain: message.source,
                        nonce: message.deposit_nonce,
                        confirm: confirm_error.to_string(),
                        rollback: e.to_string(),
                    };
                    error!("{}", divergence);
                    self.metrics.record_divergence(&message);
                    return Err(divergence);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_adapter::MockChainWriter;
    use crate::metrics::RelayMetrics;
    use crate::types::{Address, ResourceId, TransferType, H256};
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn transfer(destination: DomainId, nonce: u64) -> TransferMessage {
        TransferMessage::new(1, destination, nonce, ResourceId::default(), TransferType::Generic, vec![vec![1]])
    }

    fn registration() -> RegistrationMessage {
        RegistrationMessage {
            source: 1,
            destination: 2,
            deposit_nonce: 4,
            mapping_hash: H256([9u8; 32]),
            source_handler: Address([1u8; 20]),
            dest_handler: Address([2u8; 20]),
            source_bridge_contract: Address([3u8; 20]),
            dest_bridge_contract: Address([4u8; 20]),
            source_token: Address([5u8; 20]),
            dest_token: Address([6u8; 20]),
        }
    }

    fn writer(domain_id: DomainId) -> MockChainWriter {
        let mut writer = MockChainWriter::new();
        writer.expect_domain_id().return_const(domain_id);
        writer
    }

    fn router(chains: Vec<MockChainWriter>, metrics: Arc<RelayMetrics>) -> Router {
        let registry = ChainRegistry::new(
            chains
                .into_iter()
                .map(|c| Arc::new(c) as Arc<dyn ChainWriter>),
        )
        .unwrap();
        Router::new(registry, ProcessorPipeline::new(), metrics)
            .with_rollback_retries(2, Duration::from_millis(1))
    }

    #[test]
    fn test_duplicate_domain_in_registry() {
        let chains: Vec<Arc<dyn ChainWriter>> = vec![Arc::new(writer(1)), Arc::new(writer(1))];
        assert!(matches!(ChainRegistry::new(chains), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_unknown_destination_makes_no_writer_calls() {
        let mut source = writer(1);
        source.expect_write().never();
        source.expect_write_batch().never();
        source.expect_write_registration().never();
        source.expect_confirm_registration().never();
        source.expect_rollback_registration().never();
        let metrics = Arc::new(RelayMetrics::new());
        let router = router(vec![source], metrics.clone());

        assert!(matches!(
            router.route_single(transfer(9, 1)).await,
            Err(Error::UnknownDestination(9))
        ));
        assert!(matches!(
            router.route_batch(vec![transfer(9, 1), transfer(9, 2)]).await,
            Err(Error::UnknownDestination(9))
        ));
        let mut message = registration();
        message.destination = 9;
        assert!(matches!(
            router.route_registration(message).await,
            Err(Error::UnknownDestination(9))
        ));
        assert_eq!(metrics.snapshot().transfers, 0);
        assert_eq!(metrics.snapshot().dropped, 2);
    }

    #[tokio::test]
    async fn test_unknown_source_aborts_registration() {
        let mut destination = writer(2);
        destination.expect_write_registration().never();
        let router = router(vec![destination], Arc::new(RelayMetrics::new()));

        assert!(matches!(
            router.route_registration(registration()).await,
            Err(Error::UnknownSource(1))
        ));
    }

    #[tokio::test]
    async fn test_route_single_writes_once() {
        let mut destination = writer(2);
        destination
            .expect_write()
            .withf(|m| m.deposit_nonce == 3)
            .times(1)
            .returning(|_| Ok(()));
        let metrics = Arc::new(RelayMetrics::new());
        let router = router(vec![destination], metrics.clone());

        router.route_single(transfer(2, 3)).await.unwrap();
        assert_eq!(metrics.snapshot().transfers, 1);
    }

    #[tokio::test]
    async fn test_failing_processor_blocks_whole_batch() {
        let mut destination = writer(2);
        destination.expect_write_batch().never();
        destination.expect_write().never();
        let registry = ChainRegistry::new([Arc::new(destination) as Arc<dyn ChainWriter>]).unwrap();
        let pipeline = ProcessorPipeline::new()
            .with(|_: &TransferMessage| -> Result<()> { Ok(()) })
            .with(|m: &TransferMessage| -> Result<()> {
                if m.deposit_nonce == 6 {
                    Err(Error::Conversion("blocked".to_string()))
                } else {
                    Ok(())
                }
            });
        let router = Router::new(registry, pipeline, Arc::new(RelayMetrics::new()));

        assert!(matches!(
            router.route_batch(vec![transfer(2, 5), transfer(2, 6)]).await,
            Err(Error::ProcessorRejected(_))
        ));
        assert!(router.route_single(transfer(2, 6)).await.is_err());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let mut destination = writer(2);
        destination
            .expect_write_batch()
            .times(1)
            .returning(|_| Err(Error::Chain("reverted".to_string())));
        let metrics = Arc::new(RelayMetrics::new());
        let router = router(vec![destination], metrics.clone());

        assert!(matches!(
            router.route_batch(vec![transfer(2, 5), transfer(2, 6)]).await,
            Err(Error::Write(_))
        ));
        assert_eq!(metrics.snapshot().batches, 0);
    }

    #[tokio::test]
    async fn test_registration_happy_path_never_rolls_back() {
        let mut destination = writer(2);
        destination
            .expect_write_registration()
            .with(eq(registration()))
            .times(1)
            .returning(|_| Ok(true));
        let mut source = writer(1);
        source
            .expect_confirm_registration()
            .with(eq(registration()))
            .times(1)
            .returning(|_| Ok(()));
        source.expect_rollback_registration().never();
        let router = router(vec![destination, source], Arc::new(RelayMetrics::new()));

        assert_eq!(
            router.route_registration(registration()).await.unwrap(),
            RegistrationOutcome::Confirmed
        );
    }

    #[tokio::test]
    async fn test_failed_confirm_rolls_back_once() {
        let mut seq = Sequence::new();
        let mut destination = writer(2);
        destination
            .expect_write_registration()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(true));
        let mut source = writer(1);
        source
            .expect_confirm_registration()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::Chain("out of gas".to_string())));
        source
            .expect_rollback_registration()
            .with(eq(registration()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let router = router(vec![destination, source], Arc::new(RelayMetrics::new()));

        assert_eq!(
            router.route_registration(registration()).await.unwrap(),
            RegistrationOutcome::RolledBack
        );
    }

    #[tokio::test]
    async fn test_rejected_registration_is_not_acknowledged() {
        let mut destination = writer(2);
        destination
            .expect_write_registration()
            .times(1)
            .returning(|_| Ok(false));
        let mut source = writer(1);
        source.expect_confirm_registration().never();
        source.expect_rollback_registration().never();
        let router = router(vec![destination, source], Arc::new(RelayMetrics::new()));

        assert_eq!(
            router.route_registration(registration()).await.unwrap(),
            RegistrationOutcome::Rejected
        );
    }

    #[tokio::test]
    async fn test_write_registration_error_aborts() {
        let mut destination = writer(2);
        destination
            .expect_write_registration()
            .times(1)
            .returning(|_| Err(Error::Chain("rpc down".to_string())));
        let mut source = writer(1);
        source.expect_confirm_registration().never();
        source.expect_rollback_registration().never();
        let router = router(vec![destination, source], Arc::new(RelayMetrics::new()));

        assert!(matches!(
            router.route_registration(registration()).await,
            Err(Error::Write(_))
        ));
    }

    #[tokio::test]
    async fn test_rollback_retries_then_reports_divergence() {
        let mut destination = writer(2);
        destination
            .expect_write_registration()
            .returning(|_| Ok(true));
        let mut source = writer(1);
        source
            .expect_confirm_registration()
            .returning(|_| Err(Error::Chain("out of gas".to_string())));
        source
            .expect_rollback_registration()
            .times(3)
            .returning(|_| Err(Error::Chain("nonce too low".to_string())));
        let metrics = Arc::new(RelayMetrics::new());
        let router = router(vec![destination, source], metrics.clone());

        let err = router.route_registration(registration()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::RegistrationDivergence { source_domain: 1, nonce: 4, .. }
        ));
        assert_eq!(metrics.snapshot().divergences, 1);
    }
}
