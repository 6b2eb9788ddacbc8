use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{DomainId, RegistrationMessage, TransferMessage};

/// 中继器调用的统计回调，所有回调都不能阻塞
pub trait MetricsSink: Send + Sync {
    fn record_transfer(&self, message: &TransferMessage);

    fn record_dropped(&self, _destination: DomainId) {}

    fn record_batch_written(&self, _destination: DomainId, _size: usize) {}

    fn record_divergence(&self, _message: &RegistrationMessage) {}
}

/// 丢弃所有统计的实现
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_transfer(&self, _message: &TransferMessage) {}
}

/// 进程内计数器，通过 [`RelayMetrics::snapshot`] 读取
#[derive(Debug, Default)]
pub struct RelayMetrics {
    transfers: AtomicU64,
    dropped: AtomicU64,
    batches: AtomicU64,
    batched_messages: AtomicU64,
    divergences: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub transfers: u64,
    pub dropped: u64,
    pub batches: u64,
    pub batched_messages: u64,
    pub divergences: u64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers: self.transfers.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            batched_messages: self.batched_messages.load(Ordering::Relaxed),
            divergences: self.divergences.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for RelayMetrics {
    fn record_transfer(&self, _message: &TransferMessage) {
        self.transfers.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self, _destination: DomainId) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_batch_written(&self, _destination: DomainId, size: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.batched_messages.fetch_add(size as u64, Ordering::Relaxed);
    }

    fn record_divergence(&self, _message: &RegistrationMessage) {
        self.divergences.fetch_add(1, Ordering::Relaxed);
    }
}
