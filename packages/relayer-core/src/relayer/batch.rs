use std::collections::HashMap;

use crate::types::{DomainId, TransferMessage};

/// 由接收循环持有的按目标链累积的批次
///
/// `push` 返回前会把满批次移出并换上空批次，
/// 拿到批次的路由任务是它唯一的所有者
#[derive(Debug)]
pub struct BatchAccumulator {
    threshold: usize,
    pending: HashMap<DomainId, Vec<TransferMessage>>,
}

impl BatchAccumulator {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            pending: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// 把 `message` 追加到目标链的批次，凑满 `threshold` 条时返回该批次
    pub fn push(&mut self, message: TransferMessage) -> Option<Vec<TransferMessage>> {
        let threshold = self.threshold;
        let batch = self
            .pending
            .entry(message.destination)
            .or_insert_with(|| Vec::with_capacity(threshold));
        batch.push(message);
        if batch.len() < threshold {
            return None;
        }
        Some(std::mem::replace(batch, Vec::with_capacity(threshold)))
    }

    /// `destination` 上等待中的消息数
    pub fn pending(&self, destination: DomainId) -> usize {
        self.pending.get(&destination).map_or(0, Vec::len)
    }
}
