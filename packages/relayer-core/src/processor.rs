//! 转账写入前依次执行的校验流水线

use std::collections::HashSet;
use std::sync::Arc;

use crate::types::{ResourceId, TransferMessage, TransferType};
use crate::{Error, Result};

/// 流水线中的单个阶段。阶段必须幂等：批次中途被拒绝时不会回滚
pub trait MessageProcessor: Send + Sync {
    fn process(&self, message: &TransferMessage) -> Result<()>;
}

impl<F> MessageProcessor for F
where
    F: Fn(&TransferMessage) -> Result<()> + Send + Sync,
{
    fn process(&self, message: &TransferMessage) -> Result<()> {
        self(message)
    }
}

/// 按配置顺序执行处理器，遇到第一个失败即停止
#[derive(Clone, Default)]
pub struct ProcessorPipeline {
    processors: Vec<Arc<dyn MessageProcessor>>,
}

impl ProcessorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, processor: impl MessageProcessor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    pub fn push(&mut self, processor: Arc<dyn MessageProcessor>) {
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn run(&self, message: &TransferMessage) -> Result<()> {
        for (index, processor) in self.processors.iter().enumerate() {
            processor.process(message).map_err(|e| {
                Error::ProcessorRejected(format!(
                    "stage {} rejected transfer {}:{}: {}",
                    index, message.source, message.deposit_nonce, e
                ))
            })?;
        }
        Ok(())
    }
}

/// 拒绝未配置资源的转账
#[derive(Debug, Clone)]
pub struct ResourceAllowList {
    allowed: HashSet<ResourceId>,
}

impl ResourceAllowList {
    pub fn new(allowed: impl IntoIterator<Item = ResourceId>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl MessageProcessor for ResourceAllowList {
    fn process(&self, message: &TransferMessage) -> Result<()> {
        if self.allowed.contains(&message.resource_id) {
            Ok(())
        } else {
            Err(Error::UnsupportedResource(message.resource_id))
        }
    }
}

/// 拒绝 payload 项数与转账类型不符的转账
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadShape;

impl MessageProcessor for PayloadShape {
    fn process(&self, message: &TransferMessage) -> Result<()> {
        let expected = match message.transfer_type {
            TransferType::Fungible => 2,
            TransferType::NonFungible => 3,
            TransferType::Generic => 1,
        };
        if message.payload.len() != expected {
            return Err(Error::Conversion(format!(
                "{:?} transfer carries {} payload items, expected {}",
                message.transfer_type,
                message.payload.len(),
                expected
            )));
        }
        Ok(())
    }
}
