use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::codec::{encode_len, encode_word};
use crate::hash::keccak256;
use crate::types::{Address, DomainId, ResourceId, TransferMessage, TransferType, H256};
use crate::{Error, Result};

/// 提案附带的自由格式元数据
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// 目标链上等待执行的转账提案。写入方通过内容派生的 id
/// 判断提案是否已提交过，重复中继因此是安全的
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub source: DomainId,
    pub destination: DomainId,
    pub deposit_nonce: u64,
    pub resource_id: ResourceId,
    pub data: Vec<u8>,
    pub handler_address: Address,
    pub bridge_address: Address,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Proposal {
    pub fn from_transfer(
        message: &TransferMessage,
        handler_address: Address,
        bridge_address: Address,
    ) -> Result<Self> {
        Ok(Self {
            source: message.source,
            destination: message.destination,
            deposit_nonce: message.deposit_nonce,
            resource_id: message.resource_id,
            data: proposal_data(message)?,
            handler_address,
            bridge_address,
            metadata: Metadata::new(),
        })
    }

    /// `keccak256(source ‖ deposit_nonce)`，nonce 按 8 字节大端编码
    pub fn id(&self) -> H256 {
        keccak256([&[self.source][..], &self.deposit_nonce.to_be_bytes()[..]])
    }

    /// `keccak256(handler_address ‖ data)`
    pub fn data_hash(&self) -> H256 {
        keccak256([self.handler_address.as_bytes(), self.data.as_slice()])
    }
}

fn payload_item<'a>(message: &'a TransferMessage, index: usize) -> Result<&'a [u8]> {
    message
        .payload
        .get(index)
        .map(Vec::as_slice)
        .ok_or_else(|| {
            Error::Serialization(format!(
                "Transfer {}:{} is missing payload item {}",
                message.source, message.deposit_nonce, index
            ))
        })
}

/// 按目标链桥合约的要求编码 `message` 的 handler calldata
pub fn proposal_data(message: &TransferMessage) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    match message.transfer_type {
        TransferType::Fungible => {
            let amount = payload_item(message, 0)?;
            let recipient = payload_item(message, 1)?;
            data.extend_from_slice(&encode_word(amount)?);
            data.extend_from_slice(&encode_len(recipient.len()));
            data.extend_from_slice(recipient);
        }
        TransferType::NonFungible => {
            let token_id = payload_item(message, 0)?;
            let recipient = payload_item(message, 1)?;
            let metadata = payload_item(message, 2)?;
            data.extend_from_slice(&encode_word(token_id)?);
            data.extend_from_slice(&encode_len(recipient.len()));
            data.extend_from_slice(recipient);
            data.extend_from_slice(&encode_len(metadata.len()));
            data.extend_from_slice(metadata);
        }
        TransferType::Generic => {
            let metadata = payload_item(message, 0)?;
            data.extend_from_slice(&encode_len(metadata.len()));
            data.extend_from_slice(metadata);
        }
    }
    Ok(data)
}
