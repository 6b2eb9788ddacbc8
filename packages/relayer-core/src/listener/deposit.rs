use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::codec::{read_len, read_slice, WORD};
use crate::listener::DepositHandler;
use crate::types::{DomainId, ResourceId, TransferMessage, TransferType};
use crate::{Error, Result};

/// 资源 calldata 的布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositKind {
    Erc20,
    Erc721,
    Generic,
}

/// 按资源 id 选择 calldata 解码器的存款处理器
#[derive(Debug, Clone, Default)]
pub struct ResourceDepositHandler {
    resources: HashMap<ResourceId, DepositKind>,
}

impl ResourceDepositHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource_id: ResourceId, kind: DepositKind) -> &mut Self {
        self.resources.insert(resource_id, kind);
        self
    }

    pub fn kind(&self, resource_id: &ResourceId) -> Option<DepositKind> {
        self.resources.get(resource_id).copied()
    }
}

impl FromIterator<(ResourceId, DepositKind)> for ResourceDepositHandler {
    fn from_iter<I: IntoIterator<Item = (ResourceId, DepositKind)>>(iter: I) -> Self {
        Self {
            resources: iter.into_iter().collect(),
        }
    }
}

impl DepositHandler for ResourceDepositHandler {
    fn handle_deposit(
        &self,
        source: DomainId,
        destination: DomainId,
        nonce: u64,
        resource_id: ResourceId,
        calldata: &[u8],
        _handler_response: &[u8],
    ) -> Result<TransferMessage> {
        let kind = self
            .kind(&resource_id)
            .ok_or(Error::UnsupportedResource(resource_id))?;
        let (transfer_type, payload) = match kind {
            DepositKind::Erc20 => (TransferType::Fungible, decode_erc20(calldata)?),
            DepositKind::Erc721 => (TransferType::NonFungible, decode_erc721(calldata)?),
            DepositKind::Generic => (TransferType::Generic, decode_generic(calldata)?),
        };
        Ok(TransferMessage::new(
            source,
            destination,
            nonce,
            resource_id,
            transfer_type,
            payload,
        ))
    }
}

/// `amount(32) ‖ recipient_len(32) ‖ recipient`
///
/// recipient 一直延续到 calldata 末尾，长度字由目标链 handler 重新计算
pub fn decode_erc20(calldata: &[u8]) -> Result<Vec<Vec<u8>>> {
    if calldata.len() < 84 {
        return Err(Error::Decode(format!(
            "Invalid erc20 calldata length: {} < 84 bytes",
            calldata.len()
        )));
    }
    let amount = calldata[..WORD].to_vec();
    let recipient = calldata[2 * WORD..].to_vec();
    Ok(vec![amount, recipient])
}

/// `token_id(32) ‖ recipient_len(32) ‖ recipient ‖ metadata_len(32) ‖ metadata`
pub fn decode_erc721(calldata: &[u8]) -> Result<Vec<Vec<u8>>> {
    if calldata.len() < 2 * WORD {
        return Err(Error::Decode(format!(
            "Invalid erc721 calldata length: {} < 64 bytes",
            calldata.len()
        )));
    }
    let token_id = calldata[..WORD].to_vec();
    let recipient_len = read_len(calldata, WORD, "recipient length")?;
    let recipient = read_slice(calldata, 2 * WORD, recipient_len, "recipient")?.to_vec();

    let metadata_start = 2 * WORD + recipient_len;
    let metadata_len = read_len(calldata, metadata_start, "metadata length")?;
    let metadata = read_slice(calldata, metadata_start + WORD, metadata_len, "metadata")?.to_vec();

    Ok(vec![token_id, recipient, metadata])
}

/// `metadata_len(32) ‖ metadata`
pub fn decode_generic(calldata: &[u8]) -> Result<Vec<Vec<u8>>> {
    if calldata.len() < WORD {
        return Err(Error::Decode(format!(
            "Invalid generic calldata length: {} < 32 bytes",
            calldata.len()
        )));
    }
    let metadata_len = read_len(calldata, 0, "metadata length")?;
    let metadata = read_slice(calldata, WORD, metadata_len, "metadata")?.to_vec();
    Ok(vec![metadata])
}
