use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// 参与跨链桥的链标识
pub type DomainId = u8;

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], Error> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(raw).map_err(|e| Error::Decode(format!("Invalid hex {}: {}", s, e)))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| Error::Decode(format!("Expected {} bytes, got {}", N, b.len())))
}

macro_rules! hex_bytes {
    ($name:ident, $len:expr) => {
        impl $name {
            pub const LEN: usize = $len;

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_fixed::<$len>(s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// 将存款 calldata 路由到对应 handler 的不透明键
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResourceId(pub [u8; 32]);

/// 20 字节合约或账户地址
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; 20]);

hex_bytes!(ResourceId, 32);
hex_bytes!(Address, 20);

/// 32 字节 keccak 摘要
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct H256(pub [u8; 32]);

hex_bytes!(H256, 32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    Fungible,
    NonFungible,
    Generic,
}

/// 由存款事件生成的规范跨链转账消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMessage {
    pub source: DomainId,
    pub destination: DomainId,
    pub deposit_nonce: u64,
    pub resource_id: ResourceId,
    pub transfer_type: TransferType,
    pub payload: Vec<Vec<u8>>,
}

impl TransferMessage {
    pub fn new(
        source: DomainId,
        destination: DomainId,
        deposit_nonce: u64,
        resource_id: ResourceId,
        transfer_type: TransferType,
        payload: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            source,
            destination,
            deposit_nonce,
            resource_id,
            transfer_type,
            payload,
        }
    }

    /// (source, nonce) 唯一标识一笔转账
    pub fn id(&self) -> (DomainId, u64) {
        (self.source, self.deposit_nonce)
    }
}

/// 先在目标链应用、再在源链确认的代币/handler 注册消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationMessage {
    pub source: DomainId,
    pub destination: DomainId,
    pub deposit_nonce: u64,
    pub mapping_hash: H256,
    pub source_handler: Address,
    pub dest_handler: Address,
    pub source_bridge_contract: Address,
    pub dest_bridge_contract: Address,
    pub source_token: Address,
    pub dest_token: Address,
}

impl RegistrationMessage {
    pub fn id(&self) -> (DomainId, u64) {
        (self.source, self.deposit_nonce)
    }
}

/// [`EventSource`](crate::listener::EventSource) 上报的原始存款事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub destination_domain_id: DomainId,
    pub resource_id: ResourceId,
    pub deposit_nonce: u64,
    pub user: Address,
    #[serde(with = "hex_vec")]
    pub data: Vec<u8>,
    #[serde(default, with = "hex_vec")]
    pub handler_response: Vec<u8>,
}

/// 原始代币注册事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTokenEvent {
    pub domain_id: DomainId,
    pub destination_domain_id: DomainId,
    pub deposit_nonce: u64,
    pub source_handler: Address,
    pub dest_handler: Address,
    pub source_bridge_contract: Address,
    pub dest_bridge_contract: Address,
    pub source_token: Address,
    pub dest_token: Address,
}

mod hex_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}
