pub mod chain_adapter;
pub mod codec;
pub mod channels;
pub mod config;
pub mod hash;
pub mod listener;
pub mod metrics;
pub mod processor;
pub mod proposal;
pub mod relayer;
pub mod types;

pub use config::Config;
pub use relayer::Relayer;
pub use types::{Address, DomainId, H256, RegistrationMessage, ResourceId, TransferMessage, TransferType};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Failed to fetch events of domain {domain} at block {block}: {reason}")]
    Fetch {
        domain: DomainId,
        block: u64,
        reason: String,
    },

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Unsupported resource: {0}")]
    UnsupportedResource(ResourceId),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("No writer registered for domain {0}")]
    UnknownDestination(DomainId),

    #[error("No writer registered for source domain {0}")]
    UnknownSource(DomainId),

    #[error("Message rejected by processor: {0}")]
    ProcessorRejected(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error(
        "Registration {source_domain}:{nonce} diverged: confirm failed ({confirm}), rollback failed ({rollback})"
    )]
    RegistrationDivergence {
        source_domain: DomainId,
        nonce: u64,
        confirm: String,
        rollback: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}
