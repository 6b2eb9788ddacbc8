//! 从事件文件回放事件、只记录写入而不真正提交的链适配器。
//! 用于演练中继器配置，或在不接触真实链的情况下重扫历史事件

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use super::ChainWriter;
use crate::{
    channels::{ErrorSender, MessageSenders, RegistrationSender, TransferSender},
    config::ChainConfig,
    listener::{BlockPoller, BlockSource, EventHandler, EventSource, PollerConfig, ResourceDepositHandler},
    proposal::Proposal,
    types::{Address, DepositEvent, DomainId, RegisterTokenEvent, RegistrationMessage, TransferMessage, H256},
    Error, Result,
};

pub const ADAPTER_TYPE: &str = "dry-run";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockEvents {
    #[serde(default)]
    pub deposits: Vec<DepositEvent>,
    #[serde(default)]
    pub registrations: Vec<RegisterTokenEvent>,
}

/// 按区块号索引的链上事件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    /// 上报的链头高度，默认是最后一个有事件的区块
    #[serde(default)]
    pub head: Option<u64>,
    #[serde(default)]
    pub blocks: BTreeMap<u64, BlockEvents>,
}

impl Fixture {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("Failed to read fixture {}: {}", path.as_ref().display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn head(&self) -> u64 {
        self.head
            .or_else(|| self.blocks.keys().next_back().copied())
            .unwrap_or(0)
    }

    pub fn block(&mut self, number: u64) -> &mut BlockEvents {
        self.blocks.entry(number).or_default()
    }
}

#[derive(Clone)]
struct FixtureSource(Arc<Fixture>);

#[async_trait]
impl EventSource for FixtureSource {
    async fn fetch_deposits(&self, _bridge: Address, start: u64, end: u64) -> Result<Vec<DepositEvent>> {
        Ok(self
            .0
            .blocks
            .range(start..=end)
            .flat_map(|(_, events)| events.deposits.iter().cloned())
            .collect())
    }

    async fn fetch_registrations(
        &self,
        _bridge: Address,
        start: u64,
        end: u64,
    ) -> Result<Vec<RegisterTokenEvent>> {
        Ok(self
            .0
            .blocks
            .range(start..=end)
            .flat_map(|(_, events)| events.registrations.iter().cloned())
            .collect())
    }
}

#[async_trait]
impl BlockSource for FixtureSource {
    async fn latest_block(&self) -> Result<u64> {
        Ok(self.0.head())
    }
}

/// dry-run 链收到的一次写入
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry {
    Write(TransferMessage),
    WriteBatch(Vec<TransferMessage>),
    WriteRegistration(RegistrationMessage),
    ConfirmRegistration(RegistrationMessage),
    RollbackRegistration(RegistrationMessage),
}

#[derive(Default)]
struct Journal {
    entries: Vec<JournalEntry>,
    proposals: HashSet<H256>,
}

pub struct DryRunChain {
    domain_id: DomainId,
    name: String,
    bridge_address: Address,
    handler_address: Address,
    fixture: Arc<Fixture>,
    deposits: ResourceDepositHandler,
    poller: PollerConfig,
    accept_registrations: bool,
    journal: Mutex<Journal>,
    journal_len: watch::Sender<usize>,
}

impl DryRunChain {
    pub fn new(domain_id: DomainId, name: impl Into<String>, bridge_address: Address) -> Self {
        let (journal_len, _) = watch::channel(0);
        Self {
            domain_id,
            name: name.into(),
            bridge_address,
            handler_address: Address::default(),
            fixture: Arc::new(Fixture::default()),
            deposits: ResourceDepositHandler::new(),
            poller: PollerConfig::default(),
            accept_registrations: true,
            journal: Mutex::new(Journal::default()),
            journal_len,
        }
    }

    pub fn from_config(config: &ChainConfig) -> Result<Self> {
        let fixture = match &config.fixture {
            Some(path) => Fixture::load(path)?,
            None => Fixture::default(),
        };
        Ok(Self::new(config.domain_id, config.name.clone(), config.bridge_address)
            .with_fixture(fixture)
            .with_deposit_handler(config.deposit_handler())
            .with_poller_config(config.poller_config())
            .accept_registrations(config.accept_registrations))
    }

    pub fn with_handler_address(mut self, handler_address: Address) -> Self {
        self.handler_address = handler_address;
        self
    }

    pub fn with_fixture(mut self, fixture: Fixture) -> Self {
        self.fixture = Arc::new(fixture);
        self
    }

    pub fn with_deposit_handler(mut self, deposits: ResourceDepositHandler) -> Self {
        self.deposits = deposits;
        self
    }

    pub fn with_poller_config(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    pub fn accept_registrations(mut self, accept: bool) -> Self {
        self.accept_registrations = accept;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.journal.lock().await.entries.clone()
    }

    /// 记录的写入达到 `count` 条后返回
    pub async fn wait_for_entries(&self, count: usize) {
        let mut len = self.journal_len.subscribe();
        let _ = len.wait_for(|len| *len >= count).await;
    }

    async fn record(&self, entry: JournalEntry) {
        let mut journal = self.journal.lock().await;
        Self::append(&mut journal, entry, &self.journal_len);
    }

    fn append(journal: &mut Journal, entry: JournalEntry, journal_len: &watch::Sender<usize>) {
        journal.entries.push(entry);
        journal_len.send_replace(journal.entries.len());
    }

    fn proposal(&self, message: &TransferMessage) -> Result<Proposal> {
        Proposal::from_transfer(message, self.handler_address, self.bridge_address)
            .map_err(|e| Error::Chain(format!("[{}] cannot build proposal: {}", self.name, e)))
    }

    /// 过滤掉提案已在本链执行过的转账，包括 `messages` 内部的重复项
    fn unexecuted(
        &self,
        journal: &mut Journal,
        messages: &[TransferMessage],
    ) -> Result<Vec<TransferMessage>> {
        let proposals = messages
            .iter()
            .map(|message| self.proposal(message))
            .collect::<Result<Vec<_>>>()?;

        let mut fresh = Vec::with_capacity(messages.len());
        for (message, proposal) in messages.iter().zip(proposals) {
            if !journal.proposals.insert(proposal.id()) {
                info!(
                    "[{}] proposal {} for transfer {}:{} already executed, skipping",
                    self.name,
                    proposal.id(),
                    message.source,
                    message.deposit_nonce
                );
                continue;
            }
            fresh.push(message.clone());
        }
        Ok(fresh)
    }
}

#[async_trait]
impl ChainWriter for DryRunChain {
    fn domain_id(&self) -> DomainId {
        self.domain_id
    }

    async fn write(&self, message: &TransferMessage) -> Result<()> {
        let mut journal = self.journal.lock().await;
        let Some(message) = self.unexecuted(&mut journal, std::slice::from_ref(message))?.pop() else {
            return Ok(());
        };
        info!(
            "[{}] would execute transfer {}:{} ({})",
            self.name, message.source, message.deposit_nonce, message.resource_id
        );
        Self::append(&mut journal, JournalEntry::Write(message), &self.journal_len);
        Ok(())
    }

    async fn write_batch(&self, messages: &[TransferMessage]) -> Result<()> {
        let mut journal = self.journal.lock().await;
        let fresh = self.unexecuted(&mut journal, messages)?;
        if fresh.is_empty() {
            return Ok(());
        }
        let nonces: Vec<_> = fresh.iter().map(|m| (m.source, m.deposit_nonce)).collect();
        info!("[{}] would execute batch of {} transfers {:?}", self.name, fresh.len(), nonces);
        Self::append(&mut journal, JournalEntry::WriteBatch(fresh), &self.journal_len);
        Ok(())
    }

    async fn write_registration(&self, message: &RegistrationMessage) -> Result<bool> {
        info!(
            "[{}] would register mapping {} from domain {} (accepted: {})",
            self.name, message.mapping_hash, message.source, self.accept_registrations
        );
        self.record(JournalEntry::WriteRegistration(message.clone())).await;
        Ok(self.accept_registrations)
    }

    async fn confirm_registration(&self, message: &RegistrationMessage) -> Result<()> {
        info!("[{}] would confirm mapping {}", self.name, message.mapping_hash);
        self.record(JournalEntry::ConfirmRegistration(message.clone())).await;
        Ok(())
    }

    async fn rollback_registration(&self, message: &RegistrationMessage) -> Result<()> {
        info!("[{}] would roll back mapping {}", self.name, message.mapping_hash);
        self.record(JournalEntry::RollbackRegistration(message.clone())).await;
        Ok(())
    }

    async fn poll_events(
        &self,
        shutdown: watch::Receiver<bool>,
        errors: ErrorSender,
        transfers: TransferSender,
        registrations: RegistrationSender,
    ) {
        let source = FixtureSource(self.fixture.clone());
        let handler = EventHandler::new(
            source.clone(),
            self.deposits.clone(),
            self.bridge_address,
            self.domain_id,
        );
        let next_block = BlockPoller::new(source, handler, self.poller.clone())
            .run(
                shutdown,
                errors,
                MessageSenders {
                    transfers,
                    registrations,
                },
            )
            .await;
        info!("[{}] stopped polling before block {}", self.name, next_block);
    }
}
