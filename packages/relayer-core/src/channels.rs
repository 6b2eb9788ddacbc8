//! 连接各链轮询任务与中继器的通道
//!
//! 两个通道都有界：轮询任务发布快于中继器消费时会阻塞在 `send` 上，
//! 在途消息占用的内存因此有上限

use tokio::sync::mpsc;

use crate::types::{RegistrationMessage, TransferMessage};
use crate::Error;

/// 消息通道默认容量
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1;

/// 所有轮询任务共享的错误通道容量
pub const ERROR_CHANNEL_CAPACITY: usize = 64;

pub type TransferSender = mpsc::Sender<TransferMessage>;
pub type TransferReceiver = mpsc::Receiver<TransferMessage>;

pub type RegistrationSender = mpsc::Sender<RegistrationMessage>;
pub type RegistrationReceiver = mpsc::Receiver<RegistrationMessage>;

/// 轮询任务上报的致命或反复出现的错误
pub type ErrorSender = mpsc::Sender<Error>;
pub type ErrorReceiver = mpsc::Receiver<Error>;

pub fn transfer_channel(capacity: usize) -> (TransferSender, TransferReceiver) {
    mpsc::channel(capacity.max(1))
}

pub fn registration_channel(capacity: usize) -> (RegistrationSender, RegistrationReceiver) {
    mpsc::channel(capacity.max(1))
}

pub fn error_channel() -> (ErrorSender, ErrorReceiver) {
    mpsc::channel(ERROR_CHANNEL_CAPACITY)
}

/// 交给每个轮询任务的发送端
#[derive(Clone)]
pub struct MessageSenders {
    pub transfers: TransferSender,
    pub registrations: RegistrationSender,
}
