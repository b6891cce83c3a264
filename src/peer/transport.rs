//! Возможности транспорта
//!
//! Сессия управляет peer connection только через эти трейты, поэтому
//! WebRTC стек и мок в памяти взаимозаменяемы.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::peer::types::{ChannelSide, Descriptor, PeerState, ServerConfig};

/// Событие соединения, в том порядке, в каком его поднял транспорт
pub enum TransportEvent {
    /// Найден новый локальный кандидат; несёт текущий local description
    CandidateDiscovered { local: Option<Descriptor> },
    /// Кандидатов больше не будет; несёт итоговый local description
    GatheringComplete { local: Option<Descriptor> },
    /// Объявлен канал удалённого пира
    InboundChannel(Arc<dyn DataChannel>),
    ChannelOpen(ChannelSide),
    ChannelClosed(ChannelSide),
    Message { side: ChannelSide, data: String },
    ConnectionState(PeerState),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::CandidateDiscovered { local } => f
                .debug_struct("CandidateDiscovered")
                .field("has_local", &local.is_some())
                .finish(),
            TransportEvent::GatheringComplete { local } => f
                .debug_struct("GatheringComplete")
                .field("has_local", &local.is_some())
                .finish(),
            TransportEvent::InboundChannel(channel) => f
                .debug_tuple("InboundChannel")
                .field(&channel.label())
                .finish(),
            TransportEvent::ChannelOpen(side) => f.debug_tuple("ChannelOpen").field(side).finish(),
            TransportEvent::ChannelClosed(side) => {
                f.debug_tuple("ChannelClosed").field(side).finish()
            }
            TransportEvent::Message { side, data } => f
                .debug_struct("Message")
                .field("side", side)
                .field("len", &data.len())
                .finish(),
            TransportEvent::ConnectionState(state) => {
                f.debug_tuple("ConnectionState").field(state).finish()
            }
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Создаёт peer connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Создать соединение. Все его события идут в `events`.
    async fn create_connection(
        &self,
        ice_servers: &[ServerConfig],
        events: EventSender,
    ) -> Result<Arc<dyn Connection>, TransportError>;
}

/// Одно peer connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Создать канал, в который пишет эта сторона
    async fn create_outbound_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError>;

    async fn create_offer(&self) -> Result<Descriptor, TransportError>;

    async fn create_answer(&self) -> Result<Descriptor, TransportError>;

    /// Применить local description; отсюда начинается сбор кандидатов
    async fn set_local_description(&self, descriptor: Descriptor) -> Result<(), TransportError>;

    async fn set_remote_description(&self, descriptor: Descriptor)
        -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Data channel приложения
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
