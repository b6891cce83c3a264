use serde::{Deserialize, Serialize};
use std::fmt;

/// Какую сторону рукопожатия играет этот процесс
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Создаёт offer (host)
    Initiator,
    /// Отвечает на вставленный offer (guest)
    Responder,
}

/// Жизненный цикл сессии, в единственно допустимом порядке.
///
/// `Closed` идёт последним, переходы только вперёд из него не выводят.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    #[default]
    Idle,
    RoleChosen,
    AwaitingLocalDescriptor,
    LocalDescriptorReady,
    AwaitingRemoteDescriptor,
    Connected,
    Closed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorKind {
    Offer,
    Answer,
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorKind::Offer => f.write_str("offer"),
            DescriptorKind::Answer => f.write_str("answer"),
        }
    }
}

/// Описание сессии, которое передаётся между пирами.
///
/// Сериализуется с теми же полями, что и браузерный
/// `RTCSessionDescription`, так что JSON из JS консоли тоже декодируется.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    #[serde(rename = "type")]
    pub kind: DescriptorKind,
    #[serde(rename = "sdp")]
    pub payload: String,
}

impl Descriptor {
    pub fn offer(payload: impl Into<String>) -> Self {
        Self {
            kind: DescriptorKind::Offer,
            payload: payload.into(),
        }
    }

    pub fn answer(payload: impl Into<String>) -> Self {
        Self {
            kind: DescriptorKind::Answer,
            payload: payload.into(),
        }
    }
}

/// К какому из двух каналов сессии относится событие
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelSide {
    /// Канал, который создала эта сторона и в который пишет
    Outbound,
    /// Канал удалённого пира, объявленный нам
    Inbound,
}

/// Состояние соединения по данным транспорта
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Запись ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ServerKind,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Stun,
    Turn,
}
