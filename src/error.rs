use thiserror::Error;

use crate::peer::types::SessionState;

/// Ошибки адаптера транспорта
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport rejected the operation: {0}")]
    Rejected(String),
    #[error("connection closed")]
    Closed,
}

/// Ошибки операций сессии
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Транспорт отказал, например answer без удалённого offer.
    #[error("adapter rejected the request: {0}")]
    AdapterRejected(String),
    /// Вставленный текст не декодируется в дескриптор.
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),
    #[error("data channel is not open")]
    ChannelNotOpen,
    #[error("{operation} is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::AdapterRejected(err.to_string())
    }
}

/// Ошибки передачи дескрипторов между пирами вне канала
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("exchange closed before a descriptor arrived")]
    Closed,
    #[error("session ended before a local descriptor was ready")]
    SessionEnded,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
}
