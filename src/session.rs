//! Машина состояний сессии
//!
//! [`Session`] владеет одним соединением, исходящим (send) каналом и
//! каналом удалённого пира (receive). Менять её могут только операции
//! пользователя и события транспорта. Каждое изменение публикуется
//! как [`SessionSnapshot`] в watch канал.

use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};

use crate::config::{ExposurePolicy, SessionConfig};
use crate::error::{SessionError, TransportError};
use crate::peer::codec;
use crate::peer::ice::analyze_candidates;
use crate::peer::transport::{Connection, DataChannel, EventReceiver, Transport, TransportEvent};
use crate::peer::types::{ChannelSide, Descriptor, PeerState, Role, SessionState};

/// Наблюдаемая копия сессии
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub role: Option<Role>,
    /// Закодированный локальный дескриптор, пустой до публикации
    pub local_descriptor: String,
    pub last_message: String,
    /// Сколько сообщений получено; различает одинаковые сообщения подряд
    pub received: u64,
}

#[derive(Default)]
struct Fields {
    state: SessionState,
    role: Option<Role>,
    /// Растёт в `start` и `close`; результаты со старым значением устарели
    generation: u64,
    connection: Option<Arc<dyn Connection>>,
    send_channel: Option<Arc<dyn DataChannel>>,
    receive_channel: Option<Arc<dyn DataChannel>>,
    local_descriptor: String,
    last_message: String,
    received: u64,
    /// Offer или answer создаётся и применяется
    negotiating: bool,
    peer_connected: bool,
    send_open: bool,
}

impl Fields {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            role: self.role,
            local_descriptor: self.local_descriptor.clone(),
            last_message: self.last_message.clone(),
            received: self.received,
        }
    }

    /// Переход только вперёд
    fn advance(&mut self, next: SessionState) {
        if next > self.state {
            info!("Session state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && self.state != SessionState::Closed
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    fields: Mutex<Fields>,
    snapshot: watch::Sender<SessionSnapshot>,
}

/// Хэндл единственной сессии процесса. Клоны разделяют состояние.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                fields: Mutex::new(Fields::default()),
                snapshot,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.fields().state
    }

    pub fn role(&self) -> Option<Role> {
        self.fields().role
    }

    pub fn local_descriptor(&self) -> String {
        self.fields().local_descriptor.clone()
    }

    pub fn last_message(&self) -> String {
        self.fields().last_message.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.fields().snapshot()
    }

    /// Получает новый снимок после каждого изменения
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Держит ли сессия ещё соединение или один из каналов
    pub fn holds_transport(&self) -> bool {
        let f = self.fields();
        f.connection.is_some() || f.send_channel.is_some() || f.receive_channel.is_some()
    }

    fn fields(&self) -> MutexGuard<'_, Fields> {
        self.inner.fields.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn commit(&self, f: &Fields) {
        self.inner.snapshot.send_replace(f.snapshot());
    }

    /// Фиксирует роль. Повторный выбор ничего не делает, смена запрещена.
    pub fn choose_role(&self, role: Role) -> Result<(), SessionError> {
        let mut f = self.fields();
        match f.role {
            Some(current) if current == role => return Ok(()),
            Some(_) => {
                return Err(SessionError::InvalidState {
                    operation: "choose_role",
                    state: f.state,
                })
            }
            None if f.state == SessionState::Closed => {
                return Err(SessionError::InvalidState {
                    operation: "choose_role",
                    state: f.state,
                })
            }
            None => {}
        }
        info!("Role chosen: {role:?}");
        f.role = Some(role);
        if f.connection.is_some() {
            f.advance(SessionState::RoleChosen);
        }
        self.commit(&f);
        Ok(())
    }

    /// Создаёт соединение и исходящий канал и начинает разбирать
    /// события транспорта
    pub async fn start(&self) -> Result<(), SessionError> {
        let generation = {
            let mut f = self.fields();
            if f.state != SessionState::Idle || f.generation != 0 {
                return Err(SessionError::InvalidState {
                    operation: "start",
                    state: f.state,
                });
            }
            f.generation += 1;
            f.generation
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let connection = match self
            .inner
            .transport
            .create_connection(&self.inner.config.ice_servers, tx)
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                error!("Failed to create peer connection: {e}");
                self.abort_start(generation);
                return Err(e.into());
            }
        };

        let send_channel = match connection
            .create_outbound_channel(&self.inner.config.channel_name)
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                error!("Failed to create data channel: {e}");
                let _ = connection.close().await;
                self.abort_start(generation);
                return Err(e.into());
            }
        };

        let live = {
            let mut f = self.fields();
            let live = f.is_live(generation);
            if live {
                f.connection = Some(connection.clone());
                f.send_channel = Some(send_channel.clone());
                if f.role.is_some() {
                    f.advance(SessionState::RoleChosen);
                } else {
                    info!("Session started, waiting for a role");
                }
                self.commit(&f);
            }
            live
        };
        if !live {
            info!("Session closed while starting, releasing connection");
            let _ = send_channel.close().await;
            let _ = connection.close().await;
            return Err(SessionError::InvalidState {
                operation: "start",
                state: SessionState::Closed,
            });
        }

        self.spawn_event_pump(generation, rx);
        Ok(())
    }

    fn abort_start(&self, generation: u64) {
        let mut f = self.fields();
        if f.generation == generation {
            f.state = SessionState::Closed;
            self.commit(&f);
        }
    }

    fn spawn_event_pump(&self, generation: u64, mut rx: EventReceiver) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !(Session { inner }).handle_event(generation, event) {
                    break;
                }
            }
            debug!("Event pump for connection generation {generation} stopped");
        });
    }

    /// Initiator: создаём offer и применяем локально
    pub async fn create_offer(&self) -> Result<(), SessionError> {
        let (connection, generation) = self.begin_negotiation("create_offer", Role::Initiator)?;
        let offer = connection.create_offer().await;
        self.apply_local("offer", connection, generation, offer).await
    }

    /// Responder: создаём answer на принятый offer и применяем локально
    pub async fn create_answer(&self) -> Result<(), SessionError> {
        let (connection, generation) = self.begin_negotiation("create_answer", Role::Responder)?;
        let answer = connection.create_answer().await;
        self.apply_local("answer", connection, generation, answer).await
    }

    fn begin_negotiation(
        &self,
        operation: &'static str,
        role: Role,
    ) -> Result<(Arc<dyn Connection>, u64), SessionError> {
        let mut f = self.fields();
        let connection = match (&f.connection, f.role, f.state, f.negotiating) {
            (Some(connection), Some(r), SessionState::RoleChosen, false) if r == role => {
                connection.clone()
            }
            _ => {
                return Err(SessionError::InvalidState {
                    operation,
                    state: f.state,
                })
            }
        };
        f.negotiating = true;
        Ok((connection, f.generation))
    }

    async fn apply_local(
        &self,
        kind: &str,
        connection: Arc<dyn Connection>,
        generation: u64,
        created: Result<Descriptor, TransportError>,
    ) -> Result<(), SessionError> {
        if !self.fields().is_live(generation) {
            info!("Discarding {kind} resolved after close");
            return Err(SessionError::InvalidState {
                operation: "apply_local",
                state: SessionState::Closed,
            });
        }

        let descriptor = match created {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!("Failed to create {kind}: {e}");
                self.end_negotiation(generation);
                return Err(e.into());
            }
        };
        debug!("Created {kind}:\n{}", descriptor.payload);

        if let Err(e) = connection.set_local_description(descriptor).await {
            error!("Failed to set local {kind}: {e}");
            self.end_negotiation(generation);
            return Err(e.into());
        }

        let mut f = self.fields();
        if !f.is_live(generation) {
            info!("Discarding local {kind} applied after close");
            return Err(SessionError::InvalidState {
                operation: "apply_local",
                state: SessionState::Closed,
            });
        }
        f.negotiating = false;
        f.advance(SessionState::AwaitingLocalDescriptor);
        self.commit(&f);
        Ok(())
    }

    fn end_negotiation(&self, generation: u64) {
        let mut f = self.fields();
        if f.generation == generation {
            f.negotiating = false;
        }
    }

    /// Декодирует вставленный дескриптор и применяет его как remote description.
    ///
    /// Декодирование идёт первым, так что битый текст не доходит
    /// до соединения.
    pub async fn accept_offer(&self, remote: &str) -> Result<(), SessionError> {
        let descriptor =
            codec::decode(remote).inspect_err(|e| warn!("Rejected pasted descriptor: {e}"))?;

        let connection = {
            let f = self.fields();
            match (&f.connection, f.role, f.state) {
                (_, _, SessionState::Closed) | (None, _, _) | (_, None, _) => {
                    return Err(SessionError::InvalidState {
                        operation: "accept_offer",
                        state: f.state,
                    })
                }
                (Some(connection), Some(_), _) => connection.clone(),
            }
        };

        let kind = descriptor.kind;
        connection
            .set_remote_description(descriptor)
            .await
            .inspect_err(|e| error!("Failed to set remote {kind}: {e}"))?;
        info!("Remote {kind} accepted");
        Ok(())
    }

    /// Responder: принимаем вставленный offer и отвечаем на него
    pub async fn remote_response(&self, remote: &str) -> Result<(), SessionError> {
        {
            let f = self.fields();
            if f.role != Some(Role::Responder)
                || f.state != SessionState::RoleChosen
                || f.negotiating
            {
                return Err(SessionError::InvalidState {
                    operation: "remote_response",
                    state: f.state,
                });
            }
        }
        self.accept_offer(remote).await?;
        self.create_answer().await
    }

    /// Готовый локальный дескриптор передан другой стороне
    pub fn confirm_handoff(&self) -> Result<(), SessionError> {
        let mut f = self.fields();
        match f.state {
            SessionState::LocalDescriptorReady => {
                f.advance(SessionState::AwaitingRemoteDescriptor);
                self.commit(&f);
                Ok(())
            }
            // уже дальше, например соединились до подтверждения передачи
            SessionState::AwaitingRemoteDescriptor | SessionState::Connected => Ok(()),
            state => Err(SessionError::InvalidState {
                operation: "confirm_handoff",
                state,
            }),
        }
    }

    pub async fn send_data(&self, value: &str) -> Result<(), SessionError> {
        let channel = {
            let f = self.fields();
            match (&f.send_channel, f.state) {
                (Some(channel), SessionState::Connected) if channel.is_open() => channel.clone(),
                _ => return Err(SessionError::ChannelNotOpen),
            }
        };
        channel.send_text(value).await?;
        debug!("Sent data: {value}");
        Ok(())
    }

    /// Освобождает каналы и соединение. Можно вызывать повторно.
    pub async fn close(&self) {
        let (connection, send_channel, receive_channel) = {
            let mut f = self.fields();
            if f.state == SessionState::Closed && f.connection.is_none() {
                debug!("Session already closed");
                return;
            }
            f.generation += 1;
            f.state = SessionState::Closed;
            f.negotiating = false;
            f.peer_connected = false;
            f.send_open = false;
            f.local_descriptor.clear();
            f.last_message.clear();
            let handles = (
                f.connection.take(),
                f.send_channel.take(),
                f.receive_channel.take(),
            );
            self.commit(&f);
            handles
        };

        for (name, channel) in [("send", send_channel), ("receive", receive_channel)] {
            if let Some(channel) = channel {
                if let Err(e) = channel.close().await {
                    warn!("Failed to close {name} channel: {e}");
                }
            }
        }
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                warn!("Failed to close peer connection: {e}");
            }
        }
        info!("Session closed");
    }

    /// Применяет одно событие транспорта. Возвращает false, если событие
    /// относится к уже освобождённому соединению.
    fn handle_event(&self, generation: u64, event: TransportEvent) -> bool {
        let mut f = self.fields();
        if !f.is_live(generation) {
            debug!("Dropping {event:?} from a released connection");
            return false;
        }

        match event {
            TransportEvent::CandidateDiscovered { local } => {
                self.on_local_description(&mut f, local, false)
            }
            TransportEvent::GatheringComplete { local } => {
                self.on_local_description(&mut f, local, true)
            }
            TransportEvent::InboundChannel(channel) => {
                let label = channel.label();
                if label != self.inner.config.channel_name {
                    warn!(
                        "Ignoring inbound channel '{label}', expected '{}'",
                        self.inner.config.channel_name
                    );
                } else if f.receive_channel.is_some() {
                    warn!("Ignoring second inbound channel '{label}'");
                } else {
                    info!("Receive channel '{label}' bound");
                    f.receive_channel = Some(channel);
                }
            }
            TransportEvent::ChannelOpen(ChannelSide::Outbound) => f.send_open = true,
            TransportEvent::ChannelOpen(ChannelSide::Inbound) => {
                debug!("Receive channel open");
            }
            TransportEvent::ChannelClosed(ChannelSide::Outbound) => {
                info!("Send channel closed");
                f.send_open = false;
            }
            TransportEvent::ChannelClosed(ChannelSide::Inbound) => {
                info!("Receive channel closed");
            }
            TransportEvent::Message {
                side: ChannelSide::Inbound,
                data,
            } => {
                if f.receive_channel.is_some() {
                    f.last_message = data;
                    f.received += 1;
                } else {
                    warn!("Message arrived before the receive channel was bound");
                }
            }
            TransportEvent::Message {
                side: ChannelSide::Outbound,
                data,
            } => {
                debug!("Ignoring {} bytes written back on the send channel", data.len());
            }
            TransportEvent::ConnectionState(state) => {
                f.peer_connected = state == PeerState::Connected;
                if matches!(state, PeerState::Disconnected | PeerState::Failed) {
                    warn!("Peer connection {state:?}");
                }
            }
        }

        if f.receive_channel.is_some() && f.peer_connected && f.send_open {
            f.advance(SessionState::Connected);
        }
        self.commit(&f);
        true
    }

    /// Публикует local description согласно политике публикации
    fn on_local_description(&self, f: &mut Fields, local: Option<Descriptor>, complete: bool) {
        let negotiating = f.negotiating
            || (f.state >= SessionState::AwaitingLocalDescriptor
                && f.state < SessionState::Connected);
        if !negotiating {
            debug!("Ignoring local description update outside negotiation");
            return;
        }

        let expose = complete || self.inner.config.exposure == ExposurePolicy::EveryCandidate;
        if !expose {
            debug!("Candidate discovered, holding descriptor until gathering completes");
            return;
        }

        let Some(descriptor) = local else {
            debug!("No local description to publish yet");
            return;
        };
        match codec::encode(&descriptor) {
            Ok(text) => {
                if complete {
                    analyze_candidates(&descriptor.payload);
                }
                debug!(
                    "Local {} published, fingerprint {}",
                    descriptor.kind,
                    codec::fingerprint(&text)
                );
                f.local_descriptor = text;
                f.advance(SessionState::LocalDescriptorReady);
            }
            Err(e) => error!("Failed to encode local {}: {e}", descriptor.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::mock::{MockNetwork, MockTransport};

    fn session(transport: MockTransport) -> Session {
        Session::new(Arc::new(transport), SessionConfig::default())
    }

    #[tokio::test]
    async fn test_start_without_role_stays_idle() {
        let s = session(MockTransport::new(MockNetwork::new()));
        s.start().await.unwrap();
        assert_eq!(s.state(), SessionState::Idle);
        assert!(s.holds_transport());

        s.choose_role(Role::Initiator).unwrap();
        assert_eq!(s.state(), SessionState::RoleChosen);
    }

    #[tokio::test]
    async fn test_role_before_start() {
        let s = session(MockTransport::new(MockNetwork::new()));
        s.choose_role(Role::Responder).unwrap();
        assert_eq!(s.state(), SessionState::Idle);
        s.start().await.unwrap();
        assert_eq!(s.state(), SessionState::RoleChosen);
    }

    #[tokio::test]
    async fn test_role_is_fixed() {
        let s = session(MockTransport::new(MockNetwork::new()));
        s.choose_role(Role::Initiator).unwrap();
        s.choose_role(Role::Initiator).unwrap();
        assert!(matches!(
            s.choose_role(Role::Responder),
            Err(SessionError::InvalidState { .. })
        ));
        assert_eq!(s.role(), Some(Role::Initiator));
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let s = session(MockTransport::new(MockNetwork::new()));
        s.start().await.unwrap();
        assert!(matches!(
            s.start().await,
            Err(SessionError::InvalidState {
                operation: "start",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_adapter_failure_on_start_closes_session() {
        let s = session(MockTransport::new(MockNetwork::new()).failing());
        assert!(matches!(
            s.start().await,
            Err(SessionError::AdapterRejected(_))
        ));
        assert_eq!(s.state(), SessionState::Closed);
        assert!(!s.holds_transport());
    }

    #[tokio::test]
    async fn test_offer_requires_initiator() {
        let s = session(MockTransport::new(MockNetwork::new()));
        s.choose_role(Role::Responder).unwrap();
        s.start().await.unwrap();
        assert!(matches!(
            s.create_offer().await,
            Err(SessionError::InvalidState { .. })
        ));
        assert_eq!(s.state(), SessionState::RoleChosen);
    }

    #[tokio::test]
    async fn test_offer_before_start_rejected() {
        let s = session(MockTransport::new(MockNetwork::new()));
        s.choose_role(Role::Initiator).unwrap();
        assert!(matches!(
            s.create_offer().await,
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_confirm_handoff_requires_ready_descriptor() {
        let s = session(MockTransport::new(MockNetwork::new()));
        s.choose_role(Role::Initiator).unwrap();
        s.start().await.unwrap();
        assert!(matches!(
            s.confirm_handoff(),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_from_idle() {
        let s = session(MockTransport::new(MockNetwork::new()));
        s.close().await;
        assert_eq!(s.state(), SessionState::Closed);
        assert!(matches!(
            s.start().await,
            Err(SessionError::InvalidState { .. })
        ));
    }
}
