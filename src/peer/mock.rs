//! Транспорт в памяти для тестов и симуляции
//!
//! Соединения из одного [`MockNetwork`] видят друг друга.
//! Мок соблюдает правила offer/answer настоящего peer connection: нет
//! offer после применённого удалённого offer, нет answer без него, а стороны
//! связываются, когда создатель offer применяет answer.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::error::TransportError;
use crate::peer::transport::{Connection, DataChannel, EventSender, Transport, TransportEvent};
use crate::peer::types::{ChannelSide, Descriptor, DescriptorKind, PeerState, ServerConfig};
use crate::utils::random_id;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Сеть
// ============================================================================

/// Реестр, связывающий мок-пиры по id из их дескрипторов
#[derive(Default)]
pub struct MockNetwork {
    connections: Mutex<HashMap<String, Weak<MockConnection>>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, connection: &Arc<MockConnection>) {
        locked(&self.connections).insert(connection.id.clone(), Arc::downgrade(connection));
    }

    fn find(&self, id: &str) -> Option<Arc<MockConnection>> {
        locked(&self.connections).get(id).and_then(Weak::upgrade)
    }
}

// ============================================================================
// Транспорт
// ============================================================================

/// Мок-транспорт, выдающий [`MockConnection`]
pub struct MockTransport {
    network: Arc<MockNetwork>,
    candidates: usize,
    auto_gather: bool,
    fail_connect: bool,
    delay: Option<Duration>,
    created: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockTransport {
    /// Каждое соединение находит два кандидата, затем сообщает о завершении
    pub fn new(network: Arc<MockNetwork>) -> Self {
        Self {
            network,
            candidates: 2,
            auto_gather: true,
            fail_connect: false,
            delay: None,
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn with_candidates(mut self, candidates: usize) -> Self {
        self.candidates = candidates;
        self
    }

    /// Сбор кандидатов идёт только через
    /// [`MockConnection::discover_candidate`] и
    /// [`MockConnection::finish_gathering`]
    pub fn manual_gathering(mut self) -> Self {
        self.auto_gather = false;
        self
    }

    /// Offer и answer создаются с задержкой `delay`
    pub fn with_negotiation_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Любой вызов `create_connection` падает
    pub fn failing(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Последнее созданное соединение
    pub fn last_connection(&self) -> Option<Arc<MockConnection>> {
        locked(&self.created).last().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn create_connection(
        &self,
        _ice_servers: &[ServerConfig],
        events: EventSender,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        if self.fail_connect {
            return Err(TransportError::Rejected("mock network unavailable".into()));
        }
        let connection = Arc::new(MockConnection {
            id: random_id(),
            network: Arc::downgrade(&self.network),
            events,
            candidates: self.candidates,
            auto_gather: self.auto_gather,
            delay: self.delay,
            state: Mutex::new(MockState::default()),
        });
        self.network.register(&connection);
        locked(&self.created).push(connection.clone());
        Ok(connection)
    }
}

// ============================================================================
// Соединение
// ============================================================================

#[derive(Default)]
struct MockState {
    local: Option<Descriptor>,
    remote: Option<Descriptor>,
    discovered: usize,
    outbound: Vec<Arc<MockChannel>>,
    closed: bool,
}

/// Мок peer connection
pub struct MockConnection {
    id: String,
    network: Weak<MockNetwork>,
    events: EventSender,
    candidates: usize,
    auto_gather: bool,
    delay: Option<Duration>,
    state: Mutex<MockState>,
}

impl MockConnection {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Сколько кандидатов найдено на данный момент
    pub fn discovered(&self) -> usize {
        locked(&self.state).discovered
    }

    pub fn is_closed(&self) -> bool {
        locked(&self.state).closed
    }

    /// Находим ещё одного кандидата и сообщаем о нём с обновлённым local description
    pub fn discover_candidate(&self) {
        let local = {
            let mut state = locked(&self.state);
            if state.closed || state.local.is_none() {
                return;
            }
            state.discovered += 1;
            self.current_local(&state)
        };
        let _ = self
            .events
            .send(TransportEvent::CandidateDiscovered { local });
    }

    /// Сообщаем, что кандидатов больше не будет
    pub fn finish_gathering(&self) {
        let local = {
            let state = locked(&self.state);
            if state.closed || state.local.is_none() {
                return;
            }
            self.current_local(&state)
        };
        let _ = self.events.send(TransportEvent::GatheringComplete { local });
    }

    /// Применённый remote description
    pub fn remote(&self) -> Option<Descriptor> {
        locked(&self.state).remote.clone()
    }

    /// Объявляем ещё один удалённый канал, уже открытый
    pub fn announce_inbound(&self, label: &str) -> Arc<MockChannel> {
        let channel = Arc::new(MockChannel::new(label, self.events.clone()));
        channel.open.store(true, Ordering::SeqCst);
        let _ = self
            .events
            .send(TransportEvent::InboundChannel(channel.clone()));
        channel
    }

    fn session_sdp(&self) -> String {
        format!("v=0\r\no=mock {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n", self.id)
    }

    /// Local description с найденными кандидатами, как настоящее
    /// соединение перестраивает своё описание
    fn current_local(&self, state: &MockState) -> Option<Descriptor> {
        let local = state.local.as_ref()?;
        let mut payload = local.payload.clone();
        for n in 1..=state.discovered {
            payload.push_str(&format!(
                "a=candidate:{n} 1 udp 2130706431 127.0.0.1 {} typ host\r\n",
                50000 + n
            ));
        }
        Some(Descriptor {
            kind: local.kind,
            payload,
        })
    }

    async fn negotiation_delay(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn ensure_open(state: &MockState) -> Result<(), TransportError> {
        if state.closed {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    /// Связываем обе стороны после применения answer
    fn link(&self, answerer: &MockConnection) {
        for (side, other) in [(self, answerer), (answerer, self)] {
            let outbound = locked(&side.state).outbound.clone();
            let _ = side
                .events
                .send(TransportEvent::ConnectionState(PeerState::Connected));
            for channel in outbound {
                channel.open(other.events.clone());
                let _ = side
                    .events
                    .send(TransportEvent::ChannelOpen(ChannelSide::Outbound));
                let far_end: Arc<dyn DataChannel> = Arc::new(MockChannel::far_end(&channel));
                let _ = other.events.send(TransportEvent::InboundChannel(far_end));
                let _ = other
                    .events
                    .send(TransportEvent::ChannelOpen(ChannelSide::Inbound));
            }
        }
    }
}

fn peer_id(payload: &str) -> Option<&str> {
    payload
        .lines()
        .find_map(|line| line.strip_prefix("o=mock "))
        .and_then(|rest| rest.split_whitespace().next())
}

#[async_trait]
impl Connection for MockConnection {
    async fn create_outbound_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let mut state = locked(&self.state);
        Self::ensure_open(&state)?;
        let channel = Arc::new(MockChannel::new(label, self.events.clone()));
        state.outbound.push(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<Descriptor, TransportError> {
        self.negotiation_delay().await;
        let state = locked(&self.state);
        Self::ensure_open(&state)?;
        if state.remote.is_some() {
            return Err(TransportError::Rejected(
                "cannot create an offer after applying a remote description".into(),
            ));
        }
        Ok(Descriptor::offer(self.session_sdp()))
    }

    async fn create_answer(&self) -> Result<Descriptor, TransportError> {
        self.negotiation_delay().await;
        let state = locked(&self.state);
        Self::ensure_open(&state)?;
        match &state.remote {
            Some(remote) if remote.kind == DescriptorKind::Offer => {
                Ok(Descriptor::answer(self.session_sdp()))
            }
            _ => Err(TransportError::Rejected(
                "cannot create an answer without a remote offer".into(),
            )),
        }
    }

    async fn set_local_description(&self, descriptor: Descriptor) -> Result<(), TransportError> {
        {
            let mut state = locked(&self.state);
            Self::ensure_open(&state)?;
            state.local = Some(descriptor);
            state.discovered = 0;
        }
        if self.auto_gather {
            for _ in 0..self.candidates {
                self.discover_candidate();
            }
            self.finish_gathering();
        }
        Ok(())
    }

    async fn set_remote_description(
        &self,
        descriptor: Descriptor,
    ) -> Result<(), TransportError> {
        let peer = peer_id(&descriptor.payload)
            .and_then(|id| self.network.upgrade()?.find(id))
            .ok_or_else(|| TransportError::Rejected("unknown remote peer".into()))?;

        {
            let mut state = locked(&self.state);
            Self::ensure_open(&state)?;
            let local_kind = state.local.as_ref().map(|d| d.kind);
            match (descriptor.kind, local_kind) {
                (DescriptorKind::Offer, Some(DescriptorKind::Offer)) => {
                    return Err(TransportError::Rejected(
                        "remote offer while a local offer is pending".into(),
                    ));
                }
                (DescriptorKind::Answer, kind) if kind != Some(DescriptorKind::Offer) => {
                    return Err(TransportError::Rejected(
                        "remote answer without a local offer".into(),
                    ));
                }
                _ => {}
            }
            state.remote = Some(descriptor.clone());
        }

        if descriptor.kind == DescriptorKind::Answer {
            self.link(&peer);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let outbound = {
            let mut state = locked(&self.state);
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            std::mem::take(&mut state.outbound)
        };
        for channel in outbound {
            channel.close().await?;
        }
        let _ = self
            .events
            .send(TransportEvent::ConnectionState(PeerState::Closed));
        Ok(())
    }
}

// ============================================================================
// Data channel
// ============================================================================

/// Мок data channel; сообщения попадают в очередь событий другой стороны
pub struct MockChannel {
    label: String,
    open: Arc<AtomicBool>,
    own_events: EventSender,
    peer_events: Arc<Mutex<Option<EventSender>>>,
    far_end: bool,
}

impl MockChannel {
    fn new(label: &str, own_events: EventSender) -> Self {
        Self {
            label: label.to_string(),
            open: Arc::new(AtomicBool::new(false)),
            own_events,
            peer_events: Arc::new(Mutex::new(None)),
            far_end: false,
        }
    }

    /// Хэндл этого канала для удалённой стороны
    fn far_end(channel: &MockChannel) -> Self {
        Self {
            label: channel.label.clone(),
            open: channel.open.clone(),
            own_events: channel.own_events.clone(),
            peer_events: channel.peer_events.clone(),
            far_end: true,
        }
    }

    fn open(&self, peer_events: EventSender) {
        *locked(&self.peer_events) = Some(peer_events);
        self.open.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataChannel for MockChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Rejected("channel not open".into()));
        }
        // Сообщения с дальнего конца идут обратно создателю
        let target = if self.far_end {
            Some(self.own_events.clone())
        } else {
            locked(&self.peer_events).clone()
        };
        let side = if self.far_end {
            ChannelSide::Outbound
        } else {
            ChannelSide::Inbound
        };
        target
            .ok_or(TransportError::Closed)?
            .send(TransportEvent::Message {
                side,
                data: text.to_string(),
            })
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self
            .own_events
            .send(TransportEvent::ChannelClosed(ChannelSide::Outbound));
        if let Some(peer) = locked(&self.peer_events).as_ref() {
            let _ = peer.send(TransportEvent::ChannelClosed(ChannelSide::Inbound));
        }
        Ok(())
    }
}
