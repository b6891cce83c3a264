use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::{
    api::APIBuilder,
    data_channel::{data_channel_init::RTCDataChannelInit, RTCDataChannel},
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

use crate::error::TransportError;
use crate::peer::data_channel::{attach_dc, WebRtcChannel};
use crate::peer::transport::{Connection, DataChannel, EventSender, Transport, TransportEvent};
use crate::peer::types::{ChannelSide, Descriptor, DescriptorKind, PeerState, ServerConfig};
use crate::utils::add_ice_url_scheme;

/// Боевой транспорт на крейте `webrtc`
#[derive(Debug, Default, Clone)]
pub struct WebRtcTransport {
    include_loopback: bool,
}

impl WebRtcTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Собирать и loopback кандидатов, чтобы два пира на одной машине
    /// соединялись без других интерфейсов
    pub fn with_loopback_candidates(mut self) -> Self {
        self.include_loopback = true;
        self
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn create_connection(
        &self,
        ice_servers: &[ServerConfig],
        events: EventSender,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        let mut setting_engine = SettingEngine::default();
        if self.include_loopback {
            setting_engine.set_include_loopback_candidate(true);
        }
        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_config(ice_servers))
                .await
                .map_err(rejected)?,
        );
        wire_peer(&pc, &events);

        Ok(Arc::new(WebRtcConnection { pc, events }))
    }
}

/// Регистрирует обработчики соединения; все они только кладут события в очередь
fn wire_peer(pc: &Arc<RTCPeerConnection>, events: &EventSender) {
    // Weak: обработчики живут внутри самого peer connection
    let weak_pc = Arc::downgrade(pc);
    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let weak_pc = weak_pc.clone();
        let tx = tx.clone();
        Box::pin(async move {
            let Some(pc) = weak_pc.upgrade() else {
                return;
            };
            let local = match pc.local_description().await {
                Some(desc) => Descriptor::try_from(desc).ok(),
                None => None,
            };
            match cand {
                Some(c) => {
                    dump_candidate("LOCAL", &c);
                    let _ = tx.send(TransportEvent::CandidateDiscovered { local });
                }
                None => {
                    info!("ICE candidate gathering completed");
                    let _ = tx.send(TransportEvent::GatheringComplete { local });
                }
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!("Peer connection state changed to: {:?}", st);
        let _ = tx.send(TransportEvent::ConnectionState(peer_state(st)));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        info!("Remote data channel announced: '{}'", dc.label());
        let channel: Arc<dyn DataChannel> = Arc::new(WebRtcChannel::new(dc.clone()));
        // объявляем до подписки, чтобы open/message не пришли раньше самого канала
        let _ = tx.send(TransportEvent::InboundChannel(channel));
        attach_dc(&dc, ChannelSide::Inbound, &tx);
        Box::pin(async {})
    }));
}

/// `RTCPeerConnection` за трейтом [`Connection`]
pub struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    events: EventSender,
}

#[async_trait]
impl Connection for WebRtcConnection {
    async fn create_outbound_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(rejected)?;
        attach_dc(&dc, ChannelSide::Outbound, &self.events);
        Ok(Arc::new(WebRtcChannel::new(dc)))
    }

    async fn create_offer(&self) -> Result<Descriptor, TransportError> {
        let offer = self.pc.create_offer(None).await.map_err(rejected)?;
        Descriptor::try_from(offer)
    }

    async fn create_answer(&self) -> Result<Descriptor, TransportError> {
        let answer = self.pc.create_answer(None).await.map_err(rejected)?;
        Descriptor::try_from(answer)
    }

    async fn set_local_description(&self, descriptor: Descriptor) -> Result<(), TransportError> {
        let desc = RTCSessionDescription::try_from(descriptor)?;
        self.pc.set_local_description(desc).await.map_err(rejected)
    }

    async fn set_remote_description(
        &self,
        descriptor: Descriptor,
    ) -> Result<(), TransportError> {
        let desc = RTCSessionDescription::try_from(descriptor)?;
        self.pc.set_remote_description(desc).await.map_err(rejected)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc.close().await.map_err(rejected)
    }
}

impl TryFrom<RTCSessionDescription> for Descriptor {
    type Error = TransportError;

    fn try_from(desc: RTCSessionDescription) -> Result<Self, Self::Error> {
        match desc.sdp_type {
            RTCSdpType::Offer => Ok(Descriptor::offer(desc.sdp)),
            RTCSdpType::Answer => Ok(Descriptor::answer(desc.sdp)),
            other => Err(TransportError::Rejected(format!(
                "unsupported description type {other:?}"
            ))),
        }
    }
}

impl TryFrom<Descriptor> for RTCSessionDescription {
    type Error = TransportError;

    fn try_from(descriptor: Descriptor) -> Result<Self, Self::Error> {
        let desc = match descriptor.kind {
            DescriptorKind::Offer => {
                RTCSessionDescription::offer(descriptor.payload)
            }
            DescriptorKind::Answer => {
                RTCSessionDescription::answer(descriptor.payload)
            }
        };
        desc.map_err(rejected)
    }
}

fn peer_state(st: RTCPeerConnectionState) -> PeerState {
    match st {
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
        _ => PeerState::New,
    }
}

/// Конфигурация peer connection
fn rtc_config(ice_servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers_for(ice_servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Переводит серверы из конфигурации в тип транспорта
pub fn ice_servers_for(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Логирует локального кандидата по мере появления
fn dump_candidate(label: &str, cand: &RTCIceCandidate) {
    if let Ok(init) = cand.to_json() {
        debug!(
            "Candidate {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?}",
            init.candidate, init.sdp_mid, init.sdp_mline_index
        );
    }
}

fn rejected(err: webrtc::Error) -> TransportError {
    TransportError::Rejected(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::ServerKind;

    #[test]
    fn test_ice_servers_mapping() {
        let servers = vec![
            ServerConfig {
                id: "a".into(),
                kind: ServerKind::Stun,
                url: "stun.example.org:3478".into(),
                username: None,
                credential: None,
            },
            ServerConfig {
                id: "b".into(),
                kind: ServerKind::Turn,
                url: "relay.example.org".into(),
                username: Some("user".into()),
                credential: Some("secret".into()),
            },
        ];
        let mapped = ice_servers_for(&servers);
        assert_eq!(mapped[0].urls, vec!["stun:stun.example.org:3478".to_string()]);
        assert!(mapped[0].username.is_empty());
        assert_eq!(mapped[1].urls, vec!["turn:relay.example.org".to_string()]);
        assert_eq!(mapped[1].username, "user");
        assert_eq!(mapped[1].credential, "secret");
    }

    #[test]
    fn test_unsupported_description_type() {
        let desc = RTCSessionDescription::default();
        assert!(Descriptor::try_from(desc).is_err());
    }
}
