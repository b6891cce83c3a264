use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use webrtc::data_channel::{
    data_channel_message::DataChannelMessage, data_channel_state::RTCDataChannelState,
    RTCDataChannel,
};

use crate::error::TransportError;
use crate::peer::transport::{DataChannel, EventSender, TransportEvent};
use crate::peer::types::ChannelSide;

/// `RTCDataChannel` за трейтом [`DataChannel`]
pub struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
}

impl WebRtcChannel {
    pub fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self { dc }
    }
}

#[async_trait]
impl DataChannel for WebRtcChannel {
    fn label(&self) -> String {
        self.dc.label().to_owned()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.dc
            .send_text(text.to_owned())
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.dc
            .close()
            .await
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

/// Пробрасывает open/message/close канала в очередь событий сессии
pub fn attach_dc(dc: &Arc<RTCDataChannel>, side: ChannelSide, events: &EventSender) {
    let label = dc.label().to_owned();

    dc.on_open(Box::new({
        let events = events.clone();
        let label = label.clone();
        move || {
            info!("{side:?} data channel '{label}' open");
            let _ = events.send(TransportEvent::ChannelOpen(side));
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let events = events.clone();
        move |msg: DataChannelMessage| {
            debug!(
                "Received message on {side:?} channel, length: {}",
                msg.data.len()
            );
            let data = String::from_utf8_lossy(&msg.data).into_owned();
            let _ = events.send(TransportEvent::Message { side, data });
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new({
        let events = events.clone();
        move || {
            info!("{side:?} data channel '{label}' closed");
            let _ = events.send(TransportEvent::ChannelClosed(side));
            Box::pin(async {})
        }
    }));
}
