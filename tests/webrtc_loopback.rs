//! Два настоящих peer connection на этой машине. Занимает UDP сокеты, поэтому
//! запускается только явно: `cargo test -- --ignored`.

use copypeer_lib::config::SessionConfig;
use copypeer_lib::peer::connection::WebRtcTransport;
use copypeer_lib::peer::types::{Role, SessionState};
use copypeer_lib::session::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(20);

fn loopback_session() -> Session {
    let transport = WebRtcTransport::new().with_loopback_candidates();
    let config = SessionConfig::default().with_ice_servers(Vec::new());
    Session::new(Arc::new(transport), config)
}

async fn reach(session: &Session, state: SessionState) -> String {
    let mut updates = session.subscribe();
    let descriptor = timeout(WAIT, updates.wait_for(|s| s.state >= state))
        .await
        .expect("timed out")
        .expect("session dropped")
        .local_descriptor
        .clone();
    descriptor
}

#[tokio::test]
#[ignore]
async fn test_loopback_peers_exchange_text() {
    let host = loopback_session();
    let guest = loopback_session();
    host.start().await.unwrap();
    host.choose_role(Role::Initiator).unwrap();
    guest.start().await.unwrap();
    guest.choose_role(Role::Responder).unwrap();

    host.create_offer().await.unwrap();
    let offer = reach(&host, SessionState::LocalDescriptorReady).await;
    host.confirm_handoff().unwrap();

    guest.remote_response(&offer).await.unwrap();
    let answer = reach(&guest, SessionState::LocalDescriptorReady).await;
    guest.confirm_handoff().unwrap();

    host.accept_offer(&answer).await.unwrap();
    reach(&host, SessionState::Connected).await;
    reach(&guest, SessionState::Connected).await;

    host.send_data("over the wire").await.unwrap();
    let mut updates = guest.subscribe();
    timeout(WAIT, updates.wait_for(|s| s.last_message == "over the wire"))
        .await
        .expect("timed out")
        .expect("session dropped");

    host.close().await;
    guest.close().await;
    assert!(!host.holds_transport());
    assert!(!guest.holds_transport());
}
