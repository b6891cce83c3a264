use log::warn;

use crate::error::{ExchangeError, SessionError};
use crate::peer::types::{Role, SessionState};
use crate::session::Session;
use crate::signaling::{receive_remote_descriptor, share_local_descriptor, ConsoleExchange};

/// Спрашивает, какую сторону играет терминал. `None`, если ввод закончился.
pub(super) async fn prompt_role(console: &ConsoleExchange) -> Result<Option<Role>, ExchangeError> {
    println!("Are you the host (creates the offer) or the guest (answers it)? [host/guest]");
    while let Some(line) = console.next_line().await? {
        match line.trim().to_ascii_lowercase().as_str() {
            "h" | "host" | "local" => return Ok(Some(Role::Initiator)),
            "g" | "guest" | "remote" => return Ok(Some(Role::Responder)),
            "" => {}
            other => println!("Unknown role '{other}', type host or guest"),
        }
    }
    Ok(None)
}

/// Обмен дескрипторами для выбранной роли. Возвращает, дошла ли сессия
/// до `Connected`.
pub(super) async fn run(session: &Session, console: &ConsoleExchange) -> anyhow::Result<bool> {
    match session.role() {
        Some(Role::Initiator) => {
            session.create_offer().await?;
            share_local_descriptor(session, console).await?;
            if !receive_until_accepted(session, console).await? {
                return Ok(false);
            }
        }
        Some(Role::Responder) => {
            if !receive_until_accepted(session, console).await? {
                return Ok(false);
            }
            share_local_descriptor(session, console).await?;
        }
        None => anyhow::bail!("no role chosen"),
    }

    println!("Waiting for the connection to open...");
    let connected = wait_connected(session).await;
    if connected {
        println!("Connected. Type a message and press enter, /quit to leave.");
    } else {
        println!("Session closed before connecting");
    }
    Ok(connected)
}

/// Читает вставленные дескрипторы, пока один не применится. На плохой ввод
/// просим ещё раз; конец ввода завершает попытки.
async fn receive_until_accepted(
    session: &Session,
    console: &ConsoleExchange,
) -> anyhow::Result<bool> {
    loop {
        match receive_remote_descriptor(session, console).await {
            Ok(()) => return Ok(true),
            Err(ExchangeError::Closed) => return Ok(false),
            Err(ExchangeError::Session(
                e @ (SessionError::MalformedDescriptor(_) | SessionError::AdapterRejected(_)),
            )) => {
                warn!("Remote descriptor not applied: {e}");
                println!("That descriptor could not be used ({e}), paste it again");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn wait_connected(session: &Session) -> bool {
    let mut updates = session.subscribe();
    let connected = updates
        .wait_for(|s| s.state >= SessionState::Connected)
        .await
        .map(|snapshot| snapshot.state == SessionState::Connected)
        .unwrap_or(false);
    connected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::peer::mock::{MockNetwork, MockTransport};
    use std::sync::Arc;

    async fn started(network: &Arc<MockNetwork>, role: Role) -> Session {
        let session = Session::new(
            Arc::new(MockTransport::new(network.clone())),
            SessionConfig::default(),
        );
        session.start().await.unwrap();
        session.choose_role(role).unwrap();
        session
    }

    #[tokio::test]
    async fn test_wait_connected_after_exchange() {
        let network = MockNetwork::new();
        let host = started(&network, Role::Initiator).await;
        let guest = started(&network, Role::Responder).await;

        host.create_offer().await.unwrap();
        let mut updates = host.subscribe();
        let offer = updates
            .wait_for(|s| s.state >= SessionState::LocalDescriptorReady)
            .await
            .unwrap()
            .local_descriptor
            .clone();
        guest.remote_response(&offer).await.unwrap();
        let mut updates = guest.subscribe();
        let answer = updates
            .wait_for(|s| s.state >= SessionState::LocalDescriptorReady)
            .await
            .unwrap()
            .local_descriptor
            .clone();
        host.accept_offer(&answer).await.unwrap();

        assert!(wait_connected(&host).await);
        assert!(wait_connected(&guest).await);
    }

    #[tokio::test]
    async fn test_wait_connected_on_closed_session() {
        let network = MockNetwork::new();
        let host = started(&network, Role::Initiator).await;
        host.close().await;
        assert!(!wait_connected(&host).await);
    }
}
