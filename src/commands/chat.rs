use log::{debug, warn};

use crate::peer::types::SessionState;
use crate::session::Session;
use crate::signaling::ConsoleExchange;

const QUIT: &str = "/quit";

/// Отправляет каждую введённую строку и печатает полученные сообщения до `/quit`,
/// конца ввода, Ctrl-C или закрытия сессии
pub(super) async fn run(session: &Session, console: &ConsoleExchange) -> anyhow::Result<()> {
    let mut updates = session.subscribe();
    let mut seen = updates.borrow_and_update().received;

    loop {
        tokio::select! {
            line = console.next_line() => {
                let Some(line) = line? else {
                    debug!("Input closed");
                    break;
                };
                let text = line.trim_end();
                if text.trim() == QUIT {
                    break;
                }
                if text.trim().is_empty() {
                    continue;
                }
                if let Err(e) = session.send_data(text).await {
                    warn!("Message not sent: {e}");
                    println!("! not sent: {e}");
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.state == SessionState::Closed {
                    println!("Session closed");
                    break;
                }
                if snapshot.received != seen {
                    seen = snapshot.received;
                    println!("peer> {}", snapshot.last_message);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }
    Ok(())
}
