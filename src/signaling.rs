//! Обмен дескрипторами вне канала
//!
//! Сессии всё равно, как дескриптор попадает к другой стороне. Сейчас это
//! человек, копирующий текст между двумя терминалами; relay сервер
//! реализовал бы тот же трейт.

use async_trait::async_trait;
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, Mutex};

use crate::error::{ExchangeError, SessionError};
use crate::peer::codec::{self, fingerprint};
use crate::peer::types::{Role, SessionState};
use crate::session::Session;

/// Способ передать дескриптор другой стороне и получить её дескриптор
#[async_trait]
pub trait OutOfBand: Send + Sync {
    async fn deliver(&self, encoded: &str) -> Result<(), ExchangeError>;

    async fn receive(&self) -> Result<String, ExchangeError>;
}

/// Ждём публикации локального дескриптора, передаём его и отмечаем
/// передачу в сессии
pub async fn share_local_descriptor(
    session: &Session,
    exchange: &dyn OutOfBand,
) -> Result<(), ExchangeError> {
    let mut updates = session.subscribe();
    let descriptor = {
        let snapshot = updates
            .wait_for(|s| s.state >= SessionState::LocalDescriptorReady)
            .await
            .map_err(|_| ExchangeError::SessionEnded)?;
        if snapshot.state == SessionState::Closed {
            return Err(ExchangeError::SessionEnded);
        }
        snapshot.local_descriptor.clone()
    };

    exchange.deliver(&descriptor).await?;
    session.confirm_handoff()?;
    info!("Local descriptor handed off ({})", fingerprint(&descriptor));
    Ok(())
}

/// Берём дескриптор другой стороны и применяем его так, как требует
/// роль сессии
pub async fn receive_remote_descriptor(
    session: &Session,
    exchange: &dyn OutOfBand,
) -> Result<(), ExchangeError> {
    let remote = exchange.receive().await?;
    debug!("Remote descriptor received ({})", fingerprint(&remote));
    match session.role() {
        Some(Role::Initiator) => session.accept_offer(&remote).await?,
        Some(Role::Responder) => session.remote_response(&remote).await?,
        None => {
            return Err(ExchangeError::Session(SessionError::InvalidState {
                operation: "receive_remote_descriptor",
                state: session.state(),
            }))
        }
    }
    Ok(())
}

// ============================================================================
// Консоль
// ============================================================================

const BEGIN_MARKER: &str = "-----BEGIN DESCRIPTOR-----";
const END_MARKER: &str = "-----END DESCRIPTOR-----";

/// Copy/paste через терминал: дескрипторы печатаются в stdout,
/// удалённый читается из stdin
pub struct ConsoleExchange {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleExchange {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    /// Следующая строка пользователя, `None` в конце ввода. Строки-маркеры,
    /// оставшиеся после вставки, пропускаются.
    pub async fn next_line(&self) -> Result<Option<String>, ExchangeError> {
        let mut lines = self.lines.lock().await;
        while let Some(line) = lines.next_line().await? {
            if !is_marker(&line) {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }
}

fn is_marker(line: &str) -> bool {
    matches!(line.trim(), BEGIN_MARKER | END_MARKER)
}

/// Собирает дескриптор, вставленный одной или несколькими строками
#[derive(Debug, Default)]
struct Paste {
    text: String,
    framed: bool,
}

impl Paste {
    /// Добавляет строку; true, когда дескриптор собран
    fn push(&mut self, line: &str) -> bool {
        match line.trim() {
            BEGIN_MARKER => {
                self.framed = true;
                self.text.clear();
                false
            }
            END_MARKER => !self.text.is_empty(),
            "" => !self.framed && !self.text.is_empty(),
            line => {
                self.text.push_str(line);
                self.text.push('\n');
                !self.framed && codec::decode(&self.text).is_ok()
            }
        }
    }

    fn finish(self) -> Option<String> {
        let text = self.text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

impl Default for ConsoleExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutOfBand for ConsoleExchange {
    async fn deliver(&self, encoded: &str) -> Result<(), ExchangeError> {
        let block = format!(
            "\nCopy everything between the markers to the other peer \
             (fingerprint {}):\n{BEGIN_MARKER}\n{encoded}\n{END_MARKER}\n",
            fingerprint(encoded)
        );
        let mut stdout = tokio::io::stdout();
        stdout.write_all(block.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn receive(&self) -> Result<String, ExchangeError> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(b"\nPaste the other peer's descriptor and press enter:\n")
            .await?;
        stdout.flush().await?;

        let mut lines = self.lines.lock().await;
        let mut paste = Paste::default();
        while let Some(line) = lines.next_line().await? {
            if paste.push(&line) {
                break;
            }
        }
        let collected = paste.finish().ok_or(ExchangeError::Closed)?;
        let receipt = format!("Received descriptor, fingerprint {}\n", fingerprint(&collected));
        stdout.write_all(receipt.as_bytes()).await?;
        Ok(collected)
    }
}

// ============================================================================
// В памяти
// ============================================================================

/// Один конец обмена в памяти
pub struct MemoryExchange {
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MemoryExchange {
    /// Два связанных конца: что отправил один, получает другой
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (
            Self {
                tx: tx_b,
                rx: Mutex::new(rx_a),
            },
            Self {
                tx: tx_a,
                rx: Mutex::new(rx_b),
            },
        )
    }
}

#[async_trait]
impl OutOfBand for MemoryExchange {
    async fn deliver(&self, encoded: &str) -> Result<(), ExchangeError> {
        self.tx
            .send(encoded.to_string())
            .map_err(|_| ExchangeError::Closed)
    }

    async fn receive(&self) -> Result<String, ExchangeError> {
        self.rx.lock().await.recv().await.ok_or(ExchangeError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::{Descriptor, DescriptorKind};

    #[tokio::test]
    async fn test_memory_exchange_pair() {
        let (a, b) = MemoryExchange::pair();
        a.deliver("from a").await.unwrap();
        b.deliver("from b").await.unwrap();
        assert_eq!(b.receive().await.unwrap(), "from a");
        assert_eq!(a.receive().await.unwrap(), "from b");
    }

    fn pasted(lines: &[&str]) -> Option<String> {
        let mut paste = Paste::default();
        for line in lines {
            if paste.push(line) {
                break;
            }
        }
        paste.finish()
    }

    fn blob() -> String {
        codec::encode(&Descriptor::offer("v=0\r\ns=-\r\nt=0 0\r\n")).unwrap()
    }

    #[test]
    fn test_paste_wrapped_blob() {
        let blob = blob();
        let (head, tail) = blob.split_at(20);
        let text = pasted(&[head, tail, "left for later"]).unwrap();
        assert_eq!(codec::decode(&text).unwrap(), codec::decode(&blob).unwrap());
        assert!(!text.contains("left for later"));
    }

    #[test]
    fn test_paste_between_markers() {
        let blob = blob();
        let (head, tail) = blob.split_at(10);
        let lines = ["", END_MARKER, BEGIN_MARKER, head, "", tail, END_MARKER, "hello"];
        let text = pasted(&lines).unwrap();
        assert!(codec::decode(&text).is_ok());
        assert!(!text.contains("hello"));
    }

    #[test]
    fn test_paste_raw_json_over_lines() {
        let text = pasted(&["{", r#""type": "answer","#, r#""sdp": "v=0""#, "}", "next"]).unwrap();
        assert_eq!(codec::decode(&text).unwrap().kind, DescriptorKind::Answer);
    }

    #[test]
    fn test_paste_garbage_ends_at_blank_line() {
        assert_eq!(pasted(&["", "garbage", "", "more"]).as_deref(), Some("garbage"));
        assert_eq!(pasted(&[END_MARKER, "", "  "]), None);
    }

    #[tokio::test]
    async fn test_memory_exchange_closed() {
        let (a, b) = MemoryExchange::pair();
        drop(b);
        assert!(matches!(a.deliver("x").await, Err(ExchangeError::Closed)));
        assert!(matches!(a.receive().await, Err(ExchangeError::Closed)));
    }
}
