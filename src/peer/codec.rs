use base64::{engine::general_purpose, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use sha2::{Digest, Sha256};
use std::io::{self, Read};

use crate::error::SessionError;
use crate::peer::types::Descriptor;

/// Предел размера распакованного дескриптора
const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024;

/// Descriptor → JSON → gzip → base64, одна строка для copy/paste
pub fn encode(descriptor: &Descriptor) -> io::Result<String> {
    let mut gz = GzEncoder::new(Vec::new(), Compression::best());
    serde_json::to_writer(&mut gz, descriptor)?;
    let compressed = gz.finish()?;
    Ok(general_purpose::STANDARD.encode(compressed))
}

/// Обратное к [`encode`].
///
/// Пробельные символы игнорируются: текстовые поля и чаты
/// любят переносить длинные строки. Текст, начинающийся с `{`, читается как
/// обычный JSON из браузера (`JSON.stringify(desc)`).
pub fn decode(text: &str) -> Result<Descriptor, SessionError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(malformed("empty input"));
    }

    let descriptor: Descriptor = if trimmed.starts_with('{') {
        serde_json::from_str(trimmed).map_err(malformed)?
    } else {
        let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        let compressed = general_purpose::STANDARD
            .decode(compact)
            .map_err(malformed)?;

        let mut json = Vec::new();
        GzDecoder::new(&compressed[..])
            .take(MAX_DECOMPRESSED_SIZE + 1)
            .read_to_end(&mut json)
            .map_err(malformed)?;
        if json.len() as u64 > MAX_DECOMPRESSED_SIZE {
            return Err(malformed("descriptor exceeds 256 KiB"));
        }

        serde_json::from_slice(&json).map_err(malformed)?
    };

    if descriptor.payload.trim().is_empty() {
        return Err(malformed("empty session description"));
    }
    Ok(descriptor)
}

/// Короткий отпечаток, который пользователи сверяют голосом после вставки
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    for chunk in text.split_whitespace() {
        hasher.update(chunk.as_bytes());
    }
    hex::encode(&hasher.finalize()[..6])
}

fn malformed(err: impl ToString) -> SessionError {
    SessionError::MalformedDescriptor(err.to_string())
}
