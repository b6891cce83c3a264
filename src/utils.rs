use crate::peer::types::{ServerConfig, ServerKind};
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Добавляет к голому адресу ICE сервера схему по его типу
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
        || config.url.starts_with("stuns:")
    {
        config.url.clone()
    } else {
        let scheme = match config.kind {
            ServerKind::Turn => "turn:",
            ServerKind::Stun => "stun:",
        };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: ServerKind, url: &str) -> ServerConfig {
        ServerConfig {
            id: String::new(),
            kind,
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn test_scheme_added_by_kind() {
        assert_eq!(
            add_ice_url_scheme(&server(ServerKind::Stun, "stun.example.org:3478")),
            "stun:stun.example.org:3478"
        );
        assert_eq!(
            add_ice_url_scheme(&server(ServerKind::Turn, "relay.example.org:3478")),
            "turn:relay.example.org:3478"
        );
    }

    #[test]
    fn test_existing_scheme_kept() {
        assert_eq!(
            add_ice_url_scheme(&server(ServerKind::Turn, "stun:stun.l.google.com:19302")),
            "stun:stun.l.google.com:19302"
        );
    }

    #[test]
    fn test_random_id_is_hex() {
        let id = random_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, random_id());
    }
}
