// Конфигурация приложения
// Debug сборка логирует всё; release только предупреждения, если не поднять уровень из CLI

use crate::peer::types::{ServerConfig, ServerKind};
use log::LevelFilter;
use std::path::Path;
use thiserror::Error;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Debug;

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Warn;

/// Имя data channel приложения. Должно совпадать у обоих пиров.
pub const DEFAULT_CHANNEL_NAME: &str = "awesome-cm";

/// Когда локальный дескриптор становится виден пользователю
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExposurePolicy {
    /// Публикуем один раз, после завершения сбора кандидатов.
    #[default]
    GatheringComplete,
    /// Публикуем заново на каждом кандидате; побеждает последняя запись.
    /// Скопированный до конца сбора дескриптор может быть неполным.
    EveryCandidate,
}

/// Настройки сессии, о которых пиры договариваются вне канала
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub channel_name: String,
    /// Передаются транспорту как есть
    pub ice_servers: Vec<ServerConfig>,
    pub exposure: ExposurePolicy,
}

impl SessionConfig {
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            ..Default::default()
        }
    }

    pub fn with_ice_servers(mut self, servers: Vec<ServerConfig>) -> Self {
        self.ice_servers = servers;
        self
    }

    pub fn with_exposure(mut self, exposure: ExposurePolicy) -> Self {
        self.exposure = exposure;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            ice_servers: default_ice_servers(),
            exposure: ExposurePolicy::default(),
        }
    }
}

pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            kind: ServerKind::Stun,
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            kind: ServerKind::Stun,
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("server {0:?}: url cannot be empty")]
    EmptyUrl(String),
    #[error("server {0:?}: TURN servers require username and credential")]
    MissingTurnCredentials(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse ICE servers: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Проверяет каждую запись так, как она понадобится транспорту
pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<(), ConfigError> {
    for server in servers {
        if server.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl(server.id.clone()));
        }
        if server.kind == ServerKind::Turn
            && (server.username.is_none() || server.credential.is_none())
        {
            return Err(ConfigError::MissingTurnCredentials(server.id.clone()));
        }
    }
    Ok(())
}

/// Разбирает JSON массив серверов и проверяет его
pub fn parse_ice_servers(json: &str) -> Result<Vec<ServerConfig>, ConfigError> {
    let servers: Vec<ServerConfig> = serde_json::from_str(json)?;
    validate_ice_servers(&servers)?;
    Ok(servers)
}

pub fn load_ice_servers(path: &Path) -> Result<Vec<ServerConfig>, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_ice_servers(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.channel_name, "awesome-cm");
        assert_eq!(config.exposure, ExposurePolicy::GatheringComplete);
        assert_eq!(config.ice_servers.len(), 2);
        assert!(validate_ice_servers(&config.ice_servers).is_ok());
    }

    #[test]
    fn test_parse_ice_servers() {
        let json = r#"[
            {"id": "lan", "type": "stun", "url": "stun.example.org:3478"},
            {"id": "relay", "type": "turn", "url": "turn:relay.example.org", "username": "u", "credential": "p"}
        ]"#;
        let servers = parse_ice_servers(json).unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].kind, ServerKind::Turn);
        assert_eq!(servers[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn test_turn_without_credentials_rejected() {
        let json = r#"[{"id": "relay", "type": "turn", "url": "relay.example.org"}]"#;
        assert!(matches!(
            parse_ice_servers(json),
            Err(ConfigError::MissingTurnCredentials(id)) if id == "relay"
        ));
    }

    #[test]
    fn test_empty_url_rejected() {
        let json = r#"[{"id": "blank", "type": "stun", "url": "  "}]"#;
        assert!(matches!(parse_ice_servers(json), Err(ConfigError::EmptyUrl(_))));
    }

    #[test]
    fn test_unknown_server_type_rejected() {
        let json = r#"[{"type": "relay", "url": "x"}]"#;
        assert!(matches!(parse_ice_servers(json), Err(ConfigError::Parse(_))));
    }
}
