//! Оболочка командной строки вокруг одной сессии

mod chat;
mod handshake;

use clap::{Parser, ValueEnum};
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{
    default_ice_servers, load_ice_servers, validate_ice_servers, ConfigError, ExposurePolicy,
    SessionConfig, DEFAULT_CHANNEL_NAME, DEFAULT_LOG_LEVEL,
};
use crate::peer::connection::WebRtcTransport;
use crate::peer::types::{Role, ServerConfig, ServerKind};
use crate::session::Session;
use crate::signaling::ConsoleExchange;

#[derive(Debug, Parser)]
#[command(
    name = "copypeer",
    version,
    about = "Open a peer-to-peer data channel by copy/pasting connection descriptors"
)]
pub struct Cli {
    /// Side of the exchange; asked interactively when omitted
    #[arg(value_enum)]
    pub role: Option<RoleArg>,

    /// Data channel label, must match on both peers
    #[arg(long, default_value = DEFAULT_CHANNEL_NAME)]
    pub channel: String,

    /// STUN/TURN server URL, repeatable
    #[arg(long = "ice-server", value_name = "URL")]
    pub ice_server: Vec<String>,

    /// JSON file with server entries, including TURN credentials
    #[arg(long = "ice-servers", value_name = "FILE", conflicts_with = "ice_server")]
    pub ice_servers: Option<PathBuf>,

    /// Publish the descriptor on every candidate instead of waiting for gathering to finish
    #[arg(long)]
    pub trickle: bool,

    /// Gather loopback candidates too, for two peers on the same machine
    #[arg(long)]
    pub loopback: bool,

    #[arg(short, long)]
    pub verbose: bool,

    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    /// Create the offer
    #[value(alias = "local")]
    Host,
    /// Answer an offer
    #[value(alias = "remote")]
    Guest,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Host => Role::Initiator,
            RoleArg::Guest => Role::Responder,
        }
    }
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Off
        } else if self.verbose {
            LevelFilter::Debug
        } else {
            DEFAULT_LOG_LEVEL
        }
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let ice_servers = match &self.ice_servers {
            Some(path) => load_ice_servers(path)?,
            None if self.ice_server.is_empty() => default_ice_servers(),
            None => {
                let servers = self
                    .ice_server
                    .iter()
                    .enumerate()
                    .map(|(n, url)| server_from_url(n, url))
                    .collect::<Vec<_>>();
                validate_ice_servers(&servers)?;
                servers
            }
        };
        let exposure = if self.trickle {
            ExposurePolicy::EveryCandidate
        } else {
            ExposurePolicy::GatheringComplete
        };
        Ok(SessionConfig::new(&self.channel)
            .with_ice_servers(ice_servers)
            .with_exposure(exposure))
    }
}

/// В голом URL нет учётных данных, поэтому TURN так не пройдёт проверку
fn server_from_url(n: usize, url: &str) -> ServerConfig {
    let kind = if url.starts_with("turn") {
        ServerKind::Turn
    } else {
        ServerKind::Stun
    };
    ServerConfig {
        id: format!("cli-{n}"),
        kind,
        url: url.to_string(),
        username: None,
        credential: None,
    }
}

/// Весь сценарий: старт, выбор роли, обмен дескрипторами, чат
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.session_config()?;
    info!(
        "Channel '{}', {} ICE server(s), exposure {:?}",
        config.channel_name,
        config.ice_servers.len(),
        config.exposure
    );

    let transport = if cli.loopback {
        WebRtcTransport::new().with_loopback_candidates()
    } else {
        WebRtcTransport::new()
    };
    let session = Session::new(Arc::new(transport), config);
    let console = ConsoleExchange::new();

    session.start().await?;
    let role = match cli.role {
        Some(role) => role.into(),
        None => match handshake::prompt_role(&console).await? {
            Some(role) => role,
            None => {
                session.close().await;
                return Ok(());
            }
        },
    };
    session.choose_role(role)?;

    let connected = tokio::select! {
        result = handshake::run(&session, &console) => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted");
            Ok(false)
        }
    };

    let outcome = match connected {
        Ok(true) => chat::run(&session, &console).await,
        Ok(false) => Ok(()),
        Err(e) => Err(e),
    };
    session.close().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["copypeer"]);
        assert_eq!(cli.role, None);
        let config = cli.session_config().unwrap();
        assert_eq!(config.channel_name, DEFAULT_CHANNEL_NAME);
        assert_eq!(config.ice_servers, default_ice_servers());
        assert_eq!(config.exposure, ExposurePolicy::GatheringComplete);
    }

    #[test]
    fn test_cli_role_aliases() {
        let cli = Cli::parse_from(["copypeer", "local"]);
        assert_eq!(cli.role, Some(RoleArg::Host));
        let cli = Cli::parse_from(["copypeer", "guest", "--trickle", "--channel", "chat"]);
        assert_eq!(cli.role.map(Role::from), Some(Role::Responder));
        let config = cli.session_config().unwrap();
        assert_eq!(config.channel_name, "chat");
        assert_eq!(config.exposure, ExposurePolicy::EveryCandidate);
    }

    #[test]
    fn test_cli_ice_server_urls() {
        let cli = Cli::parse_from([
            "copypeer",
            "--ice-server",
            "stun:stun.example.org:3478",
            "--ice-server",
            "stun.other.org",
        ]);
        let config = cli.session_config().unwrap();
        assert_eq!(config.ice_servers.len(), 2);
        assert!(config.ice_servers.iter().all(|s| s.kind == ServerKind::Stun));

        let cli = Cli::parse_from(["copypeer", "--ice-server", "turn:relay.example.org"]);
        assert!(matches!(
            cli.session_config(),
            Err(ConfigError::MissingTurnCredentials(_))
        ));
    }

    #[test]
    fn test_cli_log_level() {
        assert_eq!(Cli::parse_from(["copypeer", "-q"]).log_level(), LevelFilter::Off);
        assert_eq!(Cli::parse_from(["copypeer", "-v"]).log_level(), LevelFilter::Debug);
        assert!(Cli::try_parse_from(["copypeer", "-v", "-q"]).is_err());
    }
}
