pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

use clap::Parser;

pub use config::{ExposurePolicy, SessionConfig};
pub use error::{ExchangeError, SessionError, TransportError};
pub use session::{Session, SessionSnapshot};

/// Разбирает командную строку и ведёт одну сессию до конца
pub fn run() -> anyhow::Result<()> {
    let cli = commands::Cli::parse();
    // уже установленный логгер остаётся на месте
    let _ = logger::init(cli.log_level());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(commands::execute(cli))
}
