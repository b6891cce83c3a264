use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Консольный логгер с локальным временем.
///
/// Пишет в stderr; stdout занят дескрипторами и чатом.
struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // внутренности webrtc слишком болтливы на debug
        if !record.target().starts_with("copypeer")
            && record.level() > log::Level::Info
        {
            return;
        }
        let now = chrono::Local::now();
        eprintln!(
            "[{}] {:<5} {}",
            now.format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Устанавливает консольный логгер. `LevelFilter::Off` глушит всё.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
