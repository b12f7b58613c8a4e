pub mod config;
mod filters;
mod formatter;
pub mod handle;
pub mod sinks;

pub use config::{ConsoleConfig, FileConfig, LogFormat, LoggingConfig, LoggingError};
pub use handle::LoggingHandle;

use std::path::Path;

use jdump_error::{LogLevel, StackError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Устанавливает глобальный subscriber по конфигурации.
///
/// Возвращает [`LoggingHandle`], который нужно держать до конца работы
/// программы, иначе часть файловых логов может потеряться.
pub fn init_logging(mut config: LoggingConfig) -> Result<LoggingHandle, LoggingError> {
    config.apply_env_overrides();
    config.validate()?;
    config.ensure_log_dir()?;

    let env_filter = filters::build_filter_from_config(&config);
    let mut layers = Vec::new();

    if config.console.enabled {
        layers.push(sinks::console::layer_with_config(&config));
    }

    let file_guard = if config.file.enabled {
        let (file_layer, guard) = sinks::file::layer_with_config(&config);
        layers.push(file_layer);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(layers.with_filter(env_filter))
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        log_dir = %config.log_dir.display(),
        console_enabled = config.console.enabled,
        file_enabled = config.file.enabled,
        "Logging system initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}

/// Пишет ошибку в журнал на уровне, который задаёт её код статуса.
///
/// Ошибки вызывающей стороны уходят в `debug`/`info`, сбои фиксации в
/// `error`.
pub(crate) fn log_error(
    err: &StackError,
    path: &Path,
    message: &str,
) {
    let code = err.status_code().code();
    let path = path.display();
    match err.log_level() {
        LogLevel::Trace => tracing::trace!(%path, code, error = %err, "{message}"),
        LogLevel::Debug => tracing::debug!(%path, code, error = %err, "{message}"),
        LogLevel::Info => tracing::info!(%path, code, error = %err, "{message}"),
        LogLevel::Warn => tracing::warn!(%path, code, error = %err, "{message}"),
        LogLevel::Error => tracing::error!(%path, code, error = %err, "{message}"),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
