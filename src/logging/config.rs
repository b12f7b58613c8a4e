use std::{fs, io, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Допустимые уровни логирования.
const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Формат вывода событий.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Настройки вывода в консоль (stderr).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

/// Настройки вывода в файл с ежедневной ротацией.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub format: LogFormat,
    /// Префикс имени файла; к нему добавляется дата.
    pub filename: String,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace, debug, info, warn, error.
    pub level: String,
    /// Дополнительные директивы `EnvFilter`, например `jdump::dump::bulk=debug`.
    pub directives: Vec<String>,
    pub log_dir: PathBuf,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),
    #[error("Log directory error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoggingConfig {
    /// Перекрывает настройки переменными `JDUMP_LOG_LEVEL`, `JDUMP_LOG_DIR`
    /// и `JDUMP_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("JDUMP_LOG_LEVEL") {
            self.level = level.to_ascii_lowercase();
        }
        if let Ok(dir) = std::env::var("JDUMP_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Ok(format) = std::env::var("JDUMP_LOG_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "json" => self.console.format = LogFormat::Json,
                "pretty" => self.console.format = LogFormat::Pretty,
                "compact" => self.console.format = LogFormat::Compact,
                _ => {}
            }
        }
    }

    pub fn validate(&self) -> Result<(), LoggingError> {
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(LoggingError::InvalidLevel(self.level.clone()));
        }
        Ok(())
    }

    /// Создаёт каталог логов, если включён файловый вывод.
    pub fn ensure_log_dir(&self) -> Result<(), LoggingError> {
        if self.file.enabled {
            fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// Директива фильтра: базовый уровень и дополнительные директивы.
    pub fn build_filter_directive(&self) -> String {
        std::iter::once(self.level.as_str())
            .chain(self.directives.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(",")
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Compact,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            format: LogFormat::Json,
            filename: "jdump.log".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directives: Vec::new(),
            log_dir: PathBuf::from("logs"),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::env;

    use serial_test::serial;

    use super::*;

    #[test]
    fn test_filter_directive_joins_extra_directives() {
        let cfg = LoggingConfig {
            level: "warn".to_string(),
            directives: vec!["jdump::dump::bulk=debug".to_string()],
            ..Default::default()
        };
        assert_eq!(cfg.build_filter_directive(), "warn,jdump::dump::bulk=debug");
    }

    #[test]
    fn test_validate_rejects_unknown_level() {
        let cfg = LoggingConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(LoggingError::InvalidLevel(_))));
        assert!(LoggingConfig::default().validate().is_ok());
    }

    /// Тест проверяет перекрытие настроек переменными окружения.
    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var("JDUMP_LOG_LEVEL", "DEBUG");
        env::set_var("JDUMP_LOG_FORMAT", "json");
        env::set_var("JDUMP_LOG_DIR", "/tmp/jdump-logs");

        let mut cfg = LoggingConfig::default();
        cfg.apply_env_overrides();

        env::remove_var("JDUMP_LOG_LEVEL");
        env::remove_var("JDUMP_LOG_FORMAT");
        env::remove_var("JDUMP_LOG_DIR");

        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.console.format, LogFormat::Json);
        assert_eq!(cfg.log_dir, PathBuf::from("/tmp/jdump-logs"));
    }

    #[test]
    fn test_ensure_log_dir_only_when_file_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = LoggingConfig {
            log_dir: dir.path().join("nested/logs"),
            ..Default::default()
        };

        cfg.ensure_log_dir().unwrap();
        assert!(!cfg.log_dir.exists());

        cfg.file.enabled = true;
        cfg.ensure_log_dir().unwrap();
        assert!(cfg.log_dir.is_dir());
    }
}
