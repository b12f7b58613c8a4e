use std::{any::Any, path::Path};

use config::{Config, ConfigError, Environment, File};
use jdump_error::{ErrorExt, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dump::{Codec, CompressionLevels, KeyOrder};

/// Префикс переменных окружения: `JDUMP_GZIP_LEVEL=9` и т.п.
pub const ENV_PREFIX: &str = "JDUMP";

/// Размер буфера ввода-вывода по умолчанию.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Общие настройки чтения и записи дампов.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpSettings {
    /// Отбрасывать повторяющиеся записи.
    pub unique: bool,
    /// Порядок ключей в закодированных записях.
    pub key_order: KeyOrder,
    /// Уровень gzip, 0..=9.
    pub gzip_level: u32,
    /// Уровень zstd, 1..=22.
    pub zstd_level: i32,
    /// Ёмкость буферов чтения и записи.
    pub buffer_size: usize,
    /// Предел длины одной закодированной записи.
    pub max_record_bytes: Option<usize>,
    /// Печатать прогресс массовых операций.
    pub verbose: bool,
}

/// Ошибки загрузки настроек.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl DumpSettings {
    /// Загружает настройки: значения по умолчанию, затем переменные окружения
    /// с префиксом `JDUMP_`.
    pub fn load() -> Result<Self, SettingsError> {
        Self::build(None)
    }

    /// То же, что [`DumpSettings::load`], но с файлом между умолчаниями и
    /// окружением. Формат определяется по расширению (TOML, JSON и т.д.).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        Self::build(Some(path.as_ref()))
    }

    fn build(file: Option<&Path>) -> Result<Self, SettingsError> {
        let defaults = Self::default();

        let mut builder = Config::builder()
            .set_default("unique", defaults.unique)?
            .set_default("key_order", "sorted")?
            .set_default("gzip_level", i64::from(defaults.gzip_level))?
            .set_default("zstd_level", i64::from(defaults.zstd_level))?
            .set_default("buffer_size", defaults.buffer_size as i64)?
            .set_default("verbose", defaults.verbose)?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }

        let settings: Self = builder
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Проверяет диапазоны значений.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.gzip_level > 9 {
            return Err(SettingsError::Invalid {
                field: "gzip_level",
                reason: format!("{} is out of range 0..=9", self.gzip_level),
            });
        }
        if !(1..=22).contains(&self.zstd_level) {
            return Err(SettingsError::Invalid {
                field: "zstd_level",
                reason: format!("{} is out of range 1..=22", self.zstd_level),
            });
        }
        if self.buffer_size == 0 {
            return Err(SettingsError::Invalid {
                field: "buffer_size",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_record_bytes == Some(0) {
            return Err(SettingsError::Invalid {
                field: "max_record_bytes",
                reason: "must be positive when set".to_string(),
            });
        }
        Ok(())
    }

    /// Кодек, настроенный по этим параметрам.
    pub fn codec(&self) -> Codec {
        Codec::new(self.key_order).with_max_record_bytes(self.max_record_bytes)
    }

    pub fn levels(&self) -> CompressionLevels {
        CompressionLevels {
            gzip: self.gzip_level,
            zstd: self.zstd_level,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for DumpSettings {
    fn default() -> Self {
        let levels = CompressionLevels::default();
        Self {
            unique: true,
            key_order: KeyOrder::Sorted,
            gzip_level: levels.gzip,
            zstd_level: levels.zstd,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_record_bytes: None,
            verbose: true,
        }
    }
}

impl ErrorExt for SettingsError {
    fn status_code(&self) -> StatusCode {
        StatusCode::InvalidArgs
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
