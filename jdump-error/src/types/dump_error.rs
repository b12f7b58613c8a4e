use std::{any::Any, path::PathBuf};

use crate::{ErrorExt, StatusCode};

/// Основная ошибка файла дампа с контекстом для диагностики.
#[derive(Debug, Clone)]
pub enum DumpError {
    /// Операция не допускается в текущем режиме открытия
    InvalidModeUsage { operation: String, mode: String },

    /// Назначение уже существует (режим эксклюзивного создания)
    DestinationExists { path: PathBuf },

    /// Источник не существует (режимы чтения и дозаписи)
    SourceMissing { path: PathBuf },

    /// Содержимое кадра не удалось декодировать
    Decode {
        reason: String,
        line: Option<u64>,
        path: Option<PathBuf>,
    },

    /// Запись не может быть представлена в формате дампа
    Encode { reason: String },

    /// Ошибка сжатия/распаковки
    Compression {
        operation: CompressionOp,
        reason: String,
        path: Option<PathBuf>,
    },

    /// Не удалось атомарно заменить назначение временным файлом
    Commit { path: PathBuf, reason: String },

    /// Некорректный glob-шаблон источника
    InvalidPattern { pattern: String, reason: String },
}

/// Тип операции сжатия для контекста ошибки.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionOp {
    Compress,
    Decompress,
}

impl DumpError {
    /// Создаёт ошибку неверного использования режима.
    pub fn invalid_mode(
        operation: impl Into<String>,
        mode: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidModeUsage {
            operation: operation.into(),
            mode: mode.to_string(),
        }
    }

    /// Создаёт ошибку декодирования без позиции.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
            line: None,
            path: None,
        }
    }

    /// Создаёт ошибку кодирования.
    pub fn encode(reason: impl Into<String>) -> Self {
        Self::Encode {
            reason: reason.into(),
        }
    }

    /// Добавляет номер строки к ошибке декодирования.
    pub fn with_line(
        mut self,
        line_no: u64,
    ) -> Self {
        if let Self::Decode { line, .. } = &mut self {
            *line = Some(line_no);
        }
        self
    }

    /// Добавляет путь к ошибке (если вариант его ещё не содержит).
    pub fn with_path(
        mut self,
        new_path: impl Into<PathBuf>,
    ) -> Self {
        match &mut self {
            Self::Decode { path, .. } | Self::Compression { path, .. } => {
                *path = Some(new_path.into());
            }
            _ => {}
        }
        self
    }
}

impl std::fmt::Display for DumpError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::InvalidModeUsage { operation, mode } => {
                write!(f, "Invalid usage: cannot {operation} in '{mode}' mode")
            }
            Self::DestinationExists { path } => {
                write!(f, "Destination already exists: {}", path.display())
            }
            Self::SourceMissing { path } => {
                write!(f, "Source does not exist: {}", path.display())
            }
            Self::Decode { reason, line, path } => {
                write!(f, "Decode error: {reason}")?;
                write_context(f, *line, path.as_ref())
            }
            Self::Encode { reason } => write!(f, "Encode error: {reason}"),
            Self::Compression {
                operation,
                reason,
                path,
            } => {
                write!(f, "{operation} error: {reason}")?;
                write_context(f, None, path.as_ref())
            }
            Self::Commit { path, reason } => {
                write!(f, "Failed to commit {}: {reason}", path.display())
            }
            Self::InvalidPattern { pattern, reason } => {
                write!(f, "Invalid source pattern '{pattern}': {reason}")
            }
        }
    }
}

/// Вспомогательная функция для форматирования контекста (line, path).
fn write_context(
    f: &mut std::fmt::Formatter<'_>,
    line: Option<u64>,
    path: Option<&PathBuf>,
) -> std::fmt::Result {
    let mut parts = Vec::new();
    if let Some(l) = line {
        parts.push(format!("line: {l}"));
    }
    if let Some(p) = path {
        parts.push(format!("path: {}", p.display()));
    }
    if !parts.is_empty() {
        write!(f, " [{}]", parts.join(", "))?;
    }
    Ok(())
}

impl std::error::Error for DumpError {}

impl ErrorExt for DumpError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidModeUsage { .. } => StatusCode::InvalidUsage,
            Self::DestinationExists { .. } => StatusCode::AlreadyExists,
            Self::SourceMissing { .. } => StatusCode::NotFound,
            Self::Decode { .. } => StatusCode::DecodingError,
            Self::Encode { .. } => StatusCode::EncodingError,
            Self::Compression { .. } => StatusCode::CompressionFailed,
            Self::Commit { .. } => StatusCode::CommitFailed,
            Self::InvalidPattern { .. } => StatusCode::InvalidPattern,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// Конверсия в std::io::Error для кода, работающего через io::Result
impl From<DumpError> for std::io::Error {
    fn from(e: DumpError) -> Self {
        let kind = match &e {
            DumpError::SourceMissing { .. } => std::io::ErrorKind::NotFound,
            DumpError::DestinationExists { .. } => std::io::ErrorKind::AlreadyExists,
            DumpError::Decode { .. } | DumpError::Compression { .. } => {
                std::io::ErrorKind::InvalidData
            }
            DumpError::Encode { .. }
            | DumpError::InvalidModeUsage { .. }
            | DumpError::InvalidPattern { .. } => std::io::ErrorKind::InvalidInput,
            DumpError::Commit { .. } => std::io::ErrorKind::Other,
        };

        std::io::Error::new(kind, e.to_string())
    }
}

impl std::fmt::Display for CompressionOp {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::Compress => write!(f, "Compression"),
            Self::Decompress => write!(f, "Decompression"),
        }
    }
}
