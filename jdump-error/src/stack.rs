use std::{fmt, panic::Location, sync::Arc};

use crate::{ErrorExt, LogLevel, StatusCode};

/// Ошибка с цепочкой контекстов, накопленных по пути вверх по стеку.
///
/// Корневая ошибка хранится за `Arc`, поэтому клонирование дёшево, а код
/// статуса всегда берётся у корня.
#[derive(Clone)]
pub struct StackError {
    root: Arc<dyn ErrorExt>,
    contexts: Vec<ErrorContext>,
}

/// Одно звено цепочки: сообщение и место, где оно добавлено.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
    pub location: &'static Location<'static>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StackError {
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            root: Arc::new(err),
            contexts: Vec::new(),
        }
    }

    /// Добавляет звено контекста. Место вызова запоминается.
    #[track_caller]
    pub fn context(
        mut self,
        msg: impl Into<String>,
    ) -> Self {
        self.contexts.push(ErrorContext {
            message: msg.into(),
            location: Location::caller(),
        });
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.root.status_code()
    }

    /// Уровень журнала, на котором стоит сообщать об этой ошибке.
    pub fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }

    /// Контексты в порядке добавления: от ближайшего к корню до внешнего.
    pub fn contexts(&self) -> &[ErrorContext] {
        &self.contexts
    }

    /// Корневая ошибка как конкретный тип, если он совпадает.
    pub fn downcast_ref<T: ErrorExt>(&self) -> Option<&T> {
        self.root.as_any().downcast_ref::<T>()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} ({})", self.root, self.status_code())?;
        for ctx in self.contexts.iter().rev() {
            write!(
                f,
                "\n  while {} at {}:{}",
                ctx.message,
                ctx.location.file(),
                ctx.location.line()
            )?;
        }
        Ok(())
    }
}

/// Внешний контекст идёт первым, корневая ошибка последней:
/// `loading a.txt: reading a.txt: Decode error: ...`.
impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for ctx in self.contexts.iter().rev() {
            write!(f, "{}: ", ctx.message)?;
        }
        write!(f, "{}", self.root)
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.root.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}

impl From<StackError> for std::io::Error {
    fn from(e: StackError) -> Self {
        std::io::Error::other(e.to_string())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::DumpError;

    #[test]
    fn test_context_chain_order() {
        let stack = StackError::new(DumpError::SourceMissing {
            path: PathBuf::from("/tmp/missing.txt"),
        })
        .context("opening source")
        .context("loading records");

        assert_eq!(stack.contexts().len(), 2);
        assert_eq!(stack.contexts()[0].message, "opening source");
        assert!(stack.contexts()[0].location.file().ends_with("stack.rs"));
        assert_eq!(
            stack.to_string(),
            "loading records: opening source: Source does not exist: /tmp/missing.txt"
        );
    }

    #[test]
    fn test_downcast() {
        let stack = StackError::new(DumpError::DestinationExists {
            path: PathBuf::from("/tmp/out.txt"),
        });

        assert!(matches!(
            stack.downcast_ref::<DumpError>(),
            Some(DumpError::DestinationExists { .. })
        ));
        assert!(stack.downcast_ref::<crate::GenericError>().is_none());
    }

    /// Тест проверяет, что уровень журнала и код берутся у корня, а не у
    /// контекстов.
    #[test]
    fn test_level_follows_root() {
        let stack = StackError::new(DumpError::Commit {
            path: PathBuf::from("/tmp/out.txt"),
            reason: "cross-device link".to_string(),
        })
        .context("closing dump");

        assert_eq!(stack.status_code(), StatusCode::CommitFailed);
        assert_eq!(stack.log_level(), LogLevel::Error);
        assert!(format!("{stack:?}").contains("while closing dump at"));
    }
}
