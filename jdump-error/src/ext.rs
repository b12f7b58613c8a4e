use std::{any::Any, error::Error};

use crate::StatusCode;

/// Общий интерфейс ошибок библиотеки (object-safe).
///
/// Любая ошибка, реализующая трейт, превращается в
/// [`StackError`](crate::StackError) через `?` и сохраняет свой код статуса.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Код статуса ошибки. По умолчанию [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Нужен для downcast к конкретному типу из `dyn ErrorExt`.
    fn as_any(&self) -> &dyn Any;
}
