//! Протокол кадров файла дампа.
//!
//! Каждый кадр состоит из одной закодированной записи, за которой следуют
//! разделитель `--` и перевод строки `\n`:
//!
//! ```text
//! {"a":1}--\n
//! {"a":2}--\n
//! ```
//!
//! Перевод строки всегда `\n`, независимо от платформы. При чтении допускаются
//! `\r\n`, пустые строки и строки без разделителя. Разделитель не может быть
//! окончанием корректного JSON-текста (ни одно JSON-значение не заканчивается
//! на `-`), поэтому его отсечение однозначно.

/// Разделитель записей.
pub const SEPARATOR: &[u8; 2] = b"--";

/// Признак конца строки.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Дописывает в `buf` полный кадр для уже закодированной строки.
#[inline]
pub fn encode_into(
    buf: &mut Vec<u8>,
    line: &str,
) {
    buf.reserve(line.len() + SEPARATOR.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.extend_from_slice(SEPARATOR);
    buf.push(LINE_TERMINATOR);
}

/// Возвращает длину полезной нагрузки кадра в сырой строке `line`.
///
/// Строка может содержать завершающие `\n` / `\r\n`. Полезная нагрузка всегда
/// начинается с нулевого байта строки. Возвращает `None`, если после отсечения
/// терминатора и разделителя в строке остались только пробельные символы.
pub fn payload_len(line: &[u8]) -> Option<usize> {
    let mut end = line.len();
    if end > 0 && line[end - 1] == LINE_TERMINATOR {
        end -= 1;
    }
    if end > 0 && line[end - 1] == b'\r' {
        end -= 1;
    }
    if line[..end].ends_with(SEPARATOR) {
        end -= SEPARATOR.len();
    }

    if line[..end].iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(end)
    }
}
