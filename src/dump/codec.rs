//! Кодек записей: одна запись ↔ одна строка компактного JSON.

use jdump_error::{DumpError, DumpResult};
use serde::{
    ser::{SerializeMap, SerializeSeq},
    Deserialize, Serialize, Serializer,
};
use serde_json::{Number, Value};

use super::dedup::{Fingerprint, FingerprintWriter};

/// Запись дампа: произвольное JSON-дерево.
pub type Record = Value;

/// Порядок ключей объектов в закодированной строке.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyOrder {
    /// Ключи сортируются лексикографически.
    #[default]
    Sorted,
    /// Ключи идут в порядке вставки.
    Insertion,
}

/// Кодек записей.
///
/// Отпечаток всегда считается по представлению с сортированными ключами, так
/// что `{"a":1,"b":2}` и `{"b":2,"a":1}` дубликаты при любом [`KeyOrder`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    key_order: KeyOrder,
    max_record_bytes: Option<usize>,
}

/// Обёртка, сериализующая значение с рекурсивно отсортированными ключами.
struct Canonical<'a>(&'a Value);

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Codec {
    pub fn new(key_order: KeyOrder) -> Self {
        Self {
            key_order,
            max_record_bytes: None,
        }
    }

    /// Ограничивает длину закодированной строки в байтах.
    pub fn with_max_record_bytes(
        mut self,
        limit: Option<usize>,
    ) -> Self {
        self.max_record_bytes = limit;
        self
    }

    pub fn key_order(&self) -> KeyOrder {
        self.key_order
    }

    /// Кодирует запись в одну строку без перевода строки.
    pub fn encode(
        &self,
        record: &Record,
    ) -> DumpResult<String> {
        let line = match self.key_order {
            KeyOrder::Sorted => serde_json::to_string(&Canonical(record)),
            KeyOrder::Insertion => serde_json::to_string(record),
        }
        .map_err(|e| DumpError::encode(e.to_string()))?;

        self.check_line(&line)?;
        Ok(line)
    }

    /// Кодирует запись и сразу считает её отпечаток.
    ///
    /// При сортированных ключах строка уже канонична и хешируется напрямую.
    pub fn encode_with_fingerprint(
        &self,
        record: &Record,
    ) -> DumpResult<(String, Fingerprint)> {
        let line = self.encode(record)?;
        let fp = match self.key_order {
            KeyOrder::Sorted => Fingerprint::of_bytes(line.as_bytes()),
            KeyOrder::Insertion => self.fingerprint(record)?,
        };
        Ok((line, fp))
    }

    /// Декодирует строку полезной нагрузки кадра.
    pub fn decode(
        &self,
        line: &str,
    ) -> DumpResult<Record> {
        Ok(self.try_decode(line)?)
    }

    /// То же, что [`Codec::decode`], но без упаковки в `StackError`, чтобы
    /// вызывающий мог дополнить ошибку номером строки и путём.
    pub(crate) fn try_decode(
        &self,
        line: &str,
    ) -> Result<Record, DumpError> {
        serde_json::from_str(line).map_err(|e| DumpError::decode(e.to_string()))
    }

    /// Отпечаток записи по её канонической форме.
    pub fn fingerprint(
        &self,
        record: &Record,
    ) -> DumpResult<Fingerprint> {
        let mut hasher = FingerprintWriter::new();
        serde_json::to_writer(&mut hasher, &Canonical(record))
            .map_err(|e| DumpError::encode(e.to_string()))?;
        Ok(hasher.finish())
    }

    /// Строит числовую запись, отвергая `NaN` и бесконечности.
    pub fn number(value: f64) -> DumpResult<Record> {
        Number::from_f64(value)
            .map(Value::Number)
            .ok_or_else(|| DumpError::encode(format!("non-finite number {value}")).into())
    }

    fn check_line(
        &self,
        line: &str,
    ) -> DumpResult<()> {
        if line.contains('\n') {
            return Err(DumpError::encode("encoded record contains a raw newline").into());
        }
        if let Some(limit) = self.max_record_bytes {
            if line.len() > limit {
                return Err(DumpError::encode(format!(
                    "encoded record is {} bytes, limit is {limit}",
                    line.len()
                ))
                .into());
            }
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Serialize for Canonical<'_> {
    fn serialize<S>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

                let mut out = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    out.serialize_entry(k, &Canonical(v))?;
                }
                out.end()
            }
            Value::Array(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(&Canonical(item))?;
                }
                out.end()
            }
            scalar => scalar.serialize(serializer),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
