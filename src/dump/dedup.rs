use std::{fmt, io};

use rustc_hash::FxHashSet;
use xxhash_rust::xxh64::Xxh64;

/// Отпечаток записи: xxHash64 канонического (с сортированными ключами)
/// представления.
///
/// Равенство отпечатков приближает структурное равенство записей. Коллизии
/// теоретически возможны и отдельно не обрабатываются.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

/// Множество увиденных отпечатков одного дескриптора.
///
/// При `unique = false` множество отключено: `insert` всегда возвращает
/// `true`, и ничего не хранится.
#[derive(Debug, Default, Clone)]
pub struct DedupSet {
    seen: Option<FxHashSet<Fingerprint>>,
}

/// Потоковый хешер, в который сериализатор пишет каноническое представление
/// без промежуточного буфера.
pub(crate) struct FingerprintWriter(Xxh64);

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Fingerprint {
    /// Вычисляет отпечаток по готовым байтам канонического представления.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(xxhash_rust::xxh64::xxh64(bytes, 0))
    }

    /// Сырое значение хеша.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl DedupSet {
    /// Создаёт множество; при `unique = false` дедупликация выключена.
    pub fn new(unique: bool) -> Self {
        Self {
            seen: unique.then(FxHashSet::default),
        }
    }

    /// Выключенное множество.
    pub fn disabled() -> Self {
        Self { seen: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.seen.is_some()
    }

    /// Регистрирует отпечаток. Возвращает `true`, если он встречен впервые
    /// (или дедупликация выключена).
    pub fn insert(
        &mut self,
        fp: Fingerprint,
    ) -> bool {
        match &mut self.seen {
            Some(seen) => seen.insert(fp),
            None => true,
        }
    }

    /// Проверяет, был ли отпечаток уже зарегистрирован.
    pub fn contains(
        &self,
        fp: &Fingerprint,
    ) -> bool {
        self.seen.as_ref().is_some_and(|seen| seen.contains(fp))
    }

    /// Количество запомненных отпечатков.
    pub fn len(&self) -> usize {
        self.seen.as_ref().map_or(0, FxHashSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Забывает все отпечатки, сохраняя режим.
    pub fn clear(&mut self) {
        if let Some(seen) = &mut self.seen {
            seen.clear();
        }
    }
}

impl FingerprintWriter {
    pub(crate) fn new() -> Self {
        Self(Xxh64::new(0))
    }

    pub(crate) fn finish(self) -> Fingerprint {
        Fingerprint(self.0.digest())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for Fingerprint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl io::Write for FingerprintWriter {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
