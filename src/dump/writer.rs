use std::{borrow::Borrow, io::Write};

use jdump_error::DumpResult;

use super::{
    codec::{Codec, Record},
    dedup::{DedupSet, Fingerprint},
    frame,
};

/// Пишет записи кадрами в произвольный приёмник байтов.
///
/// Запись учитывается в счётчике и в множестве отпечатков только после того,
/// как её кадр целиком передан приёмнику. Ошибка кодирования оставляет
/// множество без изменений.
pub struct RecordWriter<W: Write> {
    sink: W,
    codec: Codec,
    dedup: DedupSet,
    frame: Vec<u8>,
    count: u64,
    duplicates: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<W: Write> RecordWriter<W> {
    pub fn new(
        sink: W,
        codec: Codec,
        unique: bool,
    ) -> Self {
        Self::with_dedup(sink, codec, DedupSet::new(unique))
    }

    /// Создаёт писателя с заранее заполненным множеством отпечатков,
    /// например собранным читателем существующего файла.
    pub fn with_dedup(
        sink: W,
        codec: Codec,
        dedup: DedupSet,
    ) -> Self {
        Self {
            sink,
            codec,
            dedup,
            frame: Vec::with_capacity(256),
            count: 0,
            duplicates: 0,
        }
    }

    /// Пишет запись. Возвращает `false`, если она отброшена как дубликат.
    pub fn write(
        &mut self,
        record: &Record,
    ) -> DumpResult<bool> {
        if self.dedup.is_enabled() {
            let (line, fp) = self.codec.encode_with_fingerprint(record)?;
            self.write_encoded(&line, Some(fp))
        } else {
            let line = self.codec.encode(record)?;
            self.write_encoded(&line, None)
        }
    }

    /// Пишет все записи последовательности и возвращает число записанных.
    ///
    /// При ошибке уже записанные записи остаются учтёнными в [`count`].
    ///
    /// [`count`]: RecordWriter::count
    pub fn write_many<I>(
        &mut self,
        records: I,
    ) -> DumpResult<u64>
    where
        I: IntoIterator,
        I::Item: Borrow<Record>,
    {
        let mut written = 0;
        for record in records {
            if self.write(record.borrow())? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Пишет уже закодированную строку.
    ///
    /// Позволяет закодировать запись один раз и разослать её нескольким
    /// писателям с общим кодеком.
    pub(crate) fn write_encoded(
        &mut self,
        line: &str,
        fp: Option<Fingerprint>,
    ) -> DumpResult<bool> {
        if let Some(fp) = &fp {
            if self.dedup.contains(fp) {
                self.duplicates += 1;
                return Ok(false);
            }
        }

        self.frame.clear();
        frame::encode_into(&mut self.frame, line);
        self.sink.write_all(&self.frame)?;

        if let Some(fp) = fp {
            self.dedup.insert(fp);
        }
        self.count += 1;
        Ok(true)
    }

    /// Сбрасывает буферы в приёмник, не закрывая его.
    pub fn flush(&mut self) -> DumpResult<()> {
        self.sink.flush()?;
        Ok(())
    }

    /// Число записанных записей.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Число отброшенных дубликатов.
    pub fn duplicates_dropped(&self) -> u64 {
        self.duplicates
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn dedup(&self) -> &DedupSet {
        &self.dedup
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    /// Возвращает приёмник без сброса буферов.
    pub fn into_inner(self) -> W {
        self.sink
    }

    /// Разбирает писателя на приёмник и множество отпечатков.
    pub fn into_parts(self) -> (W, DedupSet) {
        (self.sink, self.dedup)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
