use std::{
    io::{self, BufRead},
    path::PathBuf,
};

use jdump_error::{DumpError, DumpResult, StackError};

use super::{
    codec::{Codec, Record},
    dedup::DedupSet,
    frame,
};

/// Счётчики одного читателя.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Прочитано сырых строк, включая пустые.
    pub lines_read: u64,
    /// Прочитано байт после распаковки.
    pub bytes_read: u64,
    /// Отдано записей вызывающему.
    pub records_yielded: u64,
    /// Отброшено дубликатов.
    pub duplicates_dropped: u64,
    /// Пропущено кадров через `skip`.
    pub frames_skipped: u64,
}

/// Ленивый однопроходный читатель записей из байтового потока.
///
/// После фатальной ошибки или конца потока читатель переходит в конечное
/// состояние и больше ничего не отдаёт. Записи, отданные до ошибки, остаются
/// действительными.
pub struct RecordReader<R> {
    source: R,
    codec: Codec,
    dedup: DedupSet,
    line: Vec<u8>,
    stats: ReadStats,
    origin: Option<PathBuf>,
    finished: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<R: BufRead> RecordReader<R> {
    /// Создаёт читателя с собственным множеством отпечатков.
    pub fn new(
        source: R,
        codec: Codec,
        unique: bool,
    ) -> Self {
        Self::with_dedup(source, codec, DedupSet::new(unique))
    }

    /// Создаёт читателя с уже заполненным множеством отпечатков.
    ///
    /// Так несколько источников подряд делят одно множество.
    pub fn with_dedup(
        source: R,
        codec: Codec,
        dedup: DedupSet,
    ) -> Self {
        Self {
            source,
            codec,
            dedup,
            line: Vec::with_capacity(256),
            stats: ReadStats::default(),
            origin: None,
            finished: false,
        }
    }

    /// Путь источника для сообщений об ошибках.
    pub fn with_origin(
        mut self,
        path: impl Into<PathBuf>,
    ) -> Self {
        self.origin = Some(path.into());
        self
    }

    /// Читает следующую уникальную запись. `Ok(None)` означает конец потока.
    pub fn read(&mut self) -> DumpResult<Option<Record>> {
        if self.finished {
            return Ok(None);
        }
        let result = self.read_next();
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result
    }

    /// Читает до `n` записей; в конце потока их может быть меньше.
    pub fn read_n(
        &mut self,
        n: usize,
    ) -> DumpResult<Vec<Record>> {
        let mut out = Vec::with_capacity(n.min(1024));
        while out.len() < n {
            match self.read()? {
                Some(record) => out.push(record),
                None => break,
            }
        }
        Ok(out)
    }

    /// Пропускает до `n` кадров без декодирования и без учёта в дедупликации.
    ///
    /// Возвращает число фактически пропущенных кадров.
    pub fn skip_frames(
        &mut self,
        n: u64,
    ) -> DumpResult<u64> {
        let mut skipped = 0;
        while skipped < n && !self.finished {
            match self.next_frame() {
                Ok(Some(_)) => skipped += 1,
                Ok(None) => self.finished = true,
                Err(e) => {
                    self.finished = true;
                    self.stats.frames_skipped += skipped;
                    return Err(e);
                }
            }
        }
        self.stats.frames_skipped += skipped;
        Ok(skipped)
    }

    /// Считает оставшиеся кадры до конца потока без разбора JSON.
    ///
    /// Каждый кадр проверяется на корректность UTF-8: такая строка не
    /// прочиталась бы и при декодировании. Посчитанные кадры учитываются
    /// как пропущенные.
    pub fn count_frames(&mut self) -> DumpResult<u64> {
        let mut counted = 0;
        let result = loop {
            if self.finished {
                break Ok(counted);
            }
            match self.next_frame() {
                Ok(Some(len)) => {
                    if let Err(e) = std::str::from_utf8(&self.line[..len]) {
                        break Err(self.decode_error(DumpError::decode(e.to_string())));
                    }
                    counted += 1;
                }
                Ok(None) => self.finished = true,
                Err(e) => break Err(e),
            }
        };
        self.stats.frames_skipped += counted;
        if result.is_err() {
            self.finished = true;
        }
        result
    }

    /// Число записей, отданных с момента открытия.
    pub fn yielded(&self) -> u64 {
        self.stats.records_yielded
    }

    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    pub fn dedup(&self) -> &DedupSet {
        &self.dedup
    }

    /// Поток исчерпан или прерван ошибкой.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Возвращает множество отпечатков для следующего источника.
    pub fn into_dedup(self) -> DedupSet {
        self.dedup
    }

    fn read_next(&mut self) -> DumpResult<Option<Record>> {
        while let Some(len) = self.next_frame()? {
            let record = {
                let text = std::str::from_utf8(&self.line[..len])
                    .map_err(|e| self.decode_error(DumpError::decode(e.to_string())))?;
                self.codec
                    .try_decode(text)
                    .map_err(|e| self.decode_error(e))?
            };

            if self.dedup.is_enabled() {
                let fp = self.codec.fingerprint(&record)?;
                if !self.dedup.insert(fp) {
                    self.stats.duplicates_dropped += 1;
                    continue;
                }
            }

            self.stats.records_yielded += 1;
            return Ok(Some(record));
        }
        Ok(None)
    }

    /// Читает сырые строки до первой непустой. Полезная нагрузка остаётся в
    /// `self.line[..len]`.
    fn next_frame(&mut self) -> DumpResult<Option<usize>> {
        loop {
            self.line.clear();
            let n = match self.source.read_until(frame::LINE_TERMINATOR, &mut self.line) {
                Ok(n) => n,
                Err(e) => return Err(self.io_error(e)),
            };
            if n == 0 {
                return Ok(None);
            }

            self.stats.lines_read += 1;
            self.stats.bytes_read += n as u64;

            if let Some(len) = frame::payload_len(&self.line) {
                return Ok(Some(len));
            }
        }
    }

    fn decode_error(
        &self,
        err: DumpError,
    ) -> StackError {
        let err = err.with_line(self.stats.lines_read);
        match &self.origin {
            Some(path) => err.with_path(path.clone()).into(),
            None => err.into(),
        }
    }

    fn io_error(
        &self,
        err: io::Error,
    ) -> StackError {
        let err = StackError::from(err);
        match &self.origin {
            Some(path) => err.context(format!("reading {}", path.display())),
            None => err,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = DumpResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
