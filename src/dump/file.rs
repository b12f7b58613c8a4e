//! Дескриптор файла дампа с режимами `r`, `w`, `a`, `x`.
//!
//! Жизненный цикл: `open(mode)` → чтение или запись → `close()`. Закрытие
//! идемпотентно; для транзакционной записи именно оно атомарно подменяет
//! назначение. Незакрытый транзакционный дескриптор при уничтожении
//! откатывается, и назначение остаётся нетронутым.

use std::{
    borrow::Borrow,
    fmt,
    fs::{self, File},
    io::{self, BufRead, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use jdump_error::{DumpError, DumpResult, StackError};
use tracing::{debug, warn};

use super::{
    codec::{KeyOrder, Record},
    compression::{self, Compression},
    dedup::{DedupSet, Fingerprint},
    reader::{ReadStats, RecordReader},
    sink::{CommitPolicy, FileSink},
    writer::RecordWriter,
};
use crate::{config::DumpSettings, logging};

/// Распакованный буферизованный поток исходного файла.
pub type DumpSource = Box<dyn BufRead + Send>;

/// Режим открытия файла дампа.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// `r`: файл обязан существовать.
    Read,
    /// `w`: создать или усечь.
    Write,
    /// `a`: файл обязан существовать, запись продолжается в конец.
    Append,
    /// `x`: файл не должен существовать.
    ExclusiveCreate,
}

/// Построитель параметров открытия.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    mode: Mode,
    compression: Option<Compression>,
    transactional: bool,
    seed: Option<DedupSet>,
    settings: DumpSettings,
}

/// Открытый (или уже закрытый) файл дампа.
pub struct DumpFile {
    path: PathBuf,
    mode: Mode,
    compression: Compression,
    state: State,
}

enum State {
    Reading(RecordReader<DumpSource>),
    Writing(RecordWriter<FileSink>),
    Closed { count: u64 },
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Mode {
    /// Однобуквенное обозначение режима.
    pub fn letter(&self) -> char {
        match self {
            Self::Read => 'r',
            Self::Write => 'w',
            Self::Append => 'a',
            Self::ExclusiveCreate => 'x',
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read)
    }
}

impl OpenOptions {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            compression: None,
            transactional: false,
            seed: None,
            settings: DumpSettings::default(),
        }
    }

    pub fn mode(
        &mut self,
        mode: Mode,
    ) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Явно задаёт алгоритм сжатия вместо суффикса имени и сигнатуры.
    pub fn compression(
        &mut self,
        compression: Compression,
    ) -> &mut Self {
        self.compression = Some(compression);
        self
    }

    pub fn unique(
        &mut self,
        unique: bool,
    ) -> &mut Self {
        self.settings.unique = unique;
        self
    }

    pub fn key_order(
        &mut self,
        key_order: KeyOrder,
    ) -> &mut Self {
        self.settings.key_order = key_order;
        self
    }

    /// Запись через временный файл с подменой назначения при закрытии.
    ///
    /// Допустимо только для режимов `w` и `x`.
    pub fn transactional(
        &mut self,
        transactional: bool,
    ) -> &mut Self {
        self.transactional = transactional;
        self
    }

    /// Начальное множество отпечатков, например собранное чтением
    /// существующего файла перед дозаписью.
    pub fn seed(
        &mut self,
        dedup: DedupSet,
    ) -> &mut Self {
        self.seed = Some(dedup);
        self
    }

    pub fn settings(
        &mut self,
        settings: DumpSettings,
    ) -> &mut Self {
        self.settings = settings;
        self
    }

    /// Открывает файл с текущими параметрами.
    pub fn open(
        &self,
        path: impl AsRef<Path>,
    ) -> DumpResult<DumpFile> {
        DumpFile::open_with(path.as_ref(), self)
    }

    fn dedup(&self) -> DedupSet {
        match &self.seed {
            Some(seed) if self.settings.unique => seed.clone(),
            _ => DedupSet::new(self.settings.unique),
        }
    }
}

impl DumpFile {
    /// Открывает файл в заданном режиме с параметрами по умолчанию.
    pub fn open(
        path: impl AsRef<Path>,
        mode: Mode,
    ) -> DumpResult<Self> {
        OpenOptions::new(mode).open(path)
    }

    /// Построитель параметров; режим по умолчанию `r`.
    pub fn options() -> OpenOptions {
        OpenOptions::new(Mode::Read)
    }

    /// Открывает файл, передаёт его в `f` и закрывает.
    ///
    /// При `Ok` файл закрывается (транзакция фиксируется), при `Err`
    /// транзакция откатывается, и ошибка возвращается вызывающему.
    pub fn scoped<T, F>(
        path: impl AsRef<Path>,
        options: &OpenOptions,
        f: F,
    ) -> DumpResult<T>
    where
        F: FnOnce(&mut DumpFile) -> DumpResult<T>,
    {
        let mut file = options.open(path)?;
        match f(&mut file) {
            Ok(value) => {
                file.close()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(discard_err) = file.discard() {
                    logging::log_error(
                        &discard_err,
                        &file.path,
                        "failed to discard dump file after error",
                    );
                }
                Err(err)
            }
        }
    }

    fn open_with(
        path: &Path,
        opts: &OpenOptions,
    ) -> DumpResult<Self> {
        let path = std::path::absolute(path)?;
        let settings = &opts.settings;
        settings.validate()?;

        let mode = opts.mode;
        if opts.transactional && matches!(mode, Mode::Read | Mode::Append) {
            return Err(DumpError::invalid_mode("write transactionally", mode).into());
        }

        let codec = settings.codec();
        let (compression, state) = match mode {
            Mode::Read => {
                let (source, compression) =
                    open_source(&path, opts.compression, settings.buffer_size)?;
                let reader =
                    RecordReader::with_dedup(source, codec, opts.dedup()).with_origin(&path);
                (compression, State::Reading(reader))
            }
            Mode::Write | Mode::Append | Mode::ExclusiveCreate => {
                let sink = open_sink(&path, mode, opts)?;
                let compression = sink.compression();
                let writer = RecordWriter::with_dedup(sink, codec, opts.dedup());
                (compression, State::Writing(writer))
            }
        };

        debug!(
            path = %path.display(),
            mode = %mode,
            compression = %compression,
            transactional = opts.transactional,
            "opened dump file"
        );

        Ok(Self {
            path,
            mode,
            compression,
            state,
        })
    }

    /// Читает следующую запись; `Ok(None)` в конце файла.
    pub fn read(&mut self) -> DumpResult<Option<Record>> {
        self.reader_mut("read")?.read()
    }

    /// Читает до `n` записей.
    pub fn read_n(
        &mut self,
        n: usize,
    ) -> DumpResult<Vec<Record>> {
        self.reader_mut("read")?.read_n(n)
    }

    /// Пропускает до `n` кадров без декодирования.
    pub fn skip(
        &mut self,
        n: u64,
    ) -> DumpResult<u64> {
        self.reader_mut("skip")?.skip_frames(n)
    }

    /// Итератор по оставшимся записям.
    pub fn records(&mut self) -> DumpResult<&mut RecordReader<DumpSource>> {
        self.reader_mut("read")
    }

    /// Пишет запись; `false`, если она отброшена как дубликат.
    pub fn write(
        &mut self,
        record: &Record,
    ) -> DumpResult<bool> {
        self.writer_mut("write")?.write(record)
    }

    /// Пишет последовательность записей и возвращает число записанных.
    pub fn write_many<I>(
        &mut self,
        records: I,
    ) -> DumpResult<u64>
    where
        I: IntoIterator,
        I::Item: Borrow<Record>,
    {
        self.writer_mut("write")?.write_many(records)
    }

    pub(crate) fn write_encoded(
        &mut self,
        line: &str,
        fp: Option<Fingerprint>,
    ) -> DumpResult<bool> {
        self.writer_mut("write")?.write_encoded(line, fp)
    }

    /// Сбрасывает буферы писателя; для читателя ничего не делает.
    pub fn flush(&mut self) -> DumpResult<()> {
        match &mut self.state {
            State::Writing(w) => w.flush(),
            State::Reading(_) => Ok(()),
            State::Closed { .. } => Err(closed("flush")),
        }
    }

    /// Число записей, прочитанных или записанных с момента открытия.
    /// Сохраняется после закрытия.
    pub fn count(&self) -> u64 {
        match &self.state {
            State::Reading(r) => r.yielded(),
            State::Writing(w) => w.count(),
            State::Closed { count } => *count,
        }
    }

    /// Счётчики чтения (только в режиме `r`).
    pub fn stats(&self) -> Option<ReadStats> {
        match &self.state {
            State::Reading(r) => Some(r.stats()),
            _ => None,
        }
    }

    /// Закрывает файл. Повторный вызов ничего не делает.
    ///
    /// Для транзакционной записи завершает сжатие, синхронизирует данные и
    /// атомарно подменяет назначение.
    pub fn close(&mut self) -> DumpResult<()> {
        let count = self.count();
        match std::mem::replace(&mut self.state, State::Closed { count }) {
            State::Reading(_) | State::Closed { .. } => Ok(()),
            State::Writing(writer) => {
                writer.into_inner().commit()?;
                debug!(path = %self.path.display(), count, "closed dump file");
                Ok(())
            }
        }
    }

    /// Закрывает файл без фиксации: временный файл удаляется, назначение не
    /// меняется. Для прямой записи равносильно [`DumpFile::close`].
    pub fn discard(&mut self) -> DumpResult<()> {
        let count = self.count();
        match std::mem::replace(&mut self.state, State::Closed { count }) {
            State::Reading(_) | State::Closed { .. } => Ok(()),
            State::Writing(writer) => writer.into_inner().abort(),
        }
    }

    /// Закрывает файл и возвращает его множество отпечатков.
    pub fn into_dedup(mut self) -> DumpResult<DedupSet> {
        let count = self.count();
        match std::mem::replace(&mut self.state, State::Closed { count }) {
            State::Reading(reader) => Ok(reader.into_dedup()),
            State::Writing(writer) => {
                let (sink, dedup) = writer.into_parts();
                sink.commit()?;
                Ok(dedup)
            }
            State::Closed { .. } => Err(closed("take dedup set")),
        }
    }

    /// Абсолютный путь назначения.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed { .. })
    }

    fn reader_mut(
        &mut self,
        operation: &str,
    ) -> DumpResult<&mut RecordReader<DumpSource>> {
        match &mut self.state {
            State::Reading(r) => Ok(r),
            State::Writing(_) => Err(DumpError::invalid_mode(operation, self.mode).into()),
            State::Closed { .. } => Err(closed(operation)),
        }
    }

    fn writer_mut(
        &mut self,
        operation: &str,
    ) -> DumpResult<&mut RecordWriter<FileSink>> {
        match &mut self.state {
            State::Writing(w) => Ok(w),
            State::Reading(_) => Err(DumpError::invalid_mode(operation, self.mode).into()),
            State::Closed { .. } => Err(closed(operation)),
        }
    }
}

/// Открывает существующий файл на чтение с распаковкой.
///
/// Без явного алгоритма он определяется по сигнатуре содержимого.
pub(crate) fn open_source(
    path: &Path,
    compression: Option<Compression>,
    capacity: usize,
) -> DumpResult<(DumpSource, Compression)> {
    let mut file = File::open(path).map_err(|e| missing_or_io(e, path))?;
    let compression = match compression {
        Some(c) => c,
        None => Compression::detect(&mut file)?.unwrap_or_default(),
    };
    let source = compression::reader_for(file, compression, capacity)
        .map_err(|e| e.context(format!("opening {}", path.display())))?;
    Ok((source, compression))
}

fn open_sink(
    path: &Path,
    mode: Mode,
    opts: &OpenOptions,
) -> DumpResult<FileSink> {
    let settings = &opts.settings;
    let levels = settings.levels();
    let requested = opts
        .compression
        .unwrap_or_else(|| Compression::from_path(path));

    match mode {
        Mode::Write if opts.transactional => FileSink::staged(
            path,
            CommitPolicy::Overwrite,
            requested,
            levels,
            settings.buffer_size,
        ),
        Mode::Write => {
            let file = File::create(path).map_err(|e| io_context(e, "creating", path))?;
            FileSink::direct(file, path, requested, levels, settings.buffer_size)
        }
        Mode::ExclusiveCreate if opts.transactional => {
            if fs::symlink_metadata(path).is_ok() {
                return Err(DumpError::DestinationExists {
                    path: path.to_path_buf(),
                }
                .into());
            }
            FileSink::staged(
                path,
                CommitPolicy::NoClobber,
                requested,
                levels,
                settings.buffer_size,
            )
        }
        Mode::ExclusiveCreate => {
            let file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .map_err(|e| {
                    if e.kind() == io::ErrorKind::AlreadyExists {
                        DumpError::DestinationExists {
                            path: path.to_path_buf(),
                        }
                        .into()
                    } else {
                        io_context(e, "creating", path)
                    }
                })?;
            FileSink::direct(file, path, requested, levels, settings.buffer_size)
        }
        Mode::Append => {
            let mut file = fs::OpenOptions::new()
                .read(true)
                .append(true)
                .open(path)
                .map_err(|e| missing_or_io(e, path))?;

            // Сигнатура существующего содержимого важнее суффикса и флага;
            // иначе в одном файле смешались бы разные форматы.
            let compression = match Compression::detect(&mut file)? {
                Some(existing) => {
                    if let Some(forced) = opts.compression.filter(|c| *c != existing) {
                        warn!(
                            path = %path.display(),
                            requested = %forced,
                            existing = %existing,
                            "ignoring compression override, appending in existing format"
                        );
                    }
                    existing
                }
                None => requested,
            };
            if compression == Compression::None {
                terminate_last_line(&mut file, path)
                    .map_err(|e| io_context(e, "appending to", path))?;
            }
            FileSink::direct(file, path, compression, levels, settings.buffer_size)
        }
        Mode::Read => Err(DumpError::invalid_mode("write", mode).into()),
    }
}

/// Дописывает `\n`, если последний кадр несжатого файла не завершён.
///
/// Без этого новый кадр склеился бы с последней строкой, и обе записи
/// стали бы нечитаемыми.
fn terminate_last_line(
    file: &mut File,
    path: &Path,
) -> io::Result<()> {
    if file.metadata()?.len() == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        debug!(path = %path.display(), "terminating unfinished last line before append");
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn missing_or_io(
    err: io::Error,
    path: &Path,
) -> StackError {
    if err.kind() == io::ErrorKind::NotFound {
        DumpError::SourceMissing {
            path: path.to_path_buf(),
        }
        .into()
    } else {
        io_context(err, "opening", path)
    }
}

fn io_context(
    err: io::Error,
    action: &str,
    path: &Path,
) -> StackError {
    StackError::from(err).context(format!("{action} {}", path.display()))
}

fn closed(operation: &str) -> StackError {
    DumpError::invalid_mode(operation, "closed").into()
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for Mode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Append => "append",
            Self::ExclusiveCreate => "exclusive-create",
        };
        f.write_str(name)
    }
}

impl FromStr for Mode {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" | "read" => Ok(Self::Read),
            "w" | "write" => Ok(Self::Write),
            "a" | "append" => Ok(Self::Append),
            "x" | "exclusive-create" => Ok(Self::ExclusiveCreate),
            other => Err(DumpError::invalid_mode("open", other).into()),
        }
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new(Mode::Read)
    }
}

impl fmt::Debug for DumpFile {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DumpFile")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("compression", &self.compression)
            .field("count", &self.count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
