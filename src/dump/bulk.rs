//! Массовые операции: `dump`, `load`, `get_count`.

use std::{
    borrow::Borrow,
    collections::VecDeque,
    fs, mem,
    path::{Path, PathBuf},
};

use jdump_error::{ensure, DumpError, DumpResult, StackError, StatusCode};
use tracing::{debug, info, warn};

use super::{
    codec::{Codec, Record},
    compression::Compression,
    dedup::DedupSet,
    file::{open_source, DumpFile, DumpSource, Mode, OpenOptions},
    reader::RecordReader,
};
use crate::{
    config::{DumpSettings, DEFAULT_BUFFER_SIZE},
    logging,
};

/// Один путь или несколько путей (шаблонов).
pub trait IntoPaths {
    fn into_paths(self) -> Vec<PathBuf>;
}

/// Параметры [`dump`].
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// `true`: заменить существующие назначения; `false`: отказать, если
    /// назначение уже существует.
    pub overwrite: bool,
    /// Алгоритм сжатия для всех назначений вместо суффиксов имён.
    pub compression: Option<Compression>,
    pub settings: DumpSettings,
}

/// Параметры [`load`] и [`get_count`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Общая дедупликация по всем источникам.
    pub unique: bool,
    /// Сообщать о каждом открываемом файле.
    pub verbose: bool,
    pub buffer_size: usize,
}

/// Ленивая объединённая последовательность записей нескольких файлов.
///
/// Файлы открываются по одному; множество отпечатков переходит от файла к
/// файлу, так что запись, встреченная в двух файлах, отдаётся один раз в
/// позиции первого появления.
pub struct Load {
    pending: VecDeque<PathBuf>,
    total: usize,
    current: Option<RecordReader<DumpSource>>,
    current_path: Option<PathBuf>,
    dedup: DedupSet,
    codec: Codec,
    options: LoadOptions,
    yielded: u64,
    failed: bool,
}

////////////////////////////////////////////////////////////////////////////////
// dump
////////////////////////////////////////////////////////////////////////////////

/// Записывает `records` во все `destinations` транзакционно.
///
/// Каждая запись кодируется один раз и рассылается всем назначениям. Если
/// что-то пошло не так до фиксации, временные файлы удаляются, и назначения
/// остаются в прежнем состоянии. Фиксация идёт в порядке назначений после
/// записи всех записей. Возвращает число записей в каждом назначении.
pub fn dump<I, D>(
    records: I,
    destinations: D,
    options: &DumpOptions,
) -> DumpResult<u64>
where
    I: IntoIterator,
    I::Item: Borrow<Record>,
    D: IntoPaths,
{
    let paths = destinations.into_paths();
    ensure!(!paths.is_empty(), StatusCode::InvalidArgs, "no destinations given");

    let settings = &options.settings;
    let mode = if options.overwrite {
        Mode::Write
    } else {
        Mode::ExclusiveCreate
    };

    let mut open = OpenOptions::new(mode);
    open.transactional(true).settings(settings.clone());
    if let Some(compression) = options.compression {
        open.compression(compression);
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        match open.open(path) {
            Ok(file) => files.push(file),
            Err(err) => {
                discard_all(&mut files);
                return Err(err);
            }
        }
    }

    let codec = settings.codec();
    if let Err(err) = fan_out(records, &codec, settings.unique, &mut files) {
        discard_all(&mut files);
        return Err(err);
    }

    let count = files.first().map_or(0, DumpFile::count);
    for i in 0..files.len() {
        if let Err(err) = files[i].close() {
            discard_all(&mut files[i + 1..]);
            return Err(err);
        }
    }

    debug!(count, destinations = paths.len(), "dump complete");
    Ok(count)
}

fn fan_out<I>(
    records: I,
    codec: &Codec,
    unique: bool,
    files: &mut [DumpFile],
) -> DumpResult<()>
where
    I: IntoIterator,
    I::Item: Borrow<Record>,
{
    for record in records {
        let record = record.borrow();
        let (line, fp) = if unique {
            let (line, fp) = codec.encode_with_fingerprint(record)?;
            (line, Some(fp))
        } else {
            (codec.encode(record)?, None)
        };

        for file in files.iter_mut() {
            file.write_encoded(&line, fp)?;
        }
    }
    Ok(())
}

fn discard_all(files: &mut [DumpFile]) {
    for file in files {
        if let Err(err) = file.discard() {
            logging::log_error(&err, file.path(), "failed to discard staged dump");
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// load / get_count
////////////////////////////////////////////////////////////////////////////////

/// Открывает объединённую ленивую последовательность записей источников.
///
/// Источники раскрываются glob-шаблонами в указанном порядке. Отсутствующий
/// литеральный путь сразу даёт `SourceMissing`; шаблон без совпадений лишь
/// предупреждает.
pub fn load<S: IntoPaths>(
    sources: S,
    options: &LoadOptions,
) -> DumpResult<Load> {
    options.validate()?;
    let paths = expand_sources(sources.into_paths())?;
    Ok(Load::new(paths, options.clone()))
}

/// Считает записи источников.
///
/// Без дедупликации JSON не разбирается: кадры лишь проверяются на
/// корректность UTF-8.
pub fn get_count<S: IntoPaths>(
    sources: S,
    options: &LoadOptions,
) -> DumpResult<u64> {
    options.validate()?;
    if options.unique {
        let mut records = load(sources, options)?;
        while records.read()?.is_some() {}
        return Ok(records.yielded());
    }

    let paths = expand_sources(sources.into_paths())?;
    let mut total = 0;
    for (i, path) in paths.iter().enumerate() {
        if options.verbose {
            log_progress(i + 1, paths.len(), path);
        }
        let (source, _) = open_source(path, None, options.buffer_size)?;
        let mut reader = RecordReader::new(source, Codec::default(), false).with_origin(path);
        total += reader.count_frames()?;
    }
    Ok(total)
}

/// Раскрывает glob-шаблоны в список файлов, сохраняя порядок источников.
pub fn expand_sources(sources: Vec<PathBuf>) -> DumpResult<Vec<PathBuf>> {
    let mut out = Vec::with_capacity(sources.len());

    for source in sources {
        let pattern = source
            .to_str()
            .filter(|p| is_pattern(p))
            .map(str::to_owned);
        let Some(pattern) = pattern else {
            if !source.exists() {
                return Err(DumpError::SourceMissing { path: source }.into());
            }
            out.push(source);
            continue;
        };

        let entries = glob::glob(&pattern).map_err(|e| DumpError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.msg.to_string(),
        })?;

        let before = out.len();
        for entry in entries {
            let path = entry.map_err(|e| StackError::from(e.into_error()))?;
            if path.is_file() {
                out.push(path);
            }
        }

        if out.len() == before {
            // Имя файла может содержать `[` или `*` буквально.
            if source.is_file() {
                out.push(source);
            } else {
                warn!(pattern = %pattern, "no files match source pattern");
            }
        }
    }

    Ok(out)
}

fn is_pattern(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

fn log_progress(
    index: usize,
    total: usize,
    path: &Path,
) {
    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    info!("[{index}/{total}] ({}) {}", human_size(size), path.display());
}

/// Размер в двоичных единицах с одним знаком после запятой.
fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoadOptions {
    /// Проверяет параметры до открытия источников. Нулевой буфер читался бы
    /// как немедленный конец файла.
    pub fn validate(&self) -> DumpResult<()> {
        ensure!(
            self.buffer_size > 0,
            StatusCode::InvalidArgs,
            "buffer_size must be positive"
        );
        Ok(())
    }
}

impl Load {
    fn new(
        paths: Vec<PathBuf>,
        options: LoadOptions,
    ) -> Self {
        Self {
            total: paths.len(),
            pending: paths.into(),
            current: None,
            current_path: None,
            dedup: DedupSet::new(options.unique),
            codec: Codec::default(),
            options,
            yielded: 0,
            failed: false,
        }
    }

    /// Следующая запись объединённой последовательности.
    pub fn read(&mut self) -> DumpResult<Option<Record>> {
        if self.failed {
            return Ok(None);
        }
        let result = self.next_record();
        if let Err(err) = &result {
            let origin = self.current_path.as_deref().unwrap_or_else(|| Path::new("-"));
            logging::log_error(err, origin, "loading stopped");
            self.failed = true;
            self.current = None;
            self.pending.clear();
        }
        result
    }

    /// Число отданных записей.
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    /// Число файлов после раскрытия шаблонов.
    pub fn sources(&self) -> usize {
        self.total
    }

    fn next_record(&mut self) -> DumpResult<Option<Record>> {
        loop {
            match self.current.as_mut() {
                Some(reader) => match reader.read()? {
                    Some(record) => {
                        self.yielded += 1;
                        return Ok(Some(record));
                    }
                    None => {
                        if let Some(done) = self.current.take() {
                            self.dedup = done.into_dedup();
                        }
                    }
                },
                None => {
                    if !self.open_next()? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn open_next(&mut self) -> DumpResult<bool> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(false);
        };

        if self.options.verbose {
            log_progress(self.total - self.pending.len(), self.total, &path);
        }

        self.current_path = Some(path.clone());
        let (source, _) = open_source(&path, None, self.options.buffer_size)?;
        let dedup = mem::take(&mut self.dedup);
        self.current = Some(RecordReader::with_dedup(source, self.codec, dedup).with_origin(path));
        Ok(true)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Iterator for Load {
    type Item = DumpResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            unique: true,
            verbose: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl From<&DumpSettings> for LoadOptions {
    fn from(settings: &DumpSettings) -> Self {
        Self {
            unique: settings.unique,
            verbose: settings.verbose,
            buffer_size: settings.buffer_size,
        }
    }
}

impl IntoPaths for &str {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![PathBuf::from(self)]
    }
}

impl IntoPaths for String {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![PathBuf::from(self)]
    }
}

impl IntoPaths for &Path {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![self.to_path_buf()]
    }
}

impl IntoPaths for PathBuf {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![self]
    }
}

impl IntoPaths for &PathBuf {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![self.clone()]
    }
}

impl<P: AsRef<Path>> IntoPaths for Vec<P> {
    fn into_paths(self) -> Vec<PathBuf> {
        self.iter().map(|p| p.as_ref().to_path_buf()).collect()
    }
}

impl<P: AsRef<Path>> IntoPaths for &[P] {
    fn into_paths(self) -> Vec<PathBuf> {
        self.iter().map(|p| p.as_ref().to_path_buf()).collect()
    }
}

impl<P: AsRef<Path>, const N: usize> IntoPaths for [P; N] {
    fn into_paths(self) -> Vec<PathBuf> {
        self.iter().map(|p| p.as_ref().to_path_buf()).collect()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
