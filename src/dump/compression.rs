//! Прозрачное потоковое сжатие файлов дампа.
//!
//! При записи алгоритм выбирается по суффиксу имени назначения или явным
//! флагом. При чтении и дозаписи определяется по сигнатуре в первых байтах
//! файла, так что неверно названный файл всё равно открывается корректно.

use std::{
    fmt,
    fs::File,
    io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write},
    path::Path,
    str::FromStr,
};

use flate2::{bufread::MultiGzDecoder, write::GzEncoder, GzBuilder};
use jdump_error::{CompressionOp, DumpError, DumpResult, GenericError, StackError, StatusCode};

/// Сигнатура gzip.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Сигнатура кадра zstd.
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Алгоритм сжатия файла дампа.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
}

/// Уровни сжатия для каждого алгоритма.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevels {
    /// 0..=9
    pub gzip: u32,
    /// 1..=22
    pub zstd: i32,
}

/// Кодер, оборачивающий приёмник байтов выбранным алгоритмом.
pub enum Encoder<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Compression {
    /// Выбирает алгоритм по имени файла: `*gz` → gzip, `*.zst`/`*.zstd` → zstd.
    pub fn from_path(path: &Path) -> Self {
        let Some(name) = path.file_name() else {
            return Self::None;
        };
        let name = name.to_string_lossy().to_ascii_lowercase();

        if name.ends_with(".zst") || name.ends_with(".zstd") {
            Self::Zstd
        } else if name.ends_with("gz") {
            Self::Gzip
        } else {
            Self::None
        }
    }

    /// Определяет алгоритм по первым байтам содержимого.
    pub fn sniff(head: &[u8]) -> Self {
        if head.starts_with(&GZIP_MAGIC) {
            Self::Gzip
        } else if head.starts_with(&ZSTD_MAGIC) {
            Self::Zstd
        } else {
            Self::None
        }
    }

    /// Читает сигнатуру открытого файла и возвращает позицию в начало.
    ///
    /// Возвращает `None` для пустого файла.
    pub fn detect(file: &mut File) -> io::Result<Option<Self>> {
        let mut head = Vec::with_capacity(ZSTD_MAGIC.len());
        file.seek(SeekFrom::Start(0))?;
        (&mut *file)
            .take(ZSTD_MAGIC.len() as u64)
            .read_to_end(&mut head)?;
        file.seek(SeekFrom::Start(0))?;

        if head.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Self::sniff(&head)))
        }
    }

    /// Каноническое расширение файла.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some("gz"),
            Self::Zstd => Some("zst"),
        }
    }

    pub fn is_compressed(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl Default for CompressionLevels {
    fn default() -> Self {
        Self { gzip: 6, zstd: 3 }
    }
}

impl<W: Write> Encoder<W> {
    /// Создаёт кодер поверх `inner`.
    ///
    /// `inner_name` записывается в заголовок gzip как имя исходного файла.
    pub fn new(
        inner: W,
        compression: Compression,
        levels: CompressionLevels,
        inner_name: Option<&str>,
    ) -> DumpResult<Self> {
        let encoder = match compression {
            Compression::None => Self::Plain(inner),
            Compression::Gzip => {
                let mut builder = GzBuilder::new();
                if let Some(name) = inner_name {
                    builder = builder.filename(name);
                }
                Self::Gzip(builder.write(inner, flate2::Compression::new(levels.gzip)))
            }
            Compression::Zstd => Self::Zstd(
                zstd::stream::write::Encoder::new(inner, levels.zstd)
                    .map_err(|e| compress_error(CompressionOp::Compress, &e))?,
            ),
        };
        Ok(encoder)
    }

    /// Дописывает завершающие блоки сжатия и возвращает внутренний приёмник.
    pub fn finish(self) -> DumpResult<W> {
        match self {
            Self::Plain(w) => Ok(w),
            Self::Gzip(enc) => enc
                .finish()
                .map_err(|e| compress_error(CompressionOp::Compress, &e).into()),
            Self::Zstd(enc) => enc
                .finish()
                .map_err(|e| compress_error(CompressionOp::Compress, &e).into()),
        }
    }

    pub fn compression(&self) -> Compression {
        match self {
            Self::Plain(_) => Compression::None,
            Self::Gzip(_) => Compression::Gzip,
            Self::Zstd(_) => Compression::Zstd,
        }
    }
}

/// Открывает файл на чтение с прозрачной распаковкой.
///
/// Многочленный gzip и последовательность кадров zstd читаются как единый
/// поток, поэтому файлы после нескольких сессий дозаписи читаются целиком.
pub fn reader_for(
    file: File,
    compression: Compression,
    capacity: usize,
) -> DumpResult<Box<dyn BufRead + Send>> {
    let raw = BufReader::with_capacity(capacity, file);
    let reader: Box<dyn BufRead + Send> = match compression {
        Compression::None => Box::new(raw),
        Compression::Gzip => Box::new(BufReader::with_capacity(capacity, MultiGzDecoder::new(raw))),
        Compression::Zstd => {
            let decoder = zstd::stream::read::Decoder::with_buffer(raw)
                .map_err(|e| compress_error(CompressionOp::Decompress, &e))?;
            Box::new(BufReader::with_capacity(capacity, decoder))
        }
    };
    Ok(reader)
}

fn compress_error(
    operation: CompressionOp,
    err: &io::Error,
) -> DumpError {
    DumpError::Compression {
        operation,
        reason: err.to_string(),
        path: None,
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for Compression {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

impl FromStr for Compression {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            "zstd" | "zst" => Ok(Self::Zstd),
            other => Err(GenericError::new(
                StatusCode::Unsupported,
                format!("unknown compression '{other}'"),
            )
            .into()),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
            Self::Zstd(w) => w.write(buf),
        }
    }

    fn write_all(
        &mut self,
        buf: &[u8],
    ) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.write_all(buf),
            Self::Gzip(w) => w.write_all(buf),
            Self::Zstd(w) => w.write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
            Self::Zstd(w) => w.flush(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io::Read;

    use rstest::rstest;
    use tempfile::tempfile;

    use super::*;

    #[rstest]
    #[case("dump.txt", Compression::None)]
    #[case("dump.txt.gz", Compression::Gzip)]
    #[case("DUMP.GZ", Compression::Gzip)]
    #[case("archive.tgz", Compression::Gzip)]
    #[case("dump.zst", Compression::Zstd)]
    #[case("dump.json.zstd", Compression::Zstd)]
    #[case("gz/plain", Compression::None)]
    fn test_from_path(
        #[case] name: &str,
        #[case] expected: Compression,
    ) {
        assert_eq!(Compression::from_path(Path::new(name)), expected);
    }

    #[test]
    fn test_sniff() {
        assert_eq!(Compression::sniff(&[0x1f, 0x8b, 8, 0]), Compression::Gzip);
        assert_eq!(Compression::sniff(&ZSTD_MAGIC), Compression::Zstd);
        assert_eq!(Compression::sniff(b"{\"a\""), Compression::None);
        assert_eq!(Compression::sniff(&[0x1f]), Compression::None);
    }

    #[test]
    fn test_from_str_aliases() {
        assert_eq!("gz".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("ZSTD".parse::<Compression>().unwrap(), Compression::Zstd);
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        let err = "lz4".parse::<Compression>().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::Unsupported);
    }

    /// Тест проверяет, что каждый алгоритм распознаётся по собственному выводу
    /// и данные читаются обратно через `reader_for`.
    #[rstest]
    #[case(Compression::None)]
    #[case(Compression::Gzip)]
    #[case(Compression::Zstd)]
    fn test_encoder_output_is_detected_and_readable(#[case] compression: Compression) {
        let mut file = tempfile().unwrap();
        let mut enc = Encoder::new(
            file.try_clone().unwrap(),
            compression,
            CompressionLevels::default(),
            Some("dump.txt"),
        )
        .unwrap();
        enc.write_all(b"1--\n2--\n").unwrap();
        enc.finish().unwrap();

        assert_eq!(Compression::detect(&mut file).unwrap(), Some(compression));

        let mut out = String::new();
        reader_for(file, compression, 1024)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "1--\n2--\n");
    }

    #[test]
    fn test_detect_empty_file() {
        let mut file = tempfile().unwrap();
        assert_eq!(Compression::detect(&mut file).unwrap(), None);
    }

    /// Тест проверяет, что несколько членов gzip читаются как один поток.
    #[test]
    fn test_multi_member_gzip() {
        let mut file = tempfile().unwrap();
        for chunk in [&b"1--\n"[..], &b"2--\n"[..]] {
            file.seek(SeekFrom::End(0)).unwrap();
            let mut enc = Encoder::new(
                file.try_clone().unwrap(),
                Compression::Gzip,
                CompressionLevels::default(),
                None,
            )
            .unwrap();
            enc.write_all(chunk).unwrap();
            enc.finish().unwrap();
        }
        file.seek(SeekFrom::Start(0)).unwrap();

        let mut out = String::new();
        reader_for(file, Compression::Gzip, 64)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "1--\n2--\n");
    }
}
