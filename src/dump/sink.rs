//! Файловый приёмник записей: прямой или через временный файл.
//!
//! Временный файл создаётся в каталоге назначения, поэтому переименование
//! остаётся атомарным. Назначение и временный файл обязаны лежать на одной
//! файловой системе; это требование развёртывания, и оно не проверяется.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use jdump_error::{DumpError, DumpResult, ResultExt};
use tempfile::TempPath;
use tracing::{debug, warn};

use super::compression::{Compression, CompressionLevels, Encoder};

/// Как поступать с назначением при фиксации временного файла.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    /// Заменить существующее назначение.
    Overwrite,
    /// Отказать, если назначение появилось во время записи.
    NoClobber,
}

/// Приёмник байтов поверх файла с прозрачным сжатием.
pub struct FileSink {
    encoder: Option<Encoder<BufWriter<File>>>,
    staged: Option<TempPath>,
    destination: PathBuf,
    policy: CommitPolicy,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl FileSink {
    /// Пишет напрямую в уже открытый файл назначения.
    pub fn direct(
        file: File,
        destination: impl Into<PathBuf>,
        compression: Compression,
        levels: CompressionLevels,
        buffer_size: usize,
    ) -> DumpResult<Self> {
        let destination = destination.into();
        let buf = BufWriter::with_capacity(buffer_size, file);
        let encoder = Encoder::new(buf, compression, levels, inner_name(&destination).as_deref())?;

        Ok(Self {
            encoder: Some(encoder),
            staged: None,
            destination,
            policy: CommitPolicy::Overwrite,
        })
    }

    /// Пишет во временный файл рядом с назначением; назначение не
    /// затрагивается до [`FileSink::commit`].
    pub fn staged(
        destination: impl Into<PathBuf>,
        policy: CommitPolicy,
        compression: Compression,
        levels: CompressionLevels,
        buffer_size: usize,
    ) -> DumpResult<Self> {
        let destination = destination.into();
        let dir = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let prefix = format!(".{name}.");

        let tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".partial")
            .tempfile_in(dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;
        let (file, path) = tmp.into_parts();
        debug!(temp = %path.display(), destination = %destination.display(), "staging dump file");

        let buf = BufWriter::with_capacity(buffer_size, file);
        let encoder = Encoder::new(buf, compression, levels, inner_name(&destination).as_deref())?;

        Ok(Self {
            encoder: Some(encoder),
            staged: Some(path),
            destination,
            policy,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Путь временного файла, если приёмник промежуточный.
    pub fn staged_path(&self) -> Option<&Path> {
        self.staged.as_deref()
    }

    pub fn is_staged(&self) -> bool {
        self.staged.is_some()
    }

    pub fn compression(&self) -> Compression {
        self.encoder
            .as_ref()
            .map_or(Compression::None, Encoder::compression)
    }

    /// Завершает сжатие, синхронизирует файл на диск и, для промежуточного
    /// приёмника, атомарно переименовывает его в назначение.
    pub fn commit(mut self) -> DumpResult<()> {
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };

        let buf = encoder.finish()?;
        let file = buf.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        let Some(tmp) = self.staged.take() else {
            return Ok(());
        };

        let persisted = match self.policy {
            CommitPolicy::Overwrite => tmp.persist(&self.destination),
            CommitPolicy::NoClobber => tmp.persist_noclobber(&self.destination),
        };
        persisted.map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                DumpError::DestinationExists {
                    path: self.destination.clone(),
                }
            } else {
                DumpError::Commit {
                    path: self.destination.clone(),
                    reason: e.error.to_string(),
                }
            }
        })?;

        debug!(destination = %self.destination.display(), "committed dump file");
        Ok(())
    }

    /// Отбрасывает промежуточный файл, не трогая назначение.
    ///
    /// Для прямого приёмника равносильно попытке завершить запись.
    pub fn abort(mut self) -> DumpResult<()> {
        let encoder = self.encoder.take();
        match self.staged.take() {
            Some(tmp) => {
                drop(encoder);
                tmp.close()?;
                debug!(destination = %self.destination.display(), "discarded staged dump file");
                Ok(())
            }
            None => match encoder {
                Some(encoder) => {
                    encoder.finish()?.flush()?;
                    Ok(())
                }
                None => Ok(()),
            },
        }
    }

    fn encoder_mut(&mut self) -> io::Result<&mut Encoder<BufWriter<File>>> {
        self.encoder
            .as_mut()
            .ok_or_else(|| io::Error::other("dump sink is already closed"))
    }
}

/// Имя исходного файла для заголовка gzip: имя назначения без `.gz`.
fn inner_name(destination: &Path) -> Option<String> {
    let name = destination.file_name()?.to_string_lossy();
    let lower = name.to_ascii_lowercase();
    let trimmed = if lower.ends_with(".gz") {
        &name[..name.len() - 3]
    } else {
        &name[..]
    };
    Some(trimmed.to_string())
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Write for FileSink {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> io::Result<usize> {
        self.encoder_mut()?.write(buf)
    }

    fn write_all(
        &mut self,
        buf: &[u8],
    ) -> io::Result<()> {
        self.encoder_mut()?.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder_mut()?.flush()
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        let Some(encoder) = self.encoder.take() else {
            return;
        };

        if let Some(tmp) = self.staged.take() {
            warn!(
                destination = %self.destination.display(),
                "dump file was not closed, discarding staged writes"
            );
            drop(encoder);
            drop(tmp);
        } else if let Err(e) = encoder.finish().and_then(|mut w| Ok(w.flush()?)) {
            warn!(destination = %self.destination.display(), error = %e, "failed to finish dump file");
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::fs;

    use jdump_error::StatusCode;
    use tempfile::tempdir;

    use super::*;

    fn staged(
        dest: &Path,
        policy: CommitPolicy,
    ) -> FileSink {
        FileSink::staged(
            dest,
            policy,
            Compression::None,
            CompressionLevels::default(),
            4096,
        )
        .unwrap()
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_staged_commit_replaces_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        fs::write(&dest, "old").unwrap();

        let mut sink = staged(&dest, CommitPolicy::Overwrite);
        let tmp = sink.staged_path().unwrap().to_path_buf();
        assert!(tmp
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(".out.txt."));
        sink.write_all(b"new").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"old");

        sink.commit().unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"new");
        assert!(!tmp.exists());
    }

    /// Тест проверяет, что неподтверждённый приёмник удаляет временный файл и
    /// не трогает назначение.
    #[test]
    fn test_drop_discards_staged_file() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.txt");

        let mut sink = staged(&dest, CommitPolicy::Overwrite);
        sink.write_all(b"partial").unwrap();
        drop(sink);

        assert!(!dest.exists());
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn test_abort_discards_staged_file() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        fs::write(&dest, "keep").unwrap();

        let mut sink = staged(&dest, CommitPolicy::Overwrite);
        sink.write_all(b"partial").unwrap();
        sink.abort().unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"keep");
        assert_eq!(entries(dir.path()), vec!["out.txt".to_string()]);
    }

    /// Тест проверяет, что назначение, появившееся во время записи, не
    /// перезаписывается в режиме без затирания.
    #[test]
    fn test_noclobber_detects_racing_creation() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.txt");

        let mut sink = staged(&dest, CommitPolicy::NoClobber);
        sink.write_all(b"mine").unwrap();
        fs::write(&dest, "theirs").unwrap();

        let err = sink.commit().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::AlreadyExists);
        assert_eq!(fs::read(&dest).unwrap(), b"theirs");
        assert_eq!(entries(dir.path()), vec!["out.txt".to_string()]);
    }

    #[test]
    fn test_direct_sink_writes_in_place() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        let file = File::create(&dest).unwrap();

        let mut sink = FileSink::direct(
            file,
            &dest,
            Compression::None,
            CompressionLevels::default(),
            16,
        )
        .unwrap();
        sink.write_all(b"abc").unwrap();
        sink.commit().unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"abc");
    }

    #[test]
    fn test_inner_name_strips_gz() {
        assert_eq!(
            inner_name(Path::new("/a/data.txt.gz")).as_deref(),
            Some("data.txt")
        );
        assert_eq!(
            inner_name(Path::new("data.txt")).as_deref(),
            Some("data.txt")
        );
    }
}
