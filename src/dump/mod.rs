//! Формат файла дампа: последовательность JSON-записей, по одной на строку,
//! каждая завершается разделителем `--` и `\n`.

pub mod bulk;
pub mod codec;
pub mod compression;
pub mod dedup;
pub mod file;
pub mod frame;
pub mod reader;
pub mod sink;
pub mod writer;

pub use bulk::{dump, expand_sources, get_count, load, DumpOptions, IntoPaths, Load, LoadOptions};
pub use codec::{Codec, KeyOrder, Record};
pub use compression::{Compression, CompressionLevels, Encoder};
pub use dedup::{DedupSet, Fingerprint};
pub use file::{DumpFile, DumpSource, Mode, OpenOptions};
pub use reader::{ReadStats, RecordReader};
pub use sink::{CommitPolicy, FileSink};
pub use writer::RecordWriter;
