/// Settings loading: defaults, config file and `JDUMP_*` environment.
pub mod config;
/// Dump file format: framing, codec, compression, reader, writer, bulk helpers.
pub mod dump;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Settings and their validation error.
pub use config::{DumpSettings, SettingsError};
/// Bulk helpers and file handles.
pub use dump::{
    dump, expand_sources, get_count, load, Codec, Compression, CompressionLevels, DedupSet,
    DumpFile, DumpOptions, Fingerprint, IntoPaths, KeyOrder, Load, LoadOptions, Mode, OpenOptions,
    ReadStats, Record, RecordReader, RecordWriter,
};
/// Error stack shared with the `jdump-error` crate.
pub use jdump_error::{DumpError, DumpResult, StackError, StatusCode};
/// Logging setup.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
