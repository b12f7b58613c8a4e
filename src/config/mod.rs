pub mod settings;

pub use settings::{DumpSettings, SettingsError, DEFAULT_BUFFER_SIZE, ENV_PREFIX};
