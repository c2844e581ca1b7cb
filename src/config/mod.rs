//! Configuration: `DictationConfig` (top-level settings), per-subsystem
//! sub-configs, platform paths, and TOML persistence via
//! `DictationConfig::load` / `DictationConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AudioConfig, DictationConfig, EmitConfig, RecognizerConfig, VadBackend, VadConfig,
};
