//! Configuration system
//!
//! TOML file with embedded defaults per section. The loaded [`Config`] is
//! handed to each component constructor by the composition root.

pub mod macros;
pub mod schemas;
pub mod utils;

pub use schemas::*;
pub use utils::{load_config, load_config_from_path, CONFIG_FILE_PATH};
