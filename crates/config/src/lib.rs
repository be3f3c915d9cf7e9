//! Fabric configuration: schema and file discovery.
//!
//! Config is a static object supplied at fabric construction. It is loaded
//! once from `weft.{toml,yaml,yml,json}` (project-local, then
//! `~/.config/weft/`) and never reloaded at runtime.

pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, load_config, set_config_dir},
    schema::FabricConfig,
};
