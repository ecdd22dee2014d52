use super::file::FileTransaction;
use molstate::engine::config::EngineConfig;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub scenario_path: PathBuf,
    pub engine: EngineConfig,
    pub transactions: Vec<FileTransaction>,
    pub show_hidden: bool,
    pub render_each: bool,
}
