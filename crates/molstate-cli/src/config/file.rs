use crate::error::{CliError, Result};
use molstate::core::models::params::Params;
use molstate::engine::config::InheritedErrors;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

pub const ROOT_TAG: &str = "root";

fn root_tag() -> String {
    ROOT_TAG.to_string()
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FileInheritedErrors {
    #[default]
    Annotate,
    Verbatim,
}

impl From<FileInheritedErrors> for InheritedErrors {
    fn from(mode: FileInheritedErrors) -> Self {
        match mode {
            FileInheritedErrors::Annotate => InheritedErrors::Annotate,
            FileInheritedErrors::Verbatim => InheritedErrors::Verbatim,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileEngineConfig {
    pub max_concurrency: Option<usize>,
    pub inherited_errors: Option<FileInheritedErrors>,
    pub dispose_on_replace: Option<bool>,
}

/// One edit of a scenario transaction. Nodes are addressed by tag; `root` is
/// the tree root.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", tag = "op")]
pub enum FileEdit {
    Add {
        tag: String,
        #[serde(default = "root_tag")]
        parent: String,
        transformer: String,
        #[serde(default)]
        params: Params,
        #[serde(default)]
        hidden: bool,
        #[serde(default)]
        collapsed: bool,
    },
    Remove {
        target: String,
    },
    Reparent {
        target: String,
        parent: String,
    },
    SetParams {
        target: String,
        params: Params,
    },
    SetFlags {
        target: String,
        hidden: Option<bool>,
        collapsed: Option<bool>,
    },
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileTransaction {
    pub name: Option<String>,
    #[serde(default)]
    pub edit: Vec<FileEdit>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    pub engine: Option<FileEngineConfig>,
    #[serde(default)]
    pub transaction: Vec<FileTransaction>,
}

impl ScenarioFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading scenario from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }
}
