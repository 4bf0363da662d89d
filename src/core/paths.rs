use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::config::PrestarterConfig;
use crate::core::error::{PrestarterError, PrestarterResult};

const APP_DIR_NAME: &str = "Prestarter";
const RUNTIME_DIR_NAME: &str = "runtime";

/// Whether an installed runtime is shared by every launcher on the host or
/// private to one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Shared,
    Private,
}

/// Install roots for both scopes.
#[derive(Debug, Clone)]
pub struct InstallPaths {
    shared_root: PathBuf,
    private_root: PathBuf,
}

impl InstallPaths {
    pub fn new(shared_root: PathBuf, private_root: PathBuf) -> Self {
        Self {
            shared_root,
            private_root,
        }
    }

    /// `<data>/Prestarter/runtime` and `<data>/Prestarter/<project>/runtime`.
    pub fn from_config(config: &PrestarterConfig) -> Self {
        let base = config
            .data_dir
            .clone()
            .unwrap_or_else(|| dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join(APP_DIR_NAME);

        Self {
            shared_root: base.join(RUNTIME_DIR_NAME),
            private_root: base.join(&config.project).join(RUNTIME_DIR_NAME),
        }
    }

    pub fn root_for(&self, scope: Scope) -> &Path {
        match scope {
            Scope::Shared => &self.shared_root,
            Scope::Private => &self.private_root,
        }
    }

    /// Create the scope's root and return its canonical form.
    pub fn prepare(&self, scope: Scope) -> PrestarterResult<PathBuf> {
        canonical_or_create_dir(self.root_for(scope))
    }
}

pub fn canonical_or_create_dir(path: &Path) -> PrestarterResult<PathBuf> {
    std::fs::create_dir_all(path).map_err(|source| PrestarterError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    std::fs::canonicalize(path).map_err(|source| PrestarterError::Io {
        path: path.to_path_buf(),
        source,
    })
}
