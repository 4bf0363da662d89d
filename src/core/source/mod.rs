// ─── Runtime Sources ───
// One fetch strategy per runtime component, all behind `RuntimeSource`.
//
//   adoptium.rs: Eclipse Temurin JDK builds (Adoptium API v3)
//   openjfx.rs : OpenJFX SDK builds (Maven Central versions, Gluon archives)
//   archive.rs : unpacking, staging and swap-in shared by both

pub mod adoptium;
pub mod archive;
pub mod openjfx;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::error::{PrestarterError, PrestarterResult};
use crate::core::platform::PlatformDescriptor;
use crate::core::version::VersionConstraint;

pub use adoptium::AdoptiumSource;
pub use openjfx::UiRuntimeSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    Jdk,
    UiRuntime,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Jdk => "jdk",
            ComponentKind::UiRuntime => "ui-runtime",
        }
    }

    /// Receipt file written inside the component's install directory.
    pub fn receipt_file(&self) -> String {
        format!(".prestarter-{}.json", self.as_str())
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What must be present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeRequirement {
    pub kind: ComponentKind,
    pub constraint: VersionConstraint,
    pub platform: PlatformDescriptor,
}

impl RuntimeRequirement {
    pub fn new(kind: ComponentKind, constraint: VersionConstraint, platform: PlatformDescriptor) -> Self {
        Self {
            kind,
            constraint,
            platform,
        }
    }

    pub fn no_match(&self) -> PrestarterError {
        PrestarterError::NoMatchingBuild {
            kind: self.kind.to_string(),
            constraint: self.constraint.to_string(),
            platform: self.platform.to_string(),
        }
    }
}

/// One concrete upstream build chosen by `resolve`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedBuild {
    pub kind: ComponentKind,
    pub version: String,
    pub download_url: String,
    /// SHA-256 of the archive, lowercase hex.
    pub checksum: String,
    pub archive_name: String,
    pub size: Option<u64>,
    pub source: String,
    pub platform: PlatformDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded { path: PathBuf },
    AlreadyPresent { path: PathBuf },
}

impl FetchOutcome {
    pub fn path(&self) -> &Path {
        match self {
            FetchOutcome::Downloaded { path } | FetchOutcome::AlreadyPresent { path } => path,
        }
    }
}

/// Capability set every runtime downloader implements.
#[async_trait]
pub trait RuntimeSource: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ComponentKind;

    /// The requirement this source contributes when `primary` is requested.
    fn requirement_for(&self, primary: &RuntimeRequirement) -> RuntimeRequirement {
        if primary.kind == self.kind() {
            primary.clone()
        } else {
            RuntimeRequirement::new(self.kind(), VersionConstraint::any(), primary.platform)
        }
    }

    /// Where this component lives under an install root.
    fn install_dir(&self, destination: &Path) -> PathBuf;

    /// Best upstream build for `requirement`.
    async fn resolve(
        &self,
        requirement: &RuntimeRequirement,
        cancel: &CancellationToken,
    ) -> PrestarterResult<ResolvedBuild>;

    /// Download and unpack `build` under `destination`. Writes nothing
    /// outside `destination`. Returns `AlreadyPresent` when the install
    /// directory already holds this exact build.
    async fn fetch(
        &self,
        build: &ResolvedBuild,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> PrestarterResult<FetchOutcome>;
}

/// Marker left in an install directory recording which archive it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentReceipt {
    pub kind: ComponentKind,
    pub version: String,
    pub checksum: String,
    pub source: String,
    pub installed_at: String,
}

impl ComponentReceipt {
    pub fn for_build(build: &ResolvedBuild) -> Self {
        Self {
            kind: build.kind,
            version: build.version.clone(),
            checksum: build.checksum.clone(),
            source: build.source.clone(),
            installed_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn matches(&self, build: &ResolvedBuild) -> bool {
        self.kind == build.kind && self.checksum.eq_ignore_ascii_case(&build.checksum)
    }
}

pub fn read_receipt(install_dir: &Path, kind: ComponentKind) -> Option<ComponentReceipt> {
    let path = install_dir.join(kind.receipt_file());
    let bytes = std::fs::read(&path).ok()?;
    match serde_json::from_slice::<ComponentReceipt>(&bytes) {
        Ok(receipt) if receipt.kind == kind => Some(receipt),
        Ok(_) => None,
        Err(err) => {
            warn!("Ignoring unreadable receipt {:?}: {}", path, err);
            None
        }
    }
}

pub async fn write_receipt(install_dir: &Path, receipt: &ComponentReceipt) -> PrestarterResult<()> {
    let path = install_dir.join(receipt.kind.receipt_file());
    let payload = serde_json::to_vec_pretty(receipt)?;
    tokio::fs::write(&path, payload)
        .await
        .map_err(|source| PrestarterError::io(path, source))
}
