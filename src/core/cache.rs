use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::error::{PrestarterError, PrestarterResult};
use crate::core::source::{read_receipt, ComponentKind, ComponentReceipt, RuntimeRequirement};
use crate::core::version::{pick_best, RuntimeVersion};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// One committed component inside an install root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRuntime {
    pub kind: ComponentKind,
    pub version: String,
    pub install_path: PathBuf,
    pub checksum: String,
    pub installed_at: String,
    pub source: String,
}

impl InstalledRuntime {
    pub fn from_receipt(receipt: ComponentReceipt, install_path: PathBuf) -> Self {
        Self {
            kind: receipt.kind,
            version: receipt.version,
            install_path,
            checksum: receipt.checksum,
            installed_at: receipt.installed_at,
            source: receipt.source,
        }
    }

    /// Install path exists and its receipt still names the recorded archive.
    pub fn is_valid(&self) -> bool {
        if !self.install_path.is_dir() {
            return false;
        }
        read_receipt(&self.install_path, self.kind)
            .map(|receipt| receipt.checksum.eq_ignore_ascii_case(&self.checksum))
            .unwrap_or(false)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    schema_version: u32,
    #[serde(default)]
    runtimes: Vec<InstalledRuntime>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            runtimes: Vec::new(),
        }
    }
}

/// Manifest of the runtimes committed under one install root.
#[derive(Debug, Clone)]
pub struct RuntimeCache {
    root: PathBuf,
}

impl RuntimeCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE_NAME)
    }

    pub async fn needs_update(&self, requirement: &RuntimeRequirement) -> PrestarterResult<bool> {
        Ok(self.lookup(requirement).await?.is_none())
    }

    /// Best valid record for `requirement`. Records that fail validation are
    /// dropped from the manifest.
    pub async fn lookup(
        &self,
        requirement: &RuntimeRequirement,
    ) -> PrestarterResult<Option<InstalledRuntime>> {
        let mut manifest = self.load().await?;
        let before = manifest.runtimes.len();
        manifest.runtimes.retain(|record| {
            let valid = record.is_valid();
            if !valid {
                warn!(
                    "Pruning {} {} at {:?}: install missing or modified",
                    record.kind, record.version, record.install_path
                );
            }
            valid
        });
        if manifest.runtimes.len() != before {
            self.store(&manifest).await?;
        }

        let candidates = manifest
            .runtimes
            .into_iter()
            .filter(|record| record.kind == requirement.kind)
            .filter_map(|record| RuntimeVersion::parse(&record.version).map(|v| (v, record)));
        Ok(pick_best(candidates, &requirement.constraint).map(|(_, record)| record))
    }

    /// Upsert by (kind, version). Callers hold the install lock.
    pub async fn record(&self, installed: &InstalledRuntime) -> PrestarterResult<()> {
        self.record_all(std::slice::from_ref(installed)).await
    }

    /// Upsert every record with a single manifest write, so either all of
    /// them are committed or none are.
    pub async fn record_all(&self, installed: &[InstalledRuntime]) -> PrestarterResult<()> {
        let mut manifest = self.load().await?;
        for record in installed {
            manifest
                .runtimes
                .retain(|r| !(r.kind == record.kind && r.version == record.version));
            manifest.runtimes.push(record.clone());
        }
        self.store(&manifest).await?;
        for record in installed {
            info!("Recorded {} {} at {:?}", record.kind, record.version, record.install_path);
        }
        Ok(())
    }

    pub async fn invalidate(&self, kind: ComponentKind, version: &str) -> PrestarterResult<bool> {
        let mut manifest = self.load().await?;
        let before = manifest.runtimes.len();
        manifest
            .runtimes
            .retain(|r| !(r.kind == kind && r.version == version));
        let removed = manifest.runtimes.len() != before;
        if removed {
            self.store(&manifest).await?;
        }
        Ok(removed)
    }

    pub async fn entries(&self) -> PrestarterResult<Vec<InstalledRuntime>> {
        Ok(self.load().await?.runtimes)
    }

    async fn load(&self) -> PrestarterResult<Manifest> {
        let path = self.manifest_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Manifest::default()),
            Err(source) => return Err(PrestarterError::io(path, source)),
        };
        match serde_json::from_slice::<Manifest>(&bytes) {
            Ok(manifest) if manifest.schema_version == MANIFEST_SCHEMA_VERSION => Ok(manifest),
            Ok(manifest) => {
                warn!(
                    "Discarding manifest {:?} with schema {}",
                    path, manifest.schema_version
                );
                Ok(Manifest::default())
            }
            Err(err) => {
                warn!("Discarding unreadable manifest {:?}: {}", path, err);
                Ok(Manifest::default())
            }
        }
    }

    async fn store(&self, manifest: &Manifest) -> PrestarterResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| PrestarterError::io(&self.root, source))?;

        let path = self.manifest_path();
        let temp = self.root.join(format!(".{}.{}.tmp", MANIFEST_FILE_NAME, Uuid::new_v4()));
        let payload = serde_json::to_vec_pretty(manifest)?;
        tokio::fs::write(&temp, payload)
            .await
            .map_err(|source| PrestarterError::io(&temp, source))?;
        if let Err(source) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(PrestarterError::io(path, source));
        }
        debug!("Wrote manifest {:?} ({} records)", path, manifest.runtimes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::{Arch, Os, PlatformDescriptor};
    use crate::core::source::{write_receipt, ResolvedBuild};
    use crate::core::version::VersionConstraint;

    fn build(kind: ComponentKind, version: &str, checksum: &str) -> ResolvedBuild {
        ResolvedBuild {
            kind,
            version: version.into(),
            download_url: "http://127.0.0.1:9/archive".into(),
            checksum: checksum.into(),
            archive_name: "archive.tar.gz".into(),
            size: None,
            source: "test".into(),
            platform: PlatformDescriptor::from_parts(Os::Linux, Arch::X64).unwrap(),
        }
    }

    async fn install(root: &Path, dir: &str, build: &ResolvedBuild) -> InstalledRuntime {
        let path = root.join(dir);
        tokio::fs::create_dir_all(&path).await.unwrap();
        let receipt = ComponentReceipt::for_build(build);
        write_receipt(&path, &receipt).await.unwrap();
        InstalledRuntime::from_receipt(receipt, path)
    }

    fn jdk(constraint: &str) -> RuntimeRequirement {
        RuntimeRequirement::new(
            ComponentKind::Jdk,
            VersionConstraint::parse(constraint).unwrap(),
            PlatformDescriptor::from_parts(Os::Linux, Arch::X64).unwrap(),
        )
    }

    #[tokio::test]
    async fn empty_root_needs_update() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RuntimeCache::new(dir.path());
        assert!(cache.needs_update(&jdk(">=17")).await.unwrap());
        assert!(cache.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RuntimeCache::new(dir.path());
        let record = install(dir.path(), "java", &build(ComponentKind::Jdk, "21.0.2+13", "aa")).await;
        cache.record(&record).await.unwrap();

        assert!(!cache.needs_update(&jdk(">=17")).await.unwrap());
        assert!(cache.needs_update(&jdk("17")).await.unwrap());
        assert_eq!(cache.lookup(&jdk("21")).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn record_upserts_by_kind_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RuntimeCache::new(dir.path());
        let first = install(dir.path(), "java", &build(ComponentKind::Jdk, "21.0.2+13", "aa")).await;
        cache.record(&first).await.unwrap();
        let second = install(dir.path(), "java", &build(ComponentKind::Jdk, "21.0.2+13", "bb")).await;
        cache.record(&second).await.unwrap();

        let entries = cache.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].checksum, "bb");
    }

    #[tokio::test]
    async fn record_all_commits_every_member_in_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RuntimeCache::new(dir.path());
        let stale = install(dir.path(), "java", &build(ComponentKind::Jdk, "21.0.2+13", "aa")).await;
        cache.record(&stale).await.unwrap();

        let jdk_record = install(dir.path(), "java", &build(ComponentKind::Jdk, "21.0.2+13", "bb")).await;
        let ui_record = install(dir.path(), "javafx", &build(ComponentKind::UiRuntime, "21.0.2", "cc")).await;
        cache
            .record_all(&[jdk_record.clone(), ui_record.clone()])
            .await
            .unwrap();

        assert_eq!(cache.entries().await.unwrap(), vec![jdk_record, ui_record]);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn failed_record_all_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir_all(&root).unwrap();
        let cache = RuntimeCache::new(&root);
        let jdk_record = install(&root, "java", &build(ComponentKind::Jdk, "21.0.2+13", "aa")).await;
        let ui_record = install(&root, "javafx", &build(ComponentKind::UiRuntime, "21.0.2", "bb")).await;

        // A directory in place of the manifest makes the commit fail.
        std::fs::create_dir_all(cache.manifest_path().join("blocker")).unwrap();
        assert!(cache.record_all(&[jdk_record, ui_record]).await.is_err());

        std::fs::remove_dir_all(cache.manifest_path()).unwrap();
        assert!(cache.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleted_install_is_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RuntimeCache::new(dir.path());
        let record = install(dir.path(), "java", &build(ComponentKind::Jdk, "17.0.10+7", "aa")).await;
        cache.record(&record).await.unwrap();

        std::fs::remove_dir_all(&record.install_path).unwrap();
        assert!(cache.needs_update(&jdk("17")).await.unwrap());
        assert!(cache.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replaced_receipt_is_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RuntimeCache::new(dir.path());
        let record = install(dir.path(), "java", &build(ComponentKind::Jdk, "17.0.10+7", "aa")).await;
        cache.record(&record).await.unwrap();

        install(dir.path(), "java", &build(ComponentKind::Jdk, "17.0.11+9", "cc")).await;
        assert!(cache.lookup(&jdk("17")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RuntimeCache::new(dir.path());
        let record = install(dir.path(), "java", &build(ComponentKind::Jdk, "21.0.2+13", "aa")).await;
        cache.record(&record).await.unwrap();

        assert!(cache.invalidate(ComponentKind::Jdk, "21.0.2+13").await.unwrap());
        assert!(!cache.invalidate(ComponentKind::Jdk, "21.0.2+13").await.unwrap());
        assert!(cache.needs_update(&jdk("21")).await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_manifest_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE_NAME), b"{not json").unwrap();
        let cache = RuntimeCache::new(dir.path());
        assert!(cache.entries().await.unwrap().is_empty());
    }
}
