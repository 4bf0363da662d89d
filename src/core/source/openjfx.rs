use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::config::{PrestarterConfig, DEFAULT_OPENJFX_DOWNLOAD_BASE, DEFAULT_OPENJFX_METADATA_URL};
use crate::core::downloader::client::ensure_min_disk_space;
use crate::core::downloader::Downloader;
use crate::core::error::{PrestarterError, PrestarterResult};
use crate::core::platform::PlatformDescriptor;
use crate::core::version::{rank_candidates, RuntimeVersion, VersionConstraint};

use super::adoptium::JDK_DIR_NAME;
use super::archive;
use super::{
    read_receipt, write_receipt, ComponentKind, ComponentReceipt, FetchOutcome, ResolvedBuild,
    RuntimeRequirement, RuntimeSource,
};

pub const JAVAFX_DIR_NAME: &str = "javafx";
const SOURCE_NAME: &str = "openjfx";
/// Gluon does not publish every version Maven Central lists; try a few.
const MAX_RESOLVE_ATTEMPTS: usize = 5;

/// Minimal `maven-metadata.xml` model.
#[derive(Debug, Deserialize, Default)]
struct MavenMetadata {
    #[serde(default)]
    versioning: Versioning,
}

#[derive(Debug, Deserialize, Default)]
struct Versioning {
    #[serde(default)]
    versions: Versions,
}

#[derive(Debug, Deserialize, Default)]
struct Versions {
    #[serde(default, rename = "version")]
    items: Vec<String>,
}

impl MavenMetadata {
    fn parse(xml: &str) -> PrestarterResult<Self> {
        Ok(from_str(xml)?)
    }
}

/// OpenJFX SDK builds. Installed next to the JDK, or merged into its tree
/// when `merge_into_jdk` is set.
#[derive(Debug, Clone)]
pub struct UiRuntimeSource {
    downloader: Downloader,
    metadata_url: String,
    download_base: String,
    constraint: Option<VersionConstraint>,
    merge_into_jdk: bool,
}

impl UiRuntimeSource {
    pub fn new(downloader: Downloader, merge_into_jdk: bool) -> Self {
        Self {
            downloader,
            metadata_url: DEFAULT_OPENJFX_METADATA_URL.to_string(),
            download_base: DEFAULT_OPENJFX_DOWNLOAD_BASE.to_string(),
            constraint: None,
            merge_into_jdk,
        }
    }

    pub fn from_config(config: &PrestarterConfig, downloader: Downloader) -> Self {
        let source = Self::new(downloader, config.merge_javafx_into_jdk)
            .with_metadata_url(config.openjfx_metadata_url.clone())
            .with_download_base(config.openjfx_download_base.clone());
        match &config.javafx_version {
            Some(constraint) => source.with_constraint(constraint.clone()),
            None => source,
        }
    }

    pub fn with_metadata_url(mut self, url: impl Into<String>) -> Self {
        self.metadata_url = url.into();
        self
    }

    pub fn with_download_base(mut self, base: impl Into<String>) -> Self {
        self.download_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_constraint(mut self, constraint: VersionConstraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn merges_into_jdk(&self) -> bool {
        self.merge_into_jdk
    }

    fn archive_name(version: &str, platform: &PlatformDescriptor) -> String {
        format!(
            "openjfx-{}_{}-{}_bin-sdk.zip",
            version,
            platform.gluon_os(),
            platform.gluon_arch()
        )
    }

    fn archive_url(&self, version: &str, platform: &PlatformDescriptor) -> String {
        format!(
            "{}/{}/{}",
            self.download_base,
            version,
            Self::archive_name(version, platform)
        )
    }

    async fn published_checksum(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> PrestarterResult<Option<String>> {
        let sha_url = format!("{url}.sha256");
        match self.downloader.get_text(&sha_url, cancel).await {
            Ok(text) => Ok(parse_sha256_file(&text)),
            Err(PrestarterError::DownloadFailed { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl RuntimeSource for UiRuntimeSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::UiRuntime
    }

    /// Follows the JDK feature release unless a version was configured.
    fn requirement_for(&self, primary: &RuntimeRequirement) -> RuntimeRequirement {
        if primary.kind == ComponentKind::UiRuntime {
            return primary.clone();
        }
        let constraint = match &self.constraint {
            Some(constraint) => constraint.clone(),
            None => primary
                .constraint
                .lowest_major()
                .map(VersionConstraint::major)
                .unwrap_or_default(),
        };
        RuntimeRequirement::new(ComponentKind::UiRuntime, constraint, primary.platform)
    }

    fn install_dir(&self, destination: &Path) -> PathBuf {
        if self.merge_into_jdk {
            destination.join(JDK_DIR_NAME)
        } else {
            destination.join(JAVAFX_DIR_NAME)
        }
    }

    #[instrument(skip(self, cancel), fields(constraint = %requirement.constraint))]
    async fn resolve(
        &self,
        requirement: &RuntimeRequirement,
        cancel: &CancellationToken,
    ) -> PrestarterResult<ResolvedBuild> {
        let xml = self.downloader.get_text(&self.metadata_url, cancel).await?;
        let metadata = MavenMetadata::parse(&xml)?;
        debug!("Maven Central lists {} OpenJFX versions", metadata.versioning.versions.items.len());

        let candidates = metadata
            .versioning
            .versions
            .items
            .into_iter()
            .filter_map(|raw| RuntimeVersion::parse(&raw).map(|version| (version, raw)));
        let ranked = rank_candidates(candidates, &requirement.constraint);

        for (_, raw) in ranked.into_iter().take(MAX_RESOLVE_ATTEMPTS) {
            let url = self.archive_url(&raw, &requirement.platform);
            let Some(checksum) = self.published_checksum(&url, cancel).await? else {
                warn!("OpenJFX {} is not published for {}", raw, requirement.platform);
                continue;
            };
            info!("Resolved OpenJFX {} for {}", raw, requirement.platform);
            return Ok(ResolvedBuild {
                kind: ComponentKind::UiRuntime,
                archive_name: Self::archive_name(&raw, &requirement.platform),
                version: raw,
                download_url: url,
                checksum,
                size: None,
                source: SOURCE_NAME.to_string(),
                platform: requirement.platform,
            });
        }

        Err(requirement.no_match())
    }

    #[instrument(skip(self, build, cancel), fields(version = %build.version, merge = self.merge_into_jdk))]
    async fn fetch(
        &self,
        build: &ResolvedBuild,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> PrestarterResult<FetchOutcome> {
        let install_dir = self.install_dir(destination);

        if let Some(receipt) = read_receipt(&install_dir, ComponentKind::UiRuntime) {
            if receipt.matches(build) && install_dir.join("lib").is_dir() {
                info!("OpenJFX {} already installed at {:?}", build.version, install_dir);
                return Ok(FetchOutcome::AlreadyPresent { path: install_dir });
            }
        }

        if self.merge_into_jdk && read_receipt(&install_dir, ComponentKind::Jdk).is_none() {
            return Err(PrestarterError::MissingBaseRuntime(install_dir));
        }

        let archive_path = destination.join("downloads").join(&build.archive_name);
        self.downloader
            .download_verified(&build.download_url, &archive_path, &build.checksum, cancel)
            .await?;

        if cancel.is_cancelled() {
            return Err(PrestarterError::Cancelled);
        }

        ensure_min_disk_space(destination, self.downloader.min_free_bytes())?;
        let staged = archive::staging_dir(destination);
        if let Err(err) = archive::unpack(&archive_path, &staged).await {
            let _ = tokio::fs::remove_dir_all(&staged).await;
            let _ = tokio::fs::remove_file(&archive_path).await;
            return Err(err);
        }
        if !staged.join("lib").is_dir() {
            let _ = tokio::fs::remove_dir_all(&staged).await;
            let _ = tokio::fs::remove_file(&archive_path).await;
            return Err(PrestarterError::Unpack {
                archive: archive_path,
                reason: "no lib directory inside the SDK".into(),
            });
        }

        let receipt = ComponentReceipt::for_build(build);
        if self.merge_into_jdk {
            archive::copy_dir_recursive(&staged, &install_dir)?;
            write_receipt(&install_dir, &receipt).await?;
            let _ = tokio::fs::remove_dir_all(&staged).await;
        } else {
            write_receipt(&staged, &receipt).await?;
            archive::swap_into_place(&staged, &install_dir).await?;
        }
        let _ = tokio::fs::remove_file(&archive_path).await;

        Ok(FetchOutcome::Downloaded { path: install_dir })
    }
}

/// Gluon `.sha256` files hold the hash, optionally followed by the file name.
fn parse_sha256_file(text: &str) -> Option<String> {
    let token = text.split_whitespace().next()?;
    if token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(token.to_ascii_lowercase())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::{Arch, Os};

    const METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>org.openjfx</groupId>
  <artifactId>javafx</artifactId>
  <versioning>
    <latest>23-ea+3</latest>
    <release>22.0.1</release>
    <versions>
      <version>17.0.2</version>
      <version>17.0.10</version>
      <version>21.0.1</version>
      <version>21.0.2</version>
      <version>23-ea+3</version>
    </versions>
    <lastUpdated>20240416101010</lastUpdated>
  </versioning>
</metadata>"#;

    fn source(merge: bool) -> UiRuntimeSource {
        UiRuntimeSource::new(Downloader::new(reqwest::Client::new()), merge)
            .with_metadata_url("http://127.0.0.1:9/maven-metadata.xml")
            .with_download_base("http://127.0.0.1:9/openjfx/")
    }

    fn linux_x64() -> PlatformDescriptor {
        PlatformDescriptor::from_parts(Os::Linux, Arch::X64).unwrap()
    }

    #[test]
    fn parses_maven_metadata() {
        let metadata = MavenMetadata::parse(METADATA).unwrap();
        assert_eq!(metadata.versioning.versions.items.len(), 5);
        assert_eq!(metadata.versioning.versions.items[1], "17.0.10");
    }

    #[test]
    fn builds_gluon_urls() {
        let mac = PlatformDescriptor::from_parts(Os::MacOs, Arch::Arm64).unwrap();
        assert_eq!(
            source(false).archive_url("21.0.2", &mac),
            "http://127.0.0.1:9/openjfx/21.0.2/openjfx-21.0.2_osx-aarch64_bin-sdk.zip"
        );
    }

    #[test]
    fn derives_requirement_from_jdk() {
        let primary = RuntimeRequirement::new(
            ComponentKind::Jdk,
            VersionConstraint::parse(">=17").unwrap(),
            linux_x64(),
        );
        let derived = source(true).requirement_for(&primary);
        assert_eq!(derived.kind, ComponentKind::UiRuntime);
        assert_eq!(derived.constraint.as_str(), "17");

        let pinned = source(true)
            .with_constraint(VersionConstraint::parse("21.0.2").unwrap())
            .requirement_for(&primary);
        assert_eq!(pinned.constraint.as_str(), "21.0.2");
    }

    #[test]
    fn install_dir_follows_mode() {
        let root = Path::new("/opt/runtime");
        assert_eq!(source(true).install_dir(root), root.join("java"));
        assert_eq!(source(false).install_dir(root), root.join("javafx"));
    }

    #[test]
    fn parses_sha256_files() {
        let hash = "a".repeat(64);
        assert_eq!(parse_sha256_file(&format!("{hash}  openjfx.zip\n")), Some(hash.clone()));
        assert_eq!(parse_sha256_file(&hash.to_uppercase()), Some(hash));
        assert_eq!(parse_sha256_file("<html>not found</html>"), None);
    }

    #[tokio::test]
    async fn merge_requires_base_jdk() {
        let dir = tempfile::tempdir().unwrap();
        let build = ResolvedBuild {
            kind: ComponentKind::UiRuntime,
            version: "21.0.2".into(),
            download_url: "http://127.0.0.1:9/openjfx.zip".into(),
            checksum: "a".repeat(64),
            archive_name: "openjfx.zip".into(),
            size: None,
            source: SOURCE_NAME.into(),
            platform: linux_x64(),
        };
        let result = source(true)
            .fetch(&build, dir.path(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(PrestarterError::MissingBaseRuntime(_))));
    }
}
