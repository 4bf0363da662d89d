use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::core::config::{ImageType, PrestarterConfig, DEFAULT_ADOPTIUM_API};
use crate::core::downloader::client::ensure_min_disk_space;
use crate::core::downloader::Downloader;
use crate::core::error::{PrestarterError, PrestarterResult};
use crate::core::version::{pick_best, RuntimeVersion};

use super::archive;
use super::{
    read_receipt, write_receipt, ComponentKind, ComponentReceipt, FetchOutcome, ResolvedBuild,
    RuntimeRequirement, RuntimeSource,
};

pub const JDK_DIR_NAME: &str = "java";
const SOURCE_NAME: &str = "adoptium";
const PAGE_SIZE: u32 = 20;
const MAX_PAGES: u32 = 5;

#[derive(Debug, Clone, Deserialize)]
struct AvailableReleases {
    available_releases: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumRelease {
    binaries: Vec<AdoptiumBinary>,
    version_data: AdoptiumVersion,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumBinary {
    architecture: String,
    image_type: String,
    os: String,
    package: AdoptiumPackage,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumPackage {
    checksum: String,
    link: String,
    name: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumVersion {
    openjdk_version: String,
}

/// Eclipse Temurin builds from the Adoptium v3 API.
#[derive(Debug, Clone)]
pub struct AdoptiumSource {
    downloader: Downloader,
    api_base: String,
    image_type: ImageType,
}

impl AdoptiumSource {
    pub fn new(downloader: Downloader) -> Self {
        Self {
            downloader,
            api_base: DEFAULT_ADOPTIUM_API.to_string(),
            image_type: ImageType::Jdk,
        }
    }

    pub fn from_config(config: &PrestarterConfig, downloader: Downloader) -> Self {
        Self::new(downloader)
            .with_api_base(config.adoptium_api.clone())
            .with_image_type(config.image_type)
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_image_type(mut self, image_type: ImageType) -> Self {
        self.image_type = image_type;
        self
    }

    async fn available_releases(&self, cancel: &CancellationToken) -> PrestarterResult<Vec<u32>> {
        let url = format!("{}/info/available_releases", self.api_base);
        let releases: AvailableReleases = self.downloader.get_json(&url, cancel).await?;
        Ok(releases.available_releases)
    }

    async fn feature_release_page(
        &self,
        major: u32,
        page: u32,
        requirement: &RuntimeRequirement,
        cancel: &CancellationToken,
    ) -> PrestarterResult<Vec<AdoptiumRelease>> {
        let url = format!(
            "{}/assets/feature_releases/{}/ga?architecture={}&image_type={}&os={}&vendor=eclipse&jvm_impl=hotspot&heap_size=normal&page={}&page_size={}&sort_order=DESC",
            self.api_base,
            major,
            requirement.platform.adoptium_arch(),
            self.image_type.as_str(),
            requirement.platform.adoptium_os(),
            page,
            PAGE_SIZE,
        );

        match self.downloader.get_json::<Vec<AdoptiumRelease>>(&url, cancel).await {
            Ok(releases) => Ok(releases),
            // Adoptium answers 404 when a feature release has no assets for the filter.
            Err(PrestarterError::DownloadFailed { status: 404, .. }) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl RuntimeSource for AdoptiumSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Jdk
    }

    fn install_dir(&self, destination: &Path) -> PathBuf {
        destination.join(JDK_DIR_NAME)
    }

    #[instrument(skip(self, cancel), fields(constraint = %requirement.constraint))]
    async fn resolve(
        &self,
        requirement: &RuntimeRequirement,
        cancel: &CancellationToken,
    ) -> PrestarterResult<ResolvedBuild> {
        let mut majors: Vec<u32> = self
            .available_releases(cancel)
            .await?
            .into_iter()
            .filter(|major| requirement.constraint.admits_major(*major))
            .collect();
        majors.sort_unstable_by(|a, b| b.cmp(a));
        debug!("Candidate feature releases: {:?}", majors);

        for major in majors {
            for page in 0..MAX_PAGES {
                let releases = self.feature_release_page(major, page, requirement, cancel).await?;
                if releases.is_empty() {
                    break;
                }
                let exhausted = releases.len() < PAGE_SIZE as usize;
                if let Some(build) = select_build(releases, requirement, self.image_type) {
                    info!("Resolved JDK {} for {}", build.version, requirement.platform);
                    return Ok(build);
                }
                if exhausted {
                    break;
                }
            }
        }

        Err(requirement.no_match())
    }

    #[instrument(skip(self, build, cancel), fields(version = %build.version))]
    async fn fetch(
        &self,
        build: &ResolvedBuild,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> PrestarterResult<FetchOutcome> {
        let install_dir = self.install_dir(destination);
        let java_exe = build.platform.java_exe();

        if let Some(receipt) = read_receipt(&install_dir, ComponentKind::Jdk) {
            if receipt.matches(build) && archive::locate_java_binary(&install_dir, java_exe).exists() {
                info!("JDK {} already installed at {:?}", build.version, install_dir);
                return Ok(FetchOutcome::AlreadyPresent { path: install_dir });
            }
        }

        let archive_path = destination.join("downloads").join(&build.archive_name);
        let download_start = Instant::now();
        self.downloader
            .download_verified(&build.download_url, &archive_path, &build.checksum, cancel)
            .await?;
        info!("JDK download finished in {:?}", download_start.elapsed());

        if cancel.is_cancelled() {
            return Err(PrestarterError::Cancelled);
        }

        let extract_start = Instant::now();
        ensure_min_disk_space(destination, self.downloader.min_free_bytes())?;
        let staged = archive::staging_dir(destination);
        if let Err(err) = archive::unpack(&archive_path, &staged).await {
            let _ = tokio::fs::remove_dir_all(&staged).await;
            let _ = tokio::fs::remove_file(&archive_path).await;
            return Err(err);
        }

        let java_bin = archive::locate_java_binary(&staged, java_exe);
        if !java_bin.is_file() {
            let _ = tokio::fs::remove_dir_all(&staged).await;
            let _ = tokio::fs::remove_file(&archive_path).await;
            return Err(PrestarterError::Unpack {
                archive: archive_path,
                reason: format!("no {java_exe} inside the archive"),
            });
        }
        archive::mark_bin_executable(&java_bin)?;
        info!("JDK extraction finished in {:?}", extract_start.elapsed());

        write_receipt(&staged, &ComponentReceipt::for_build(build)).await?;
        archive::swap_into_place(&staged, &install_dir).await?;
        let _ = tokio::fs::remove_file(&archive_path).await;

        Ok(FetchOutcome::Downloaded { path: install_dir })
    }
}

/// Best build among `releases` for the requirement's platform and constraint.
fn select_build(
    releases: Vec<AdoptiumRelease>,
    requirement: &RuntimeRequirement,
    image_type: ImageType,
) -> Option<ResolvedBuild> {
    let platform = requirement.platform;
    let extension = format!(".{}", platform.archive_extension());

    let candidates = releases.into_iter().filter_map(|release| {
        let version_text = clean_openjdk_version(&release.version_data.openjdk_version);
        let version = RuntimeVersion::parse(&version_text)?;
        let binary = release.binaries.into_iter().find(|binary| {
            binary.os == platform.adoptium_os()
                && binary.architecture == platform.adoptium_arch()
                && binary.image_type == image_type.as_str()
                && binary.package.name.ends_with(&extension)
        })?;
        Some((version, binary.package))
    });

    let (version, package) = pick_best(candidates, &requirement.constraint)?;
    Some(ResolvedBuild {
        kind: ComponentKind::Jdk,
        version: version.as_str().to_string(),
        download_url: package.link,
        checksum: package.checksum.to_ascii_lowercase(),
        archive_name: package.name,
        size: package.size,
        source: SOURCE_NAME.to_string(),
        platform,
    })
}

fn clean_openjdk_version(raw: &str) -> String {
    raw.split('-').next().unwrap_or(raw).to_string()
}
