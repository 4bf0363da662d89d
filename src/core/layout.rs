// ─── Runtime Layout ───
// What the launcher hand-off needs from an installed runtime: the java
// executable, the OpenJFX module path and the argument vector.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::cache::InstalledRuntime;
use crate::core::downloader::{DownloadStatus, Downloader};
use crate::core::error::{PrestarterError, PrestarterResult};
use crate::core::platform::PlatformDescriptor;
use crate::core::source::archive::locate_java_binary;
use crate::core::source::ComponentKind;

pub const LAUNCHER_JAR_NAME: &str = "Launcher.jar";
pub const JAVAFX_MODULES: &str =
    "javafx.controls,javafx.fxml,javafx.graphics,javafx.media,javafx.swing,javafx.web";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    pub java_home: PathBuf,
    pub java_bin: PathBuf,
    /// `lib/` of the OpenJFX SDK, merged or standalone.
    pub module_path: Option<PathBuf>,
}

impl RuntimeLayout {
    /// Layout of a completed acquisition. Needs a JDK record.
    pub fn from_installed(
        installed: &[InstalledRuntime],
        platform: &PlatformDescriptor,
    ) -> PrestarterResult<Self> {
        let jdk = installed
            .iter()
            .find(|r| r.kind == ComponentKind::Jdk)
            .ok_or_else(|| PrestarterError::Other("no JDK among installed runtimes".into()))?;
        let java_bin = locate_java_binary(&jdk.install_path, platform.java_exe());
        if !java_bin.is_file() {
            return Err(PrestarterError::MissingBaseRuntime(java_bin));
        }

        let module_path = installed
            .iter()
            .find(|r| r.kind == ComponentKind::UiRuntime)
            .map(|r| r.install_path.join("lib"))
            .filter(|lib| lib.is_dir());

        Ok(Self {
            java_home: jdk.install_path.clone(),
            java_bin,
            module_path,
        })
    }

    /// JVM arguments that start `launcher_jar` with OpenJFX on the module path.
    pub fn launcher_args(&self, launcher_jar: &Path) -> Vec<String> {
        let mut args = Vec::with_capacity(6);
        if let Some(module_path) = &self.module_path {
            args.push("--module-path".to_string());
            args.push(module_path.display().to_string());
            args.push("--add-modules".to_string());
            args.push(JAVAFX_MODULES.to_string());
        }
        args.push("-jar".to_string());
        args.push(launcher_jar.display().to_string());
        args
    }
}

/// Fetch the launcher jar into `<root>/Launcher.jar` unless already there.
pub async fn ensure_launcher_jar(
    downloader: &Downloader,
    url: &str,
    root: &Path,
    cancel: &CancellationToken,
) -> PrestarterResult<PathBuf> {
    let jar = root.join(LAUNCHER_JAR_NAME);
    match downloader.download_if_missing(url, &jar, cancel).await? {
        DownloadStatus::Reused => debug!("Launcher already present at {:?}", jar),
        DownloadStatus::Downloaded { bytes } => info!("Downloaded launcher ({} bytes) to {:?}", bytes, jar),
    }
    Ok(jar)
}
