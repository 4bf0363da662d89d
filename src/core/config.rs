// ─── Prestarter Configuration ───
// Project identity, download policy, runtime selection and dialog branding.
// Constructed once at startup and passed by reference.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::error::{PrestarterError, PrestarterResult};
use crate::core::paths::Scope;
use crate::core::version::VersionConstraint;

pub const CONFIG_FILE_NAME: &str = "prestarter.json";
pub const CONFIG_ENV_VAR: &str = "PRESTARTER_CONFIG";

pub const DEFAULT_ADOPTIUM_API: &str = "https://api.adoptium.net/v3";
pub const DEFAULT_OPENJFX_METADATA_URL: &str =
    "https://repo1.maven.org/maven2/org/openjfx/javafx/maven-metadata.xml";
pub const DEFAULT_OPENJFX_DOWNLOAD_BASE: &str = "https://download2.gluonhq.com/openjfx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Jdk,
    Jre,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Jdk => "jdk",
            ImageType::Jre => "jre",
        }
    }
}

/// Dialog colours as `#RRGGBB`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Branding {
    pub primary_color: String,
    pub background_color: String,
    pub foreground_color: String,
    pub button_color: String,
    pub button_hover_color: String,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            primary_color: "#720606".to_string(),
            background_color: "#00417e".to_string(),
            foreground_color: "#969696".to_string(),
            button_color: "#2afa00".to_string(),
            button_hover_color: "#2E2E2E".to_string(),
        }
    }
}

impl Branding {
    pub fn validate(&self) -> PrestarterResult<()> {
        for (name, value) in [
            ("primaryColor", &self.primary_color),
            ("backgroundColor", &self.background_color),
            ("foregroundColor", &self.foreground_color),
            ("buttonColor", &self.button_color),
            ("buttonHoverColor", &self.button_hover_color),
        ] {
            if parse_hex_color(value).is_none() {
                return Err(PrestarterError::InvalidConfig(format!(
                    "{name} must be #RRGGBB, got '{value}'"
                )));
            }
        }
        Ok(())
    }
}

/// Parse `#RRGGBB` into its RGB components.
pub fn parse_hex_color(value: &str) -> Option<(u8, u8, u8)> {
    let hex_digits = value.strip_prefix('#')?;
    if hex_digits.len() != 6 {
        return None;
    }
    let bytes = hex::decode(hex_digits).ok()?;
    Some((bytes[0], bytes[1], bytes[2]))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrestarterConfig {
    /// Project name as configured on the launch server.
    pub project: String,
    pub version: String,
    /// Where to fetch the launcher jar. `None` means the launcher ships alongside.
    pub launcher_download_url: Option<String>,
    /// Ask before downloading the runtime.
    pub download_question_enabled: bool,
    /// Share one runtime between every launcher on the machine.
    pub use_global_java: bool,
    pub java_version: VersionConstraint,
    /// OpenJFX version. Follows the JDK feature release when unset.
    pub javafx_version: Option<VersionConstraint>,
    /// Install OpenJFX into the JDK tree instead of next to it.
    pub merge_javafx_into_jdk: bool,
    pub image_type: ImageType,
    pub adoptium_api: String,
    pub openjfx_metadata_url: String,
    pub openjfx_download_base: String,
    /// Overrides the per-user data directory.
    pub data_dir: Option<PathBuf>,
    pub branding: Branding,
}

impl Default for PrestarterConfig {
    fn default() -> Self {
        Self {
            project: "Prestarter".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            launcher_download_url: None,
            download_question_enabled: true,
            use_global_java: true,
            java_version: VersionConstraint::parse(">=21").unwrap_or_default(),
            javafx_version: None,
            merge_javafx_into_jdk: true,
            image_type: ImageType::Jdk,
            adoptium_api: DEFAULT_ADOPTIUM_API.to_string(),
            openjfx_metadata_url: DEFAULT_OPENJFX_METADATA_URL.to_string(),
            openjfx_download_base: DEFAULT_OPENJFX_DOWNLOAD_BASE.to_string(),
            data_dir: None,
            branding: Branding::default(),
        }
    }
}

impl PrestarterConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> PrestarterResult<Self> {
        let bytes = std::fs::read(path).map_err(|source| PrestarterError::io(path, source))?;
        let config: PrestarterConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// `$PRESTARTER_CONFIG`, then `prestarter.json` beside the executable,
    /// then built-in defaults.
    pub fn discover() -> PrestarterResult<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::load(Path::new(&path));
        }

        let beside_exe = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE_NAME)));
        if let Some(path) = beside_exe {
            if path.exists() {
                return Self::load(&path);
            }
        }

        info!("No {} found, using built-in configuration", CONFIG_FILE_NAME);
        Ok(Self::default())
    }

    pub fn validate(&self) -> PrestarterResult<()> {
        if self.project.trim().is_empty() {
            return Err(PrestarterError::InvalidConfig("project must not be empty".into()));
        }
        if self
            .project
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        {
            return Err(PrestarterError::InvalidConfig(format!(
                "project '{}' must be usable as a directory name",
                self.project
            )));
        }
        self.branding.validate()
    }

    pub fn dialog_name(&self) -> &str {
        &self.project
    }

    pub fn scope(&self) -> Scope {
        if self.use_global_java {
            Scope::Shared
        } else {
            Scope::Private
        }
    }

    pub fn user_agent(&self) -> String {
        format!("Prestarter/{} ({})", env!("CARGO_PKG_VERSION"), self.project)
    }
}
