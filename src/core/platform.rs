// ─── Platform Probe ───
// Host OS/architecture detection and the catalog spellings for each.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::{PrestarterError, PrestarterResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Windows,
    Linux,
    MacOs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    Arm64,
    X86,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    pub os: Os,
    pub arch: Arch,
}

impl PlatformDescriptor {
    /// Detect the host platform.
    pub fn detect() -> PrestarterResult<Self> {
        let os = match std::env::consts::OS {
            "windows" => Os::Windows,
            "linux" => Os::Linux,
            "macos" => Os::MacOs,
            other => return Err(unsupported(other, std::env::consts::ARCH)),
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => Arch::X64,
            "aarch64" => Arch::Arm64,
            "x86" => Arch::X86,
            other => return Err(unsupported(std::env::consts::OS, other)),
        };
        Self::from_parts(os, arch)
    }

    /// Build a descriptor, rejecting combinations no catalog publishes.
    pub fn from_parts(os: Os, arch: Arch) -> PrestarterResult<Self> {
        match (os, arch) {
            (Os::MacOs, Arch::X86) | (Os::Linux, Arch::X86) => {
                Err(unsupported(os.adoptium(), arch.adoptium()))
            }
            _ => Ok(Self { os, arch }),
        }
    }

    pub fn adoptium_os(&self) -> &'static str {
        self.os.adoptium()
    }

    pub fn adoptium_arch(&self) -> &'static str {
        self.arch.adoptium()
    }

    pub fn gluon_os(&self) -> &'static str {
        match self.os {
            Os::Windows => "windows",
            Os::Linux => "linux",
            Os::MacOs => "osx",
        }
    }

    pub fn gluon_arch(&self) -> &'static str {
        match self.arch {
            Arch::X64 => "x64",
            Arch::Arm64 => "aarch64",
            Arch::X86 => "x86",
        }
    }

    /// Archive format Adoptium publishes for this OS.
    pub fn archive_extension(&self) -> &'static str {
        match self.os {
            Os::Windows => "zip",
            Os::Linux | Os::MacOs => "tar.gz",
        }
    }

    pub fn java_exe(&self) -> &'static str {
        match self.os {
            Os::Windows => "java.exe",
            Os::Linux | Os::MacOs => "java",
        }
    }
}

impl Os {
    fn adoptium(&self) -> &'static str {
        match self {
            Os::Windows => "windows",
            Os::Linux => "linux",
            Os::MacOs => "mac",
        }
    }
}

impl Arch {
    fn adoptium(&self) -> &'static str {
        match self {
            Arch::X64 => "x64",
            Arch::Arm64 => "aarch64",
            Arch::X86 => "x32",
        }
    }
}

impl fmt::Display for PlatformDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.adoptium_os(), self.adoptium_arch())
    }
}

impl FromStr for PlatformDescriptor {
    type Err = PrestarterError;

    /// Parses `linux-x64`, `mac-aarch64`, `windows-x86` and close variants.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (os_part, arch_part) = lower
            .split_once('-')
            .ok_or_else(|| PrestarterError::InvalidConfig(format!("invalid platform '{s}'")))?;
        let os = match os_part {
            "windows" | "win" => Os::Windows,
            "linux" => Os::Linux,
            "mac" | "macos" | "osx" => Os::MacOs,
            _ => return Err(unsupported(os_part, arch_part)),
        };
        let arch = match arch_part {
            "x64" | "x86_64" | "amd64" => Arch::X64,
            "arm64" | "aarch64" => Arch::Arm64,
            "x86" | "x32" | "i686" => Arch::X86,
            _ => return Err(unsupported(os_part, arch_part)),
        };
        Self::from_parts(os, arch)
    }
}

fn unsupported(os: &str, arch: &str) -> PrestarterError {
    PrestarterError::UnsupportedPlatform {
        os: os.to_string(),
        arch: arch.to_string(),
    }
}
