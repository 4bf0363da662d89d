//! In-memory `RuntimeSource` used by the composite and orchestrator tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::error::{PrestarterError, PrestarterResult};
use crate::core::platform::{Arch, Os, PlatformDescriptor};
use crate::core::source::{
    read_receipt, write_receipt, ComponentKind, ComponentReceipt, FetchOutcome, ResolvedBuild,
    RuntimeRequirement, RuntimeSource,
};
use crate::core::version::VersionConstraint;

/// Scripted failure for the next fetch call.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Network,
    Unpack,
    Integrity,
    NoMatch,
}

#[derive(Debug, Default)]
struct Counters {
    resolves: AtomicUsize,
    fetch_calls: AtomicUsize,
    downloads: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct FakeSource {
    kind: ComponentKind,
    version: String,
    steps: Arc<Mutex<VecDeque<Step>>>,
    counters: Arc<Counters>,
    delay: Duration,
}

impl FakeSource {
    pub fn new(kind: ComponentKind, version: &str) -> Self {
        Self {
            kind,
            version: version.to_string(),
            steps: Arc::new(Mutex::new(VecDeque::new())),
            counters: Arc::new(Counters::default()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_fetch_steps(self, steps: Vec<Step>) -> Self {
        *self.steps.lock().unwrap() = steps.into();
        self
    }

    /// Time spent "downloading" on every real install.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn resolves(&self) -> usize {
        self.counters.resolves.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.counters.fetch_calls.load(Ordering::SeqCst)
    }

    /// Fetches that actually wrote an install.
    pub fn fetches(&self) -> usize {
        self.counters.downloads.load(Ordering::SeqCst)
    }

    fn checksum(&self) -> String {
        format!("{}-{}", self.kind, self.version).replace(['.', '+'], "_")
    }

    fn failure(&self, step: Step) -> PrestarterError {
        match step {
            Step::Network => PrestarterError::DownloadFailed {
                url: format!("http://fake/{}", self.kind),
                status: 503,
            },
            Step::Unpack => PrestarterError::Unpack {
                archive: PathBuf::from("fake.zip"),
                reason: "truncated".into(),
            },
            Step::Integrity => PrestarterError::ChecksumMismatch {
                path: PathBuf::from("fake.zip"),
                expected: self.checksum(),
                actual: "0000".into(),
            },
            Step::NoMatch => PrestarterError::NoMatchingBuild {
                kind: self.kind.to_string(),
                constraint: "*".into(),
                platform: "linux-x64".into(),
            },
        }
    }
}

#[async_trait]
impl RuntimeSource for FakeSource {
    fn name(&self) -> &str {
        match self.kind {
            ComponentKind::Jdk => "fake-jdk",
            ComponentKind::UiRuntime => "fake-ui",
        }
    }

    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn install_dir(&self, destination: &Path) -> PathBuf {
        match self.kind {
            ComponentKind::Jdk => destination.join("java"),
            ComponentKind::UiRuntime => destination.join("javafx"),
        }
    }

    async fn resolve(
        &self,
        requirement: &RuntimeRequirement,
        _cancel: &CancellationToken,
    ) -> PrestarterResult<ResolvedBuild> {
        self.counters.resolves.fetch_add(1, Ordering::SeqCst);
        Ok(ResolvedBuild {
            kind: self.kind,
            version: self.version.clone(),
            download_url: format!("http://fake/{}/{}", self.kind, self.version),
            checksum: self.checksum(),
            archive_name: format!("{}.zip", self.kind),
            size: None,
            source: self.name().to_string(),
            platform: requirement.platform,
        })
    }

    async fn fetch(
        &self,
        build: &ResolvedBuild,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> PrestarterResult<FetchOutcome> {
        self.counters.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let install_dir = self.install_dir(destination);
        if let Some(receipt) = read_receipt(&install_dir, self.kind) {
            if receipt.matches(build) {
                return Ok(FetchOutcome::AlreadyPresent { path: install_dir });
            }
        }

        let step = self.steps.lock().unwrap().pop_front();
        if let Some(step) = step {
            return Err(self.failure(step));
        }

        if !self.delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PrestarterError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        tokio::fs::create_dir_all(install_dir.join("bin")).await?;
        tokio::fs::write(install_dir.join("bin").join(self.name()), b"payload").await?;
        write_receipt(&install_dir, &ComponentReceipt::for_build(build)).await?;
        self.counters.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(FetchOutcome::Downloaded { path: install_dir })
    }
}

pub fn linux_x64() -> PlatformDescriptor {
    PlatformDescriptor::from_parts(Os::Linux, Arch::X64).unwrap()
}

pub fn jdk_requirement(constraint: &str) -> RuntimeRequirement {
    RuntimeRequirement::new(
        ComponentKind::Jdk,
        VersionConstraint::parse(constraint).unwrap(),
        linux_x64(),
    )
}
