use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::cache::{InstalledRuntime, RuntimeCache};
use crate::core::composite::{AcquisitionPlan, AcquisitionResult, CompositeSource};
use crate::core::config::PrestarterConfig;
use crate::core::downloader::Downloader;
use crate::core::error::{ErrorKind, PrestarterError, PrestarterResult};
use crate::core::lock::InstallLock;
use crate::core::paths::{InstallPaths, Scope};
use crate::core::platform::PlatformDescriptor;
use crate::core::source::{AdoptiumSource, ComponentKind, RuntimeRequirement, UiRuntimeSource};

/// Asked at most once per `ensure`, only when something must be downloaded.
pub type ConfirmFn<'c> = dyn Fn(&AcquisitionPlan) -> bool + Send + Sync + 'c;

/// How many extra composite runs each transient failure class earns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub network: u32,
    pub unpack: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            network: 2,
            unpack: 1,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^attempt`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

/// Entry point: make sure a runtime matching a requirement is installed.
#[derive(Debug)]
pub struct AcquisitionOrchestrator<'a> {
    config: &'a PrestarterConfig,
    platform: PlatformDescriptor,
    composite: CompositeSource,
    paths: InstallPaths,
    retry: RetryPolicy,
}

impl<'a> AcquisitionOrchestrator<'a> {
    pub fn new(
        config: &'a PrestarterConfig,
        platform: PlatformDescriptor,
        composite: CompositeSource,
        paths: InstallPaths,
    ) -> Self {
        Self {
            config,
            platform,
            composite,
            paths,
            retry: RetryPolicy::default(),
        }
    }

    /// JDK from Adoptium followed by OpenJFX, rooted where the config says.
    pub fn from_config(
        config: &'a PrestarterConfig,
        platform: PlatformDescriptor,
        downloader: Downloader,
    ) -> PrestarterResult<Self> {
        let composite = CompositeSource::new(vec![
            Box::new(AdoptiumSource::from_config(config, downloader.clone())),
            Box::new(UiRuntimeSource::from_config(config, downloader)),
        ])?;
        Ok(Self::new(config, platform, composite, InstallPaths::from_config(config)))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn platform(&self) -> PlatformDescriptor {
        self.platform
    }

    pub fn paths(&self) -> &InstallPaths {
        &self.paths
    }

    /// The requirement the configuration asks for.
    pub fn configured_requirement(&self) -> RuntimeRequirement {
        RuntimeRequirement::new(ComponentKind::Jdk, self.config.java_version.clone(), self.platform)
    }

    pub async fn ensure_configured(
        &self,
        confirm: Option<&ConfirmFn<'_>>,
        cancel: &CancellationToken,
    ) -> AcquisitionResult {
        let requirement = self.configured_requirement();
        self.ensure(&requirement, self.config.scope(), confirm, cancel).await
    }

    /// Read-only view of the best committed record for `requirement`.
    pub async fn describe(
        &self,
        requirement: &RuntimeRequirement,
        scope: Scope,
    ) -> PrestarterResult<Option<InstalledRuntime>> {
        RuntimeCache::new(self.paths.root_for(scope)).lookup(requirement).await
    }

    #[instrument(skip(self, confirm, cancel), fields(kind = %requirement.kind, constraint = %requirement.constraint, scope = ?scope))]
    pub async fn ensure(
        &self,
        requirement: &RuntimeRequirement,
        scope: Scope,
        confirm: Option<&ConfirmFn<'_>>,
        cancel: &CancellationToken,
    ) -> AcquisitionResult {
        let plan = self.composite.plan(requirement);
        let cache = RuntimeCache::new(self.paths.root_for(scope));

        match cached(&cache, &plan).await {
            Ok(Some(records)) => {
                debug!("Every component of {} is already installed", plan);
                return AcquisitionResult::succeeded(records);
            }
            Ok(None) => {}
            Err(err) => return AcquisitionResult::failed(err),
        }

        if self.config.download_question_enabled {
            if let Some(confirm) = confirm {
                if !confirm(&plan) {
                    info!("Download of {} declined", plan);
                    return AcquisitionResult::failed(PrestarterError::UserDeclined);
                }
            }
        }

        let root = match self.paths.prepare(scope) {
            Ok(root) => root,
            Err(err) => return AcquisitionResult::failed(err),
        };
        let cache = RuntimeCache::new(&root);
        let _guard = match InstallLock::for_root(&root).acquire(cancel).await {
            Ok(guard) => guard,
            Err(err) => return AcquisitionResult::failed(err),
        };

        // Another process may have finished while we waited.
        match cached(&cache, &plan).await {
            Ok(Some(records)) => {
                info!("{} was installed by another process", plan);
                return AcquisitionResult::succeeded(records);
            }
            Ok(None) => {}
            Err(err) => return AcquisitionResult::failed(err),
        }

        self.acquire_with_retries(&plan, &root, &cache, cancel).await
    }

    async fn acquire_with_retries(
        &self,
        plan: &AcquisitionPlan,
        root: &Path,
        cache: &RuntimeCache,
        cancel: &CancellationToken,
    ) -> AcquisitionResult {
        let mut errors = Vec::new();
        let mut network_retries = 0_u32;
        let mut unpack_retries = 0_u32;
        let mut attempt = 0_u32;

        loop {
            let result = self.composite.acquire(plan, root, cancel).await;
            if result.success {
                // One manifest write for every member, or none of them.
                if let Err(err) = cache.record_all(&result.installed).await {
                    errors.push(err);
                    return AcquisitionResult {
                        errors,
                        ..AcquisitionResult::default()
                    };
                }
                info!("Installed {} into {:?}", plan, root);
                return result;
            }

            errors.extend(result.errors);
            let retry = match errors.last().map(PrestarterError::kind) {
                Some(ErrorKind::Network) if network_retries < self.retry.network => {
                    network_retries += 1;
                    true
                }
                Some(ErrorKind::Unpack) if unpack_retries < self.retry.unpack => {
                    unpack_retries += 1;
                    true
                }
                _ => false,
            };
            if !retry {
                break;
            }

            let delay = self.retry.backoff(attempt);
            attempt += 1;
            warn!(
                "Acquisition attempt {} failed, retrying in {:?}: {}",
                attempt,
                delay,
                errors.last().map(ToString::to_string).unwrap_or_default()
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    errors.push(PrestarterError::Cancelled);
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        AcquisitionResult {
            errors,
            ..AcquisitionResult::default()
        }
    }
}

/// Records for every plan item, or `None` when any is missing.
async fn cached(
    cache: &RuntimeCache,
    plan: &AcquisitionPlan,
) -> PrestarterResult<Option<Vec<InstalledRuntime>>> {
    let mut records = Vec::with_capacity(plan.items.len());
    for item in &plan.items {
        match cache.lookup(item).await? {
            Some(record) => records.push(record),
            None => return Ok(None),
        }
    }
    Ok(Some(records))
}
