use std::fmt;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::cache::InstalledRuntime;
use crate::core::error::{ErrorKind, PrestarterError, PrestarterResult};
use crate::core::source::{read_receipt, ComponentReceipt, FetchOutcome, RuntimeRequirement, RuntimeSource};

/// Requirements one acquisition will satisfy, in member order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionPlan {
    pub items: Vec<RuntimeRequirement>,
}

impl AcquisitionPlan {
    pub fn primary(&self) -> Option<&RuntimeRequirement> {
        self.items.first()
    }
}

impl fmt::Display for AcquisitionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .items
            .iter()
            .map(|item| format!("{} {}", item.kind, item.constraint))
            .collect();
        write!(f, "{}", parts.join(" + "))?;
        if let Some(primary) = self.primary() {
            write!(f, " for {}", primary.platform)?;
        }
        Ok(())
    }
}

/// Outcome of one acquisition. Either every component is installed or none
/// is reported.
#[derive(Debug, Default)]
pub struct AcquisitionResult {
    pub success: bool,
    pub installed_paths: Vec<PathBuf>,
    pub installed: Vec<InstalledRuntime>,
    pub errors: Vec<PrestarterError>,
}

impl AcquisitionResult {
    pub fn succeeded(installed: Vec<InstalledRuntime>) -> Self {
        Self {
            success: true,
            installed_paths: installed.iter().map(|r| r.install_path.clone()).collect(),
            installed,
            errors: Vec::new(),
        }
    }

    pub fn failed(error: PrestarterError) -> Self {
        Self {
            errors: vec![error],
            ..Self::default()
        }
    }

    pub fn last_error(&self) -> Option<&PrestarterError> {
        self.errors.last()
    }

    pub fn is_declined(&self) -> bool {
        self.last_error().map(|e| e.kind()) == Some(ErrorKind::UserDeclined)
    }

    pub fn is_cancelled(&self) -> bool {
        self.last_error().map(|e| e.kind()) == Some(ErrorKind::Cancelled)
    }
}

/// Ordered, non-empty set of sources installed together into one root.
pub struct CompositeSource {
    members: Vec<Box<dyn RuntimeSource>>,
}

impl fmt::Debug for CompositeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.members.iter().map(|m| m.name()).collect();
        f.debug_struct("CompositeSource").field("members", &names).finish()
    }
}

impl CompositeSource {
    pub fn new(members: Vec<Box<dyn RuntimeSource>>) -> PrestarterResult<Self> {
        if members.is_empty() {
            return Err(PrestarterError::InvalidConfig(
                "a composite source needs at least one member".into(),
            ));
        }
        Ok(Self { members })
    }

    pub fn members(&self) -> &[Box<dyn RuntimeSource>] {
        &self.members
    }

    pub fn plan(&self, primary: &RuntimeRequirement) -> AcquisitionPlan {
        AcquisitionPlan {
            items: self
                .members
                .iter()
                .map(|member| member.requirement_for(primary))
                .collect(),
        }
    }

    /// Resolve and fetch every member in order into `destination`. The first
    /// failure stops the sequence; files already written stay on disk.
    #[instrument(skip(self, plan, cancel), fields(plan = %plan))]
    pub async fn acquire(
        &self,
        plan: &AcquisitionPlan,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> AcquisitionResult {
        if plan.items.len() != self.members.len() {
            return AcquisitionResult::failed(PrestarterError::InvalidConfig(format!(
                "plan has {} items for {} sources",
                plan.items.len(),
                self.members.len()
            )));
        }

        let mut installed = Vec::with_capacity(self.members.len());
        for (member, requirement) in self.members.iter().zip(&plan.items) {
            if cancel.is_cancelled() {
                return AcquisitionResult::failed(PrestarterError::Cancelled);
            }
            match acquire_member(member.as_ref(), requirement, destination, cancel).await {
                Ok(record) => installed.push(record),
                Err(err) => {
                    warn!("{} failed, aborting acquisition: {}", member.name(), err);
                    return AcquisitionResult::failed(err);
                }
            }
        }

        AcquisitionResult::succeeded(installed)
    }
}

async fn acquire_member(
    member: &dyn RuntimeSource,
    requirement: &RuntimeRequirement,
    destination: &Path,
    cancel: &CancellationToken,
) -> PrestarterResult<InstalledRuntime> {
    match resolve_and_fetch(member, requirement, destination, cancel).await {
        Err(err) if err.kind() == ErrorKind::Integrity => {
            warn!("{}: {}; resolving again", member.name(), err);
            resolve_and_fetch(member, requirement, destination, cancel).await
        }
        other => other,
    }
}

async fn resolve_and_fetch(
    member: &dyn RuntimeSource,
    requirement: &RuntimeRequirement,
    destination: &Path,
    cancel: &CancellationToken,
) -> PrestarterResult<InstalledRuntime> {
    let build = member.resolve(requirement, cancel).await?;
    let outcome = member.fetch(&build, destination, cancel).await?;
    if let FetchOutcome::Downloaded { path } = &outcome {
        info!("Installed {} {} into {:?}", build.kind, build.version, path);
    }

    let path = outcome.path().to_path_buf();
    let receipt = read_receipt(&path, build.kind)
        .filter(|receipt| receipt.matches(&build))
        .unwrap_or_else(|| ComponentReceipt::for_build(&build));
    Ok(InstalledRuntime::from_receipt(receipt, path))
}
