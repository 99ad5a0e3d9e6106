//! Wiring of all services from a validated [`VistaConfig`].

use std::sync::Arc;

use crate::broadcast::BroadcastHub;
use crate::build::BuildService;
use crate::capability::CapabilityService;
use crate::config::VistaConfig;
use crate::containment::ProjectRoot;
use crate::error::{Result, VistaError};
use crate::store::fs::FsArtifactStore;
use crate::vcs::VcsService;

/// Every Vista service, sharing one project root.
pub struct Services {
    pub root: ProjectRoot,
    pub builds: BuildService,
    pub capabilities: CapabilityService,
    pub vcs: VcsService,
    pub hub: BroadcastHub,
}

impl Services {
    /// Build the service graph. `hub` is passed in so the caller can install
    /// its tracing layer before anything logs.
    pub fn from_config(config: &VistaConfig, hub: BroadcastHub) -> Result<Self> {
        let root = ProjectRoot::new(&config.project_root)?;
        let store = FsArtifactStore::new(&config.artifact_dir).map_err(|e| {
            VistaError::Internal(format!(
                "artifact dir {}: {e}",
                config.artifact_dir.display()
            ))
        })?;
        let vcs = VcsService::new(root.clone(), config.git_binary.clone(), config.vcs_timeout);
        let builds = BuildService::new(root.clone(), Arc::new(store), &config.public_base);
        let capabilities = CapabilityService::new(
            root.clone(),
            config.signing_secret.clone(),
            vcs.clone(),
            config.capability_ttl,
            &config.public_base,
        );
        Ok(Self {
            root,
            builds,
            capabilities,
            vcs,
            hub,
        })
    }
}
