//! Platform managers: environment-wide resources that must exist before
//! any node can be used and must be destroyed after the last node.

pub mod detect;
pub mod docker;
pub mod host;
pub mod images;
pub mod lxd;
pub mod mock;

use async_trait::async_trait;

use gauntlet_common::errors::Result;

/// An orchestrator for platform-wide resources (networks, images, profiles,
/// projects). The controller owns an ordered list of these; teardown is
/// strict LIFO over the entries whose setup completed.
#[async_trait]
pub trait PlatformManager: Send + Sync {
    /// True iff the suite supplied configuration for this platform.
    fn configured(&self) -> bool;

    /// Stable human label used in progress messages.
    fn name(&self) -> &str;

    /// Create all configured resources in declared order.
    async fn setup(&self) -> Result<()>;

    /// Remove resources in reverse conceptual order.
    async fn teardown(&self) -> Result<()>;
}
