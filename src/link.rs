//! The link provider contract consumed by the migration protocol in
//! [`crate::orchestrator`].
//!
//! The core treats link selection as an opaque call against an injected
//! provider — it never binds sockets to a network interface itself.

use async_trait::async_trait;

/// Default network identity plus a way to prompt the user to switch it.
#[async_trait]
pub trait LinkProvider: Send + Sync {
    /// Returns the current default network id. `0` denotes unknown/none.
    async fn default_net_id(&self) -> u64;

    /// Opens the system's link-selection UI (or is a no-op in headless
    /// mode). Best-effort: returns `false` rather than raising when it
    /// cannot.
    async fn open_link_settings(&self) -> bool;
}

/// A [`LinkProvider`] for environments with no multi-network UI: the net id
/// never changes and settings can never be opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessLinkProvider;

#[async_trait]
impl LinkProvider for HeadlessLinkProvider {
    async fn default_net_id(&self) -> u64 {
        1
    }

    async fn open_link_settings(&self) -> bool {
        false
    }
}
