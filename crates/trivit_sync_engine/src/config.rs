//! Configuration for the sync engines.

use trivit_sync_protocol::DEFAULT_TITLE;

/// Configuration for one replica's sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Name used in log output.
    pub device_name: String,
    /// Re-activate the session automatically after it deactivates.
    pub auto_reactivate: bool,
    /// Sync when activation completes with the peer already reachable.
    pub sync_on_activation: bool,
    /// Sync whenever the peer becomes reachable.
    pub sync_on_reachable: bool,
    /// Title for counters created without one.
    pub default_title: String,
    /// Collapsed flag for newly created counters.
    pub default_collapsed: bool,
}

impl SyncConfig {
    /// Creates a configuration with default behavior.
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            auto_reactivate: true,
            sync_on_activation: true,
            sync_on_reachable: true,
            default_title: DEFAULT_TITLE.to_string(),
            default_collapsed: true,
        }
    }

    /// Sets automatic re-activation.
    pub fn with_auto_reactivate(mut self, enabled: bool) -> Self {
        self.auto_reactivate = enabled;
        self
    }

    /// Sets whether activation triggers a sync.
    pub fn with_sync_on_activation(mut self, enabled: bool) -> Self {
        self.sync_on_activation = enabled;
        self
    }

    /// Sets whether reconnecting triggers a sync.
    pub fn with_sync_on_reachable(mut self, enabled: bool) -> Self {
        self.sync_on_reachable = enabled;
        self
    }

    /// Sets the title for untitled counters.
    pub fn with_default_title(mut self, title: impl Into<String>) -> Self {
        self.default_title = title.into();
        self
    }

    /// Sets the collapsed flag for new counters.
    pub fn with_default_collapsed(mut self, collapsed: bool) -> Self {
        self.default_collapsed = collapsed;
        self
    }

    /// Returns `title`, or the default title if it is blank.
    pub(crate) fn title_or_default(&self, title: String) -> String {
        if title.trim().is_empty() {
            self.default_title.clone()
        } else {
            title
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("device")
    }
}
