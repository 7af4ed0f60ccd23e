//! Target Provider collaborator contract (spec §4.1).

use crate::target::TargetList;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// A no-argument notification hint. The receiver re-reads `current_targets`
/// on its own schedule; the listener carries no payload.
pub type ChangeListener = Box<dyn Fn() + Send + Sync>;

/// Supplies the current authoritative list of candidate targets and notifies
/// subscribers when it believes that list has changed.
#[async_trait]
pub trait TargetProvider: Send + Sync {
    /// Returns a snapshot. Must be callable concurrently with itself.
    async fn current_targets(&self) -> TargetList;

    /// Registers a listener invoked when the provider's list may have changed.
    fn subscribe(&self, listener: ChangeListener);
}

/// A fixed target list. Never fires its listener after the initial
/// subscription, per spec §4.1.
pub struct StaticTargetProvider {
    targets: TargetList,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl StaticTargetProvider {
    pub fn new(targets: TargetList) -> Self {
        Self {
            targets,
            listeners: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TargetProvider for StaticTargetProvider {
    async fn current_targets(&self) -> TargetList {
        self.targets.clone()
    }

    fn subscribe(&self, listener: ChangeListener) {
        // Registered but never invoked: the list is fixed for the provider's lifetime.
        self.listeners.write().push(listener);
    }
}

/// A provider whose list can be replaced at runtime, firing subscribed
/// listeners on each replacement. Useful for tests and for wrapping a
/// dynamic discovery source that doesn't itself speak this trait.
pub struct DynamicTargetProvider {
    targets: Arc<RwLock<TargetList>>,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl DynamicTargetProvider {
    pub fn new(initial: TargetList) -> Self {
        Self {
            targets: Arc::new(RwLock::new(initial)),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Replaces the list and fans out the change hint to every listener.
    pub fn set_targets(&self, targets: TargetList) {
        *self.targets.write() = targets;
        for listener in self.listeners.read().iter() {
            listener();
        }
    }
}

#[async_trait]
impl TargetProvider for DynamicTargetProvider {
    async fn current_targets(&self) -> TargetList {
        self.targets.read().clone()
    }

    fn subscribe(&self, listener: ChangeListener) {
        self.listeners.write().push(listener);
    }
}
