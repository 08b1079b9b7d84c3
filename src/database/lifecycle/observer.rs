use crate::database::core::StorageHandle;

/// Application hook into the lifecycle
///
/// Each callback fires before the controller's own handling of the event and
/// receives the handle being opened. All methods default to no-ops.
pub trait LifecycleObserver: Send {
    fn on_open(&self, _handle: &dyn StorageHandle) {}

    fn on_create(&self, _handle: &dyn StorageHandle) {}

    fn on_upgrade(&self, _handle: &dyn StorageHandle, _old_version: u32, _new_version: u32) {}
}
