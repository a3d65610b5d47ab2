//! Device push dispatch stub. Real delivery belongs to an external push
//! service; the devices poll anyway, so the server only records that a
//! trigger would have fired.

pub fn device_sync_trigger(device_id: &str, action: &str, app_name: &str) {
    tracing::info!(device_id, action, app_name, "push: sync trigger (log-only)");
}
