use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::API_V1_PREFIX;

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

pub fn devices(base: &str) -> String {
    base_join(base, &format!("{}/devices", API_V1_PREFIX))
}

pub fn sync_usage(base: &str) -> String {
    base_join(base, &format!("{}/sync/usage", API_V1_PREFIX))
}

pub fn device_usage(base: &str, device_id: &str) -> String {
    base_join(
        base,
        &format!("{}/devices/{}/usage", API_V1_PREFIX, enc(device_id)),
    )
}

pub fn device_report(base: &str, device_id: &str) -> String {
    base_join(
        base,
        &format!("{}/devices/{}/report", API_V1_PREFIX, enc(device_id)),
    )
}

pub fn device_rules(base: &str, device_id: &str) -> String {
    base_join(
        base,
        &format!("{}/devices/{}/rules", API_V1_PREFIX, enc(device_id)),
    )
}

pub fn device_blocked_apps(base: &str, device_id: &str) -> String {
    base_join(
        base,
        &format!("{}/devices/{}/blocked-apps", API_V1_PREFIX, enc(device_id)),
    )
}

pub fn device_unblock_app(base: &str, device_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/devices/{}/blocked-apps/unblock",
            API_V1_PREFIX,
            enc(device_id)
        ),
    )
}
