use serde::{Deserialize, Serialize};

pub mod endpoints;

pub const API_V1_PREFIX: &str = "/api/v1";

// Device registration
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterDeviceReq {
    pub device_id: String,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegisterStatus {
    Created,
    AlreadyRegistered,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterDeviceResp {
    pub status: RegisterStatus,
    pub device_id: String,
}

// Usage sync: batch of observed foreground intervals.
//
// `usage_data` stays an untyped value on purpose: the server must reject a
// non-array wholesale with 400 but tolerate malformed individual elements,
// skipping them entry by entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncUsageReq {
    pub device_id: String,
    pub usage_data: serde_json::Value,
}

/// A well-formed entry, for clients constructing a sync batch.
/// Timestamps are RFC 3339; a trailing `Z` is accepted as UTC shorthand.
#[derive(Debug, Serialize, Deserialize)]
pub struct UsageEntryDto {
    pub app_name: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncUsageResp {
    pub status: String, // always "synced" on success
    pub total_entries: usize,
    pub valid_entries: usize,
    pub skipped_entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_errors: Option<usize>,
}

// Usage summary (dashboard charts)
#[derive(Debug, Serialize, Deserialize)]
pub struct AppTotalDto {
    pub app_name: String,
    pub total_seconds: i64,
    /// Rounded to 2 decimals at the presentation boundary.
    pub hours: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DayTotalDto {
    pub date: String, // YYYY-MM-DD, calendar date of start_time (UTC)
    pub total_seconds: i64,
    pub hours: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsageSummaryDto {
    pub device_id: String,
    pub per_app: Vec<AppTotalDto>,
    pub per_day: Vec<DayTotalDto>,
}

// Screen-time rules
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct RuleReq {
    /// Number or numeric string; out-of-range or unparseable values keep the
    /// previously stored limit.
    pub daily_limit_minutes: Option<serde_json::Value>,
    /// `HH:MM` or `HH:MM:SS`; omitted fields keep their stored value.
    pub bedtime_start: Option<String>,
    pub bedtime_end: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RuleDto {
    pub device_id: String,
    pub daily_limit_minutes: i32,
    pub bedtime_start: Option<String>, // HH:MM:SS
    pub bedtime_end: Option<String>,
}

// Blocked apps
#[derive(Debug, Serialize, Deserialize)]
pub struct BlockAppReq {
    pub app_name: String,
    pub package_name: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Blocked,
    AlreadyBlocked,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockAppResp {
    pub status: BlockStatus,
    pub app_id: i32,
    pub app_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnblockAppReq {
    pub app_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnblockStatus {
    Unblocked,
    NotBlocked,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnblockAppResp {
    pub status: UnblockStatus,
    pub deactivated: usize,
}

/// Enforcement list for the device poller. Entries are package names where
/// known, app names otherwise.
#[derive(Debug, Serialize, Deserialize)]
pub struct BlockedAppsDto {
    pub device_id: String,
    pub blocked_apps: Vec<String>,
    pub total_count: usize,
    pub synced_at: String, // RFC3339 UTC
}
