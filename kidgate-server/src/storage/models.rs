use crate::storage::schema::{blocked_apps, devices, screen_time_rules, usage_entries};
use chrono::{NaiveDateTime, NaiveTime};
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = devices)]
pub struct Device {
    pub id: i32,
    pub parent_id: String,
    pub identifier: String,
    pub nickname: Option<String>,
    pub last_sync: Option<NaiveDateTime>,
}

impl Device {
    /// Display label: nickname when the parent set one, raw identifier otherwise.
    pub fn label(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.identifier)
    }
}

#[derive(Insertable)]
#[diesel(table_name = devices)]
pub struct NewDevice<'a> {
    pub parent_id: &'a str,
    pub identifier: &'a str,
    pub nickname: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = usage_entries)]
#[diesel(belongs_to(Device, foreign_key = device_id))]
pub struct UsageEntry {
    pub id: i32,
    pub device_id: i32,
    pub app_name: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub duration_secs: i32,
}

#[derive(Insertable)]
#[diesel(table_name = usage_entries)]
pub struct NewUsageEntry<'a> {
    pub device_id: i32,
    pub app_name: &'a str,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub duration_secs: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = screen_time_rules)]
#[diesel(primary_key(device_id))]
#[diesel(belongs_to(Device, foreign_key = device_id))]
pub struct ScreenTimeRule {
    pub device_id: i32,
    pub daily_limit_minutes: i32,
    pub bedtime_start: Option<NaiveTime>,
    pub bedtime_end: Option<NaiveTime>,
}

#[derive(Insertable)]
#[diesel(table_name = screen_time_rules)]
pub struct NewScreenTimeRule {
    pub device_id: i32,
    pub daily_limit_minutes: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = blocked_apps)]
#[diesel(belongs_to(Device, foreign_key = device_id))]
pub struct BlockedApp {
    pub id: i32,
    pub device_id: i32,
    pub app_name: String,
    pub package_name: Option<String>,
    pub is_active: bool,
    pub note: Option<String>,
    pub blocked_by: String,
    pub blocked_at: NaiveDateTime,
    pub last_synced: Option<NaiveDateTime>,
}

impl BlockedApp {
    /// What the device enforces: package name when known, app name otherwise.
    pub fn enforcement_name(&self) -> &str {
        match self.package_name.as_deref().map(str::trim) {
            Some(pkg) if !pkg.is_empty() => pkg,
            _ => &self.app_name,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = blocked_apps)]
pub struct NewBlockedApp<'a> {
    pub device_id: i32,
    pub app_name: &'a str,
    pub package_name: Option<&'a str>,
    pub is_active: bool,
    pub note: Option<&'a str>,
    pub blocked_by: &'a str,
    pub blocked_at: NaiveDateTime,
}
