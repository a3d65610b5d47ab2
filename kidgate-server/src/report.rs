//! Usage report rendering: per-app/per-day rollups for the dashboard and the
//! exported document in its two encodings (CSV and a paginated plain-text
//! "printable" form). Storage keeps whole seconds; hours only appear here.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::storage::models::UsageEntry;

/// Per-app summary rows shown in the report header section.
pub const TOP_APPS: usize = 10;
/// Detail rows per printable page; keeps a page within one printed sheet.
pub const PRINTABLE_ROWS_PER_PAGE: usize = 35;

const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Seconds to hours, rounded to 2 decimals.
pub fn hours(total_seconds: i64) -> f64 {
    (total_seconds as f64 / 3600.0 * 100.0).round() / 100.0
}

/// Maps raw package identifiers to display names. The real mapping lives
/// outside this service; the server only carries a lookup table.
pub trait FriendlyNames {
    fn resolve<'a>(&'a self, package_or_app: &'a str) -> &'a str;
}

/// Config-driven mapping with a small builtin fallback for well-known
/// packages, then passthrough.
#[derive(Debug, Default, Clone)]
pub struct FriendlyNameMap {
    custom: HashMap<String, String>,
}

impl FriendlyNameMap {
    pub fn new(custom: HashMap<String, String>) -> Self {
        Self { custom }
    }
}

impl FriendlyNames for FriendlyNameMap {
    fn resolve<'a>(&'a self, key: &'a str) -> &'a str {
        if let Some(name) = self.custom.get(key) {
            return name;
        }
        builtin(key).unwrap_or(key)
    }
}

fn builtin(key: &str) -> Option<&'static str> {
    let name = match key {
        "com.whatsapp" => "WhatsApp",
        "com.facebook.katana" => "Facebook",
        "com.instagram.android" => "Instagram",
        "com.snapchat.android" => "Snapchat",
        "com.zhiliaoapp.musically" => "TikTok",
        "com.google.android.youtube" => "YouTube",
        "com.android.chrome" => "Chrome",
        "com.mojang.minecraftpe" => "Minecraft",
        "com.roblox.client" => "Roblox",
        "com.spotify.music" => "Spotify",
        _ => return None,
    };
    Some(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Csv,
    Printable,
}

impl ReportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "text/csv; charset=utf-8",
            ReportFormat::Printable => "text/plain; charset=utf-8",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ReportFormat::Csv),
            "printable" => Ok(ReportFormat::Printable),
            other => Err(format!("unknown report format: {other}")),
        }
    }
}

/// A report over one device's (possibly range-scoped) entries. The per-app
/// summary is derived from the same entry set as the detail log so the two
/// sections always agree.
pub struct Report<'a> {
    pub device_label: &'a str,
    pub generated_at: DateTime<Utc>,
    pub entries: &'a [UsageEntry],
}

impl Report<'_> {
    pub fn render(&self, format: ReportFormat, names: &dyn FriendlyNames) -> String {
        match format {
            ReportFormat::Csv => self.render_csv(names),
            ReportFormat::Printable => self.render_printable(names),
        }
    }

    /// Totals per app over this report's entries, largest first.
    fn per_app_totals(&self) -> Vec<(&str, i64)> {
        let mut totals = HashMap::<&str, i64>::new();
        for e in self.entries {
            *totals.entry(e.app_name.as_str()).or_insert(0) += e.duration_secs as i64;
        }
        let mut totals: Vec<(&str, i64)> = totals.into_iter().collect();
        totals.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        totals
    }

    fn render_csv(&self, names: &dyn FriendlyNames) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Device,{}", csv_field(self.device_label));
        let _ = writeln!(out, "Generated,{}", self.generated_at.to_rfc3339());
        out.push('\n');

        out.push_str("App,Total seconds,Total hours\n");
        for (app, total) in self.per_app_totals().into_iter().take(TOP_APPS) {
            let _ = writeln!(
                out,
                "{},{},{}",
                csv_field(names.resolve(app)),
                total,
                hours(total)
            );
        }
        out.push('\n');

        out.push_str("App,Start,End,Duration (s)\n");
        for e in self.entries {
            let _ = writeln!(
                out,
                "{},{},{},{}",
                csv_field(names.resolve(&e.app_name)),
                e.start_time.format(TIMESTAMP_FMT),
                e.end_time.format(TIMESTAMP_FMT),
                e.duration_secs
            );
        }
        out
    }

    fn render_printable(&self, names: &dyn FriendlyNames) -> String {
        let chunks: Vec<&[UsageEntry]> = if self.entries.is_empty() {
            vec![&[]]
        } else {
            self.entries.chunks(PRINTABLE_ROWS_PER_PAGE).collect()
        };
        let page_count = chunks.len();

        let mut pages = Vec::with_capacity(page_count);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut page = String::new();
            let _ = writeln!(page, "Usage report: {}", self.device_label);
            let _ = writeln!(
                page,
                "Generated: {}    Page {} of {}",
                self.generated_at.format(TIMESTAMP_FMT),
                i + 1,
                page_count
            );
            page.push('\n');

            if i == 0 {
                page.push_str("Top apps\n");
                let totals = self.per_app_totals();
                if totals.is_empty() {
                    page.push_str("  (no usage recorded)\n");
                }
                for (app, total) in totals.into_iter().take(TOP_APPS) {
                    let _ = writeln!(
                        page,
                        "  {:<28} {:>8}s {:>8.2}h",
                        names.resolve(app),
                        total,
                        hours(total)
                    );
                }
                page.push('\n');
            }

            let _ = writeln!(
                page,
                "{:<28} {:<19} {:<19} {:>8}",
                "App", "Start", "End", "Secs"
            );
            for e in chunk {
                let _ = writeln!(
                    page,
                    "{:<28} {:<19} {:<19} {:>8}",
                    names.resolve(&e.app_name),
                    e.start_time.format(TIMESTAMP_FMT),
                    e.end_time.format(TIMESTAMP_FMT),
                    e.duration_secs
                );
            }
            pages.push(page);
        }
        // Form feed between pages so a printer starts each on a fresh sheet.
        pages.join("\u{c}")
    }
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry(id: i32, app: &str, day: u32, hour: u32, secs: i32) -> UsageEntry {
        let start = NaiveDate::from_ymd_opt(2025, 5, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap();
        UsageEntry {
            id,
            device_id: 1,
            app_name: app.to_string(),
            start_time: start,
            end_time: start + chrono::Duration::seconds(secs as i64),
            duration_secs: secs,
        }
    }

    fn names() -> FriendlyNameMap {
        FriendlyNameMap::new(HashMap::from([(
            "com.example.game".to_string(),
            "Example Game".to_string(),
        )]))
    }

    #[test]
    fn hours_round_to_two_decimals() {
        assert_eq!(hours(300), 0.08);
        assert_eq!(hours(3600), 1.0);
        assert_eq!(hours(5430), 1.51);
        assert_eq!(hours(0), 0.0);
    }

    #[test]
    fn friendly_names_prefer_custom_then_builtin_then_passthrough() {
        let names = names();
        assert_eq!(names.resolve("com.example.game"), "Example Game");
        assert_eq!(names.resolve("com.whatsapp"), "WhatsApp");
        assert_eq!(names.resolve("org.unknown.app"), "org.unknown.app");
    }

    #[test]
    fn csv_contains_summary_and_detail_sections() {
        let entries = vec![
            entry(1, "chrome", 31, 10, 300),
            entry(2, "chrome", 31, 11, 120),
            entry(3, "maps", 31, 12, 60),
        ];
        let report = Report {
            device_label: "Alice's tablet",
            generated_at: Utc::now(),
            entries: &entries,
        };
        let csv = report.render(ReportFormat::Csv, &names());
        assert!(csv.starts_with("Device,Alice's tablet\n"));
        assert!(csv.contains("chrome,420,0.12\n"));
        assert!(csv.contains("maps,60,0.02\n"));
        assert!(csv.contains("chrome,2025-05-31 10:00:00,2025-05-31 10:05:00,300\n"));
    }

    #[test]
    fn csv_escapes_commas_and_quotes() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn printable_paginates_detail_rows() {
        let entries: Vec<UsageEntry> = (0..80)
            .map(|i| entry(i, "chrome", 1 + (i as u32 % 28), i as u32 % 24, 60))
            .collect();
        let report = Report {
            device_label: "tablet-7",
            generated_at: Utc::now(),
            entries: &entries,
        };
        let doc = report.render(ReportFormat::Printable, &names());
        // 80 rows at 35 per page = 3 pages, 2 form feeds.
        assert_eq!(doc.matches('\u{c}').count(), 2);
        assert!(doc.contains("Page 1 of 3"));
        assert!(doc.contains("Page 3 of 3"));
        // Summary appears on the first page only.
        assert_eq!(doc.matches("Top apps").count(), 1);
    }

    #[test]
    fn empty_report_is_a_single_page() {
        let report = Report {
            device_label: "tablet-7",
            generated_at: Utc::now(),
            entries: &[],
        };
        let doc = report.render(ReportFormat::Printable, &names());
        assert_eq!(doc.matches('\u{c}').count(), 0);
        assert!(doc.contains("(no usage recorded)"));
    }

    #[test]
    fn format_parsing() {
        assert_eq!("csv".parse::<ReportFormat>().unwrap(), ReportFormat::Csv);
        assert_eq!(
            "Printable".parse::<ReportFormat>().unwrap(),
            ReportFormat::Printable
        );
        assert!("pdf".parse::<ReportFormat>().is_err());
    }
}
