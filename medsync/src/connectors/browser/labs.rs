//! Lab report scraping.
//!
//! Labs → Lab Reports lists one sidebar link per report date. Each report
//! renders a results table with columns `expander | lab | result | normal
//! range | history`.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use super::driver::{NETWORK_IDLE_TIMEOUT, SELECTOR_TIMEOUT, soft_timeout};
use super::{BrowserError, BrowserPage, Locator};
use crate::database::models::{LabResultRecord, RecordCategory};
use crate::database::repositories::RecordStore;

pub const PROVIDER: &str = "CareSpace Portal";
const SOURCE: &str = "CareSpace";

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const REPORT_LINK_CSS: &str = "a.side-nav__item, aside a, .side-nav a";
const REPORT_LINK_PATTERN: &str = r"(January|February|March|April|May|June|July|August|September|October|November|December) \d{1,2}";
const HEADER_CSS: &str = r#"h1, h2, h3, [class*="header"]"#;
const HEADER_PATTERN: &str = "MONDAY|TUESDAY|WEDNESDAY|THURSDAY|FRIDAY|SATURDAY|SUNDAY";
const TABLE_CSS: &str = ".rt-tbody";
const ROW_CSS: &str = r#".rt-tbody .rt-tr[role="row"]"#;
const CELL_CSS: &str = ".rt-td";

static HEADER_DATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+) (\d{1,2}), (\d{4})").unwrap());
static VALUE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\d.]+").unwrap());
static RANGE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+)\s*[-–]\s*([\d.]+)\s*(.*)").unwrap());

/// Report date from a header like `"FRIDAY FEBRUARY 6, 2026"`.
pub fn parse_report_date(header: &str) -> Option<String> {
    let caps = HEADER_DATE_REGEX.captures(header)?;
    let month_name = caps[1].to_lowercase();
    let month = MONTHS.iter().position(|m| *m == month_name)? + 1;
    let day: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    let date = chrono::NaiveDate::from_ymd_opt(year, month as u32, day)?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// One parsed table row.
#[derive(Debug, Clone, PartialEq)]
pub struct LabRow {
    pub test_name: String,
    pub value: f64,
    pub unit: Option<String>,
    pub normal_low: Option<f64>,
    pub normal_high: Option<f64>,
}

impl LabRow {
    /// Parse the cells of one results row. Header rows and rows without a
    /// numeric result yield `None`.
    pub fn parse(cells: &[String]) -> Option<Self> {
        if cells.len() < 3 {
            return None;
        }
        let test_name = cells[1].trim();
        let result = cells[2].trim();
        if test_name.is_empty() || result.is_empty() {
            return None;
        }
        let lowered = test_name.to_lowercase();
        if lowered.contains("lab") || lowered.contains("test") {
            return None;
        }

        let value: f64 = VALUE_REGEX.find(result)?.as_str().parse().ok()?;

        let range = cells.get(3).map(|c| c.trim()).unwrap_or_default();
        let (normal_low, normal_high, unit) = match RANGE_REGEX.captures(range) {
            Some(caps) => (
                caps[1].parse().ok(),
                caps[2].parse().ok(),
                caps.get(3)
                    .map(|m| m.as_str().trim())
                    .filter(|u| !u.is_empty())
                    .map(str::to_string),
            ),
            None => (None, None, None),
        };

        Some(Self {
            test_name: test_name.to_string(),
            value,
            unit,
            normal_low,
            normal_high,
        })
    }

    /// Display result, e.g. `"13.3 g/dL LOW"`.
    pub fn display_result(&self) -> String {
        let mut result = match &self.unit {
            Some(unit) => format!("{} {unit}", self.value),
            None => self.value.to_string(),
        };
        if let (Some(low), Some(high)) = (self.normal_low, self.normal_high) {
            if self.value < low {
                result.push_str(" LOW");
            } else if self.value > high {
                result.push_str(" HIGH");
            }
        }
        result
    }

    pub fn into_record(self, date: &str) -> LabResultRecord {
        let notes = match (self.normal_low, self.normal_high) {
            (Some(low), Some(high)) => match &self.unit {
                Some(unit) => format!("Normal range: {low}-{high} {unit}. Source: {SOURCE}"),
                None => format!("Normal range: {low}-{high}. Source: {SOURCE}"),
            },
            _ => format!("Source: {SOURCE}"),
        };
        LabResultRecord {
            result: self.display_result(),
            test_name: self.test_name,
            date: date.to_string(),
            category: RecordCategory::Laboratory,
            provider: Some(PROVIDER.to_string()),
            notes: Some(notes),
        }
    }
}

/// Click a navigation control if present; a slow load is not an error.
async fn open_tab(page: &dyn BrowserPage, tab: &Locator) -> Result<(), BrowserError> {
    if page.count(tab).await? == 0 {
        debug!(tab = %tab, "Tab not present");
        return Ok(());
    }
    page.click(tab).await?;
    soft_timeout(page.wait_for_load(NETWORK_IDLE_TIMEOUT).await, "tab load")
}

/// Scrape up to `max_reports` lab reports and import new results.
///
/// Returns the number of rows that were not already stored.
pub async fn scrape_labs(
    page: &dyn BrowserPage,
    records: &dyn RecordStore,
    max_reports: usize,
) -> Result<u64, BrowserError> {
    open_tab(page, &Locator::text("a", r"^\s*Labs\s*$")).await?;
    open_tab(page, &Locator::text("a, button", r"^\s*Lab Reports\s*$")).await?;

    // Collect hrefs up front; clicking a report re-renders the sidebar.
    let links = Locator::text(REPORT_LINK_CSS, REPORT_LINK_PATTERN);
    let texts = page.texts(&links).await?;
    let hrefs = page.attributes(&links, "href").await?;
    let reports: Vec<(String, String)> = texts
        .into_iter()
        .zip(hrefs)
        .filter_map(|(text, href)| href.map(|h| (text, h)))
        .take(max_reports)
        .collect();

    if reports.is_empty() {
        info!("No lab reports found");
        return Ok(0);
    }
    info!(reports = reports.len(), max_reports, "Processing lab reports");

    let mut rows = Vec::new();
    for (index, (text, href)) in reports.iter().enumerate() {
        debug!(report = %text, index, "Opening lab report");

        if let Err(e) = page.click(&Locator::css(format!(r#"a[href="{href}"]"#))).await {
            warn!(report = %text, error = %e, "Failed to open lab report");
            continue;
        }
        soft_timeout(page.wait_for_load(NETWORK_IDLE_TIMEOUT).await, "report load")?;

        match page.wait_for(&Locator::css(TABLE_CSS), SELECTOR_TIMEOUT).await {
            Ok(()) => {}
            Err(e) if e.is_timeout() => {
                debug!(report = %text, "Results table not found, skipping");
                continue;
            }
            Err(e) => return Err(e),
        }

        let headers = page
            .texts(&Locator::text(HEADER_CSS, HEADER_PATTERN))
            .await?;
        let Some(date) = headers.first().and_then(|h| parse_report_date(h)) else {
            warn!(report = %text, "Could not parse report date, skipping");
            continue;
        };

        let before = rows.len();
        rows.extend(
            page.table_rows(ROW_CSS, CELL_CSS)
                .await?
                .iter()
                .filter_map(|cells| LabRow::parse(cells))
                .map(|row| row.into_record(&date)),
        );
        debug!(date = %date, values = rows.len() - before, "Extracted lab values");
    }

    let mut inserted = 0u64;
    for record in &rows {
        if records.insert_lab_result(record).await? {
            inserted += 1;
        }
    }
    info!(
        inserted,
        duplicates = rows.len() as u64 - inserted,
        "Lab results imported"
    );
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_report_date() {
        assert_eq!(
            parse_report_date("FRIDAY FEBRUARY 6, 2026").as_deref(),
            Some("2026-02-06")
        );
        assert_eq!(
            parse_report_date("Thursday January 30, 2025").as_deref(),
            Some("2025-01-30")
        );
        assert_eq!(parse_report_date("FRIDAY FEBRUARY 6"), None);
        assert_eq!(parse_report_date("FRIDAY SMARCH 6, 2026"), None);
        assert_eq!(parse_report_date("FRIDAY FEBRUARY 31, 2026"), None);
    }

    #[test]
    fn test_parse_row_with_range() {
        let row = LabRow::parse(&cells(&["", "WBC", "6.2", "4.2-10.0 x10^3/UL", ""])).unwrap();
        assert_eq!(row.test_name, "WBC");
        assert_eq!(row.value, 6.2);
        assert_eq!(row.normal_low, Some(4.2));
        assert_eq!(row.normal_high, Some(10.0));
        assert_eq!(row.unit.as_deref(), Some("x10^3/UL"));
        assert_eq!(row.display_result(), "6.2 x10^3/UL");
    }

    #[test]
    fn test_out_of_range_flags() {
        let low = LabRow::parse(&cells(&["", "Hgb", "11.1 Low", "13.5 – 17.5 g/dL"])).unwrap();
        assert_eq!(low.display_result(), "11.1 g/dL LOW");
        let high = LabRow::parse(&cells(&["", "Glucose", "140", "70-99 mg/dL"])).unwrap();
        assert_eq!(high.display_result(), "140 mg/dL HIGH");

        let record = high.into_record("2026-02-06");
        assert_eq!(record.result, "140 mg/dL HIGH");
        assert_eq!(
            record.notes.as_deref(),
            Some("Normal range: 70-99 mg/dL. Source: CareSpace")
        );
        assert_eq!(record.provider.as_deref(), Some(PROVIDER));
    }

    #[test]
    fn test_rows_skipped() {
        assert!(LabRow::parse(&cells(&["", "WBC"])).is_none());
        assert!(LabRow::parse(&cells(&["", "Lab", "Your result", "Normal range"])).is_none());
        assert!(LabRow::parse(&cells(&["", "Culture", "No growth", ""])).is_none());
        assert!(LabRow::parse(&cells(&["", "", "6.2", ""])).is_none());
    }

    #[test]
    fn test_row_without_range() {
        let row = LabRow::parse(&cells(&["", "eGFR", ">60", ""])).unwrap();
        assert_eq!(row.value, 60.0);
        assert_eq!(row.display_result(), "60");
        assert_eq!(
            row.into_record("2026-01-01").notes.as_deref(),
            Some("Source: CareSpace")
        );
    }
}
