//! Canonical clinical records produced by connectors.
//!
//! Each type carries its natural dedup key. The tables themselves are
//! shared with the rest of the application.

use serde::{Deserialize, Serialize};

/// `test_results.category` values written by connectors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum RecordCategory {
    #[strum(serialize = "laboratory")]
    #[serde(rename = "laboratory")]
    Laboratory,
    #[strum(serialize = "vital-signs")]
    #[serde(rename = "vital-signs")]
    VitalSigns,
    #[strum(serialize = "genomic")]
    #[serde(rename = "genomic")]
    Genomic,
    #[strum(serialize = "imaging")]
    #[serde(rename = "imaging")]
    Imaging,
    #[strum(serialize = "pathology")]
    #[serde(rename = "pathology")]
    Pathology,
}

impl RecordCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Laboratory => "laboratory",
            Self::VitalSigns => "vital-signs",
            Self::Genomic => "genomic",
            Self::Imaging => "imaging",
            Self::Pathology => "pathology",
        }
    }
}

/// A measured result: labs, vitals and ctDNA observations.
///
/// Dedup key: `(test_name, date, result)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResultRecord {
    pub test_name: String,
    /// Display value, e.g. `"1.1 mg/dL"` or `"12.0 g/dL (LOW)"`
    pub result: String,
    /// `YYYY-MM-DD`
    pub date: String,
    pub category: RecordCategory,
    pub provider: Option<String>,
    pub notes: Option<String>,
}

/// Imaging or pathology report.
///
/// Stored in `test_results` as well. Dedup key: `(category, test_name, date)`,
/// since the result text of a report is free-form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReportRecord {
    pub test_name: String,
    pub result: String,
    pub date: String,
    pub category: RecordCategory,
    pub provider: Option<String>,
    pub notes: Option<String>,
}

/// Dedup key: `(medication_name, start_date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationRecord {
    pub medication_name: String,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub start_date: String,
    pub status: String,
    pub notes: Option<String>,
}

/// Dedup key: `(name, diagnosed_date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRecord {
    pub name: String,
    pub diagnosed_date: String,
    pub status: String,
    pub notes: Option<String>,
}
