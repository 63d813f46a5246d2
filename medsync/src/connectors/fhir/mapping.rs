//! FHIR resource → canonical record mapping.
//!
//! Mappers return `None` for resources that must not be imported: wrong
//! status, no usable value, no name or no calendar date. A resource without
//! a date is skipped instead of being stamped with today's date, which would
//! defeat the dedup key on the next sync.

use serde_json::Value;

use crate::database::models::{
    ConditionRecord, DiagnosticReportRecord, LabResultRecord, MedicationRecord, RecordCategory,
};
use crate::database::time::calendar_date;

pub const PROVIDER: &str = "Epic MyChart (FHIR)";

/// Statuses accepted for Observation and DiagnosticReport.
const REPORTABLE_STATUSES: &[&str] = &["final", "amended", "corrected"];
const SKIPPED_MEDICATION_STATUSES: &[&str] = &["entered-in-error", "cancelled", "draft"];
const SKIPPED_VERIFICATION_STATUSES: &[&str] = &["entered-in-error", "refuted"];
const ABNORMAL_FLAGS: &[&str] = &["H", "HH", "L", "LL", "A", "AA"];
const MAX_CONCLUSION_CHARS: usize = 500;

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// `text`, else the first coding's `display`.
fn concept_text(concept: &Value) -> Option<&str> {
    str_at(concept, "/text").or_else(|| str_at(concept, "/coding/0/display"))
}

/// Numbers print like the scraper prints them: `12.0` becomes `"12"`.
fn number_text(value: &Value) -> Option<String> {
    value.as_f64().map(|n| n.to_string())
}

fn has_status(resource: &Value, allowed: &[&str]) -> bool {
    str_at(resource, "/status").is_some_and(|s| allowed.contains(&s))
}

fn resource_id(resource: &Value) -> &str {
    str_at(resource, "/id").unwrap_or("unknown")
}

/// Observation value as display text plus its unit.
///
/// Prefers `valueQuantity`, then `valueString`, then `valueCodeableConcept`.
fn observation_value(obs: &Value) -> Option<(String, Option<String>)> {
    if let Some(quantity) = obs.get("valueQuantity")
        && let Some(value) = quantity.get("value").and_then(number_text)
    {
        let unit = str_at(quantity, "/unit")
            .or_else(|| str_at(quantity, "/code"))
            .map(str::to_string);
        return Some((value, unit));
    }
    if let Some(text) = str_at(obs, "/valueString") {
        return Some((text.to_string(), None));
    }
    obs.get("valueCodeableConcept")
        .and_then(concept_text)
        .map(|text| (text.to_string(), None))
}

fn observation_date(obs: &Value) -> Option<String> {
    ["/effectiveDateTime", "/effectivePeriod/start", "/issued"]
        .iter()
        .find_map(|p| str_at(obs, p))
        .and_then(calendar_date)
}

/// Map an Observation (lab, vital sign or ctDNA) to a result record.
pub fn map_observation(obs: &Value, category: RecordCategory) -> Option<LabResultRecord> {
    if !has_status(obs, REPORTABLE_STATUSES) {
        return None;
    }
    let test_name = obs.get("code").and_then(concept_text)?.to_string();
    let (value, unit) = observation_value(obs)?;
    let date = observation_date(obs)?;

    let result = match &unit {
        Some(unit) => format!("{value} {unit}"),
        None => value,
    };

    let mut notes = Vec::new();
    let low = obs.pointer("/referenceRange/0/low/value").and_then(number_text);
    let high = obs.pointer("/referenceRange/0/high/value").and_then(number_text);
    if let (Some(low), Some(high)) = (low, high) {
        match &unit {
            Some(unit) => notes.push(format!("Normal range: {low}-{high} {unit}")),
            None => notes.push(format!("Normal range: {low}-{high}")),
        }
    }
    if let Some(flag) = str_at(obs, "/interpretation/0/coding/0/code")
        && ABNORMAL_FLAGS.contains(&flag)
    {
        notes.push(format!("Flag: {flag}"));
    }
    notes.push(format!("Source: {PROVIDER}"));
    notes.push(format!("FHIR ID: {}", resource_id(obs)));

    Some(LabResultRecord {
        test_name,
        result,
        date,
        category,
        provider: Some(PROVIDER.to_string()),
        notes: Some(notes.join(". ")),
    })
}

/// Map an imaging or pathology DiagnosticReport.
pub fn map_diagnostic_report(
    report: &Value,
    category: RecordCategory,
) -> Option<DiagnosticReportRecord> {
    if !has_status(report, REPORTABLE_STATUSES) {
        return None;
    }
    let test_name = report.get("code").and_then(concept_text)?.to_string();
    let date = ["/effectiveDateTime", "/effectivePeriod/start", "/issued"]
        .iter()
        .find_map(|p| str_at(report, p))
        .and_then(calendar_date)?;

    let conclusion = str_at(report, "/conclusion")
        .or_else(|| str_at(report, "/presentedForm/0/title"))
        .unwrap_or("See full report");

    Some(DiagnosticReportRecord {
        test_name,
        result: conclusion.chars().take(MAX_CONCLUSION_CHARS).collect(),
        date,
        category,
        provider: Some(PROVIDER.to_string()),
        notes: Some(format!(
            "Category: {}. Source: {PROVIDER}. FHIR ID: {}",
            category,
            resource_id(report)
        )),
    })
}

pub fn map_medication_request(med: &Value) -> Option<MedicationRecord> {
    let status = str_at(med, "/status").unwrap_or("active");
    if SKIPPED_MEDICATION_STATUSES.contains(&status) {
        return None;
    }

    let medication_name = med
        .get("medicationCodeableConcept")
        .and_then(concept_text)
        .or_else(|| str_at(med, "/medicationReference/display"))?
        .to_string();
    let start_date = str_at(med, "/authoredOn").and_then(calendar_date)?;

    let dosage = str_at(med, "/dosageInstruction/0/text")
        .map(str::to_string)
        .or_else(|| {
            let quantity = med.pointer("/dosageInstruction/0/doseAndRate/0/doseQuantity")?;
            let value = quantity.get("value").and_then(number_text)?;
            Some(match str_at(quantity, "/unit") {
                Some(unit) => format!("{value} {unit}"),
                None => value,
            })
        });
    let frequency = str_at(med, "/dosageInstruction/0/timing/code/text").map(str::to_string);

    Some(MedicationRecord {
        medication_name,
        dosage,
        frequency,
        start_date,
        status: status.to_string(),
        notes: Some(format!("Source: {PROVIDER}. FHIR ID: {}", resource_id(med))),
    })
}

pub fn map_condition(condition: &Value) -> Option<ConditionRecord> {
    if str_at(condition, "/verificationStatus/coding/0/code")
        .is_some_and(|s| SKIPPED_VERIFICATION_STATUSES.contains(&s))
    {
        return None;
    }

    let name = condition.get("code").and_then(concept_text)?.to_string();
    let diagnosed_date = ["/onsetDateTime", "/onsetPeriod/start", "/recordedDate"]
        .iter()
        .find_map(|p| str_at(condition, p))
        .and_then(calendar_date)?;
    let status = match str_at(condition, "/clinicalStatus/coding/0/code") {
        Some("active" | "recurrence" | "relapse") => "active",
        _ => "inactive",
    };

    Some(ConditionRecord {
        name,
        diagnosed_date,
        status: status.to_string(),
        notes: Some(format!(
            "Source: {PROVIDER}. FHIR ID: {}",
            resource_id(condition)
        )),
    })
}
