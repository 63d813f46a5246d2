//! Epic MyChart sync over SMART on FHIR.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use super::SmartFhirClient;
use super::mapping::{
    PROVIDER, map_condition, map_diagnostic_report, map_medication_request, map_observation,
};
use crate::credentials::{PortalCredential, PortalType};
use crate::database::models::RecordCategory;
use crate::database::repositories::RecordStore;
use crate::sync::{ConnectorResult, PortalConnector, SummaryStatus, SyncError, SyncSummary};
use crate::vault::VaultKey;

/// LOINC code for circulating tumor DNA (Signatera) results.
pub const CTDNA_LOINC: &str = "96603-3";

/// Sections reported with a zero count until they have an importer.
/// DocumentReference stays in the requested scopes for the notes importer.
const NOT_IMPLEMENTED: &[&str] = &["clinicalNotes"];

/// Which mapper and table a search feeds.
#[derive(Debug, Clone, Copy)]
enum Target {
    Observation(RecordCategory),
    Report(RecordCategory),
    Medication,
    Condition,
}

/// One patient-scoped search: summary key, query and target.
struct Search {
    detail: &'static str,
    query: String,
    target: Target,
}

fn searches(patient_id: &str) -> Vec<Search> {
    let patient_id = urlencoding::encode(patient_id);
    let search = |detail, query: String, target| Search {
        detail,
        query,
        target,
    };
    vec![
        search(
            "labResults",
            format!("Observation?patient={patient_id}&category=laboratory"),
            Target::Observation(RecordCategory::Laboratory),
        ),
        search(
            "vitals",
            format!("Observation?patient={patient_id}&category=vital-signs"),
            Target::Observation(RecordCategory::VitalSigns),
        ),
        search(
            "signateraReports",
            format!("Observation?patient={patient_id}&code={CTDNA_LOINC}"),
            Target::Observation(RecordCategory::Genomic),
        ),
        search(
            "imagingReports",
            format!("DiagnosticReport?patient={patient_id}&category=RAD"),
            Target::Report(RecordCategory::Imaging),
        ),
        search(
            "pathologyReports",
            format!("DiagnosticReport?patient={patient_id}&category=PAT"),
            Target::Report(RecordCategory::Pathology),
        ),
        search(
            "medications",
            format!("MedicationRequest?patient={patient_id}&status=active"),
            Target::Medication,
        ),
        search(
            "conditions",
            format!("Condition?patient={patient_id}"),
            Target::Condition,
        ),
    ]
}

pub struct FhirConnector {
    client: Arc<SmartFhirClient>,
    records: Arc<dyn RecordStore>,
}

impl FhirConnector {
    pub fn new(client: Arc<SmartFhirClient>, records: Arc<dyn RecordStore>) -> Self {
        Self { client, records }
    }

    /// Map and insert one resource. Returns `true` if a new row was stored.
    async fn import(&self, resource: &Value, target: Target) -> Result<bool, SyncError> {
        let inserted = match target {
            Target::Observation(category) => match map_observation(resource, category) {
                Some(record) => self.records.insert_lab_result(&record).await?,
                None => false,
            },
            Target::Report(category) => match map_diagnostic_report(resource, category) {
                Some(record) => self.records.insert_diagnostic_report(&record).await?,
                None => false,
            },
            Target::Medication => match map_medication_request(resource) {
                Some(record) => self.records.insert_medication(&record).await?,
                None => false,
            },
            Target::Condition => match map_condition(resource) {
                Some(record) => self.records.insert_condition(&record).await?,
                None => false,
            },
        };
        Ok(inserted)
    }
}

#[async_trait]
impl PortalConnector for FhirConnector {
    fn portal_type(&self) -> PortalType {
        PortalType::Epic
    }

    fn label(&self) -> &'static str {
        PROVIDER
    }

    #[instrument(skip_all, fields(credential_id = %credential.id))]
    async fn sync(
        &self,
        credential: &PortalCredential,
        key: &VaultKey,
    ) -> Result<ConnectorResult, SyncError> {
        let token = self
            .client
            .get_valid_access_token(&credential.id, key)
            .await?;

        let mut summary = SyncSummary::new(PROVIDER, SummaryStatus::Success, String::new());
        let mut total = 0u64;

        for search in searches(&token.patient_id) {
            let resources = self
                .client
                .fetch_all_pages(&token.access_token, &search.query)
                .await?;

            let mut imported = 0u64;
            for resource in &resources {
                if self.import(resource, search.target).await? {
                    imported += 1;
                }
            }
            debug!(
                section = search.detail,
                fetched = resources.len(),
                imported,
                "FHIR search imported"
            );

            total += imported;
            summary = summary.with_detail(search.detail, imported);
        }

        for section in NOT_IMPLEMENTED {
            summary = summary.with_detail(section, 0);
        }
        summary = summary.with_detail("notImplemented", json!(NOT_IMPLEMENTED));
        summary.message = format!("Successfully synced {total} records via FHIR API");
        info!(records = total, "FHIR sync complete");
        Ok(ConnectorResult {
            records_imported: total,
            summary,
        })
    }
}
