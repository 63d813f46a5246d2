//! Portal sync through browser automation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};

use super::detector::{PortalProfile, Section};
use super::labs::scrape_labs;
use super::login::{LoginFlow, LoginOutcome};
use super::{BrowserError, BrowserLauncher, BrowserPage, SessionCache};
use crate::credentials::{PortalCredential, PortalType};
use crate::database::repositories::RecordStore;
use crate::sync::{ConnectorResult, PortalConnector, SummaryStatus, SyncError, SyncSummary};
use crate::vault::VaultKey;

/// Result of one section routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionOutcome {
    Imported(u64),
    /// No scraper exists for this section yet.
    NotImplemented,
}

pub struct BrowserConnector {
    portal_type: PortalType,
    profile: PortalProfile,
    launcher: Arc<dyn BrowserLauncher>,
    records: Arc<dyn RecordStore>,
    cache: SessionCache,
    max_lab_reports: usize,
}

impl BrowserConnector {
    pub fn new(
        portal_type: PortalType,
        launcher: Arc<dyn BrowserLauncher>,
        records: Arc<dyn RecordStore>,
        cache: SessionCache,
        max_lab_reports: usize,
    ) -> Self {
        Self {
            portal_type,
            profile: PortalProfile::for_portal(portal_type),
            launcher,
            records,
            cache,
            max_lab_reports,
        }
    }

    pub fn profile(&self) -> &PortalProfile {
        &self.profile
    }

    async fn run_section(
        &self,
        section: Section,
        page: &dyn BrowserPage,
    ) -> Result<SectionOutcome, BrowserError> {
        match section {
            Section::Labs => scrape_labs(page, self.records.as_ref(), self.max_lab_reports)
                .await
                .map(SectionOutcome::Imported),
            Section::Imaging | Section::Pathology | Section::ClinicalNotes | Section::Medications => {
                Ok(SectionOutcome::NotImplemented)
            }
        }
    }

    /// Everything between launch and close.
    async fn run(
        &self,
        page: &dyn BrowserPage,
        credential: &PortalCredential,
        entry_url: &str,
    ) -> Result<ConnectorResult, SyncError> {
        let outcome = LoginFlow::new(page, &self.profile, &self.cache, credential, entry_url)
            .run()
            .await?;
        if outcome == LoginOutcome::MfaRequired {
            return Ok(self.mfa_required());
        }

        let mut details = serde_json::Map::new();
        let mut errors = Vec::new();
        let mut not_implemented = Vec::new();
        let mut total = 0u64;

        // Sections fail independently.
        for &section in &self.profile.sections {
            let imported = match self.run_section(section, page).await {
                Ok(SectionOutcome::Imported(count)) => {
                    debug!(section = section.detail_key(), records = count, "Section scraped");
                    count
                }
                Ok(SectionOutcome::NotImplemented) => {
                    debug!(section = section.detail_key(), "Section not implemented");
                    not_implemented.push(section.detail_key());
                    0
                }
                Err(e) => {
                    error!(section = section.detail_key(), error = %e, "Section failed");
                    errors.push(format!("{}: {e}", section.label()));
                    0
                }
            };
            total += imported;
            details.insert(section.detail_key().to_string(), json!(imported));
        }
        details.insert("notImplemented".to_string(), json!(not_implemented));

        let (status, message) = if errors.is_empty() {
            (SummaryStatus::Success, "All sections scraped successfully".to_string())
        } else {
            (
                SummaryStatus::PartialSuccess,
                format!("Completed with {} errors", errors.len()),
            )
        };

        let mut summary = SyncSummary::new(self.profile.label, status, message);
        summary.details = details;
        summary.errors = errors;
        Ok(ConnectorResult {
            records_imported: total,
            summary,
        })
    }

    fn mfa_required(&self) -> ConnectorResult {
        let summary = SyncSummary::new(
            self.profile.label,
            SummaryStatus::MfaRequired,
            "Multi-factor authentication detected. Manual intervention needed for first sync.",
        )
        .with_detail(
            "mfaInstructions",
            Value::from(vec![
                "Complete the verification step in a browser",
                "Then sync again to reuse the signed-in session",
            ]),
        );
        ConnectorResult {
            records_imported: 0,
            summary,
        }
    }
}

#[async_trait]
impl PortalConnector for BrowserConnector {
    fn portal_type(&self) -> PortalType {
        self.portal_type
    }

    fn label(&self) -> &'static str {
        self.profile.label
    }

    #[instrument(skip_all, fields(credential_id = %credential.id, portal = self.profile.key))]
    async fn sync(
        &self,
        credential: &PortalCredential,
        _key: &VaultKey,
    ) -> Result<ConnectorResult, SyncError> {
        let entry_url = credential
            .base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .or(self.profile.default_url)
            .ok_or_else(|| {
                BrowserError::Application(format!(
                    "credential {} has no portal URL",
                    credential.id
                ))
            })?
            .to_string();

        let page = self.launcher.launch().await?;
        let result = self.run(page.as_ref(), credential, &entry_url).await;

        // The browser is released on every path.
        if let Err(e) = page.close().await {
            warn!(error = %e, "Failed to close browser");
        }

        if let Ok(result) = &result {
            info!(
                records = result.records_imported,
                status = %result.summary.status,
                "Browser sync finished"
            );
        }
        result
    }
}
