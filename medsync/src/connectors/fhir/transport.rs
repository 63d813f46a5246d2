//! HTTP transport for the token endpoint and FHIR reads.

use async_trait::async_trait;
use reqwest::header::ACCEPT;

use super::FhirError;
use super::types::{Bundle, TokenResponse};

/// The two HTTP exchanges the SMART client performs.
#[async_trait]
pub trait FhirTransport: Send + Sync {
    /// POST an `application/x-www-form-urlencoded` grant to the token endpoint.
    async fn post_token(
        &self,
        token_url: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, FhirError>;

    /// GET a search Bundle with a bearer token.
    async fn get_bundle(&self, url: &str, access_token: &str) -> Result<Bundle, FhirError>;
}

pub struct ReqwestFhirTransport {
    client: reqwest::Client,
}

impl ReqwestFhirTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FhirTransport for ReqwestFhirTransport {
    async fn post_token(
        &self,
        token_url: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, FhirError> {
        let response = self
            .client
            .post(token_url)
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FhirError::TokenExchange {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    async fn get_bundle(&self, url: &str, access_token: &str) -> Result<Bundle, FhirError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/fhir+json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FhirError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}
