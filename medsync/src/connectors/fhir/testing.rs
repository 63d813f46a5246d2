//! Scripted transport for tests.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use super::FhirError;
use super::transport::FhirTransport;
use super::types::{Bundle, TokenResponse};

#[derive(Default)]
pub struct FakeFhirTransport {
    tokens: Mutex<VecDeque<Result<Value, (u16, String)>>>,
    pages: Mutex<HashMap<String, Value>>,
    token_requests: Mutex<Vec<Vec<(String, String)>>>,
    bundle_requests: Mutex<Vec<String>>,
}

impl FakeFhirTransport {
    pub fn push_token(&self, body: Value) {
        self.tokens.lock().push_back(Ok(body));
    }

    pub fn push_token_error(&self, status: u16, body: &str) {
        self.tokens.lock().push_back(Err((status, body.to_string())));
    }

    pub fn put_page(&self, url: &str, bundle: Value) {
        self.pages.lock().insert(url.to_string(), bundle);
    }

    pub fn token_requests(&self) -> Vec<Vec<(String, String)>> {
        self.token_requests.lock().clone()
    }

    pub fn bundle_requests(&self) -> Vec<String> {
        self.bundle_requests.lock().clone()
    }
}

#[async_trait]
impl FhirTransport for FakeFhirTransport {
    async fn post_token(
        &self,
        _token_url: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, FhirError> {
        self.token_requests.lock().push(
            form.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        match self.tokens.lock().pop_front() {
            Some(Ok(body)) => Ok(serde_json::from_value(body)?),
            Some(Err((status, body))) => Err(FhirError::TokenExchange { status, body }),
            None => Err(FhirError::TokenExchange {
                status: 500,
                body: "no scripted token response".to_string(),
            }),
        }
    }

    async fn get_bundle(&self, url: &str, _access_token: &str) -> Result<Bundle, FhirError> {
        self.bundle_requests.lock().push(url.to_string());
        let page = self.pages.lock().get(url).cloned();
        match page {
            Some(bundle) => Ok(serde_json::from_value(bundle)?),
            // Unscripted searches return an empty Bundle.
            None => Ok(Bundle::default()),
        }
    }
}

/// A searchset page of Observations with the given ids.
pub fn bundle_page(ids: &[&str], next: Option<&str>) -> Value {
    let entry: Vec<Value> = ids
        .iter()
        .map(|id| json!({"resource": {"resourceType": "Observation", "id": id}}))
        .collect();
    bundle_of(entry, next)
}

pub fn bundle_of(entry: Vec<Value>, next: Option<&str>) -> Value {
    let mut link = vec![json!({"relation": "self", "url": "https://fhir.example.org/R4"})];
    if let Some(next) = next {
        link.push(json!({"relation": "next", "url": next}));
    }
    json!({"resourceType": "Bundle", "type": "searchset", "link": link, "entry": entry})
}
