//! HTTP client for a Snowstorm-style terminology server.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{ConceptQuery, TerminologyClient, TerminologyError};
use crate::models::{Concept, SimpleConcept};

/// Page of concepts returned by the search endpoint.
#[derive(Debug, Deserialize)]
struct ItemsPage<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Clone)]
pub struct HttpTerminologyClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpTerminologyClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
        }
    }

    /// Build a request with optional auth header.
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, TerminologyError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            match status {
                StatusCode::NOT_FOUND => Err(TerminologyError::NotFound(body)),
                StatusCode::BAD_REQUEST => Err(TerminologyError::BadRequest(body)),
                StatusCode::UNAUTHORIZED => Err(TerminologyError::Unauthorized),
                _ => Err(TerminologyError::Server(format!("{}: {}", status, body))),
            }
        }
    }

    async fn concept_page(
        &self,
        branch: &str,
        params: &[(&str, String)],
    ) -> Result<ItemsPage<SimpleConcept>, TerminologyError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/{}/concepts", branch))
            .query(params)
            .send()
            .await?;
        self.handle_response(response).await
    }
}

#[async_trait]
impl TerminologyClient for HttpTerminologyClient {
    async fn search_concepts(
        &self,
        branch: &str,
        concept_ids: &[String],
    ) -> Result<Vec<Concept>, TerminologyError> {
        if concept_ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/browser/{}/concepts/bulk-load", branch),
            )
            .json(&serde_json::json!({ "conceptIds": concept_ids }))
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn get_concepts(
        &self,
        branch: &str,
        query: &ConceptQuery,
    ) -> Result<Vec<SimpleConcept>, TerminologyError> {
        let mut params = Vec::new();
        if let Some(ref ecl) = query.ecl {
            params.push(("ecl", ecl.clone()));
        }
        if let Some(ref module) = query.module {
            params.push(("module", module.clone()));
        }
        if let Some(ref ids) = query.concept_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            params.extend(ids.iter().map(|id| ("conceptIds", id.clone())));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        Ok(self.concept_page(branch, &params).await?.items)
    }

    async fn ecl_query(
        &self,
        branch: &str,
        expression: &str,
        limit: usize,
    ) -> Result<HashSet<String>, TerminologyError> {
        let params = [("ecl", expression.to_string()), ("limit", limit.to_string())];
        let page = self.concept_page(branch, &params).await?;
        Ok(page.items.into_iter().map(|concept| concept.id).collect())
    }

    async fn ecl_query_has_any_matches(
        &self,
        branch: &str,
        expression: &str,
    ) -> Result<bool, TerminologyError> {
        let params = [("ecl", expression.to_string()), ("limit", "1".to_string())];
        let page = self.concept_page(branch, &params).await?;
        Ok(page.total > 0 || !page.items.is_empty())
    }
}
