//! Access to the terminology service holding the concepts being transformed.

mod client;

pub use client::HttpTerminologyClient;

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Concept, SimpleConcept};

#[derive(Debug, Error)]
pub enum TerminologyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: API key required or invalid")]
    Unauthorized,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// Filters for a concept search. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConceptQuery {
    pub ecl: Option<String>,
    pub module: Option<String>,
    pub concept_ids: Option<Vec<String>>,
    pub limit: Option<usize>,
}

impl ConceptQuery {
    pub fn by_ids(concept_ids: Vec<String>) -> Self {
        let limit = concept_ids.len();
        Self {
            concept_ids: Some(concept_ids),
            limit: Some(limit),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait TerminologyClient: Send + Sync {
    /// Full concepts, with descriptions and relationships, for the given ids.
    /// Ids the branch does not know are left out of the result.
    async fn search_concepts(
        &self,
        branch: &str,
        concept_ids: &[String],
    ) -> Result<Vec<Concept>, TerminologyError>;

    async fn get_concepts(
        &self,
        branch: &str,
        query: &ConceptQuery,
    ) -> Result<Vec<SimpleConcept>, TerminologyError>;

    async fn ecl_query(
        &self,
        branch: &str,
        expression: &str,
        limit: usize,
    ) -> Result<HashSet<String>, TerminologyError>;

    async fn ecl_query_has_any_matches(
        &self,
        branch: &str,
        expression: &str,
    ) -> Result<bool, TerminologyError>;
}

/// Runs a terminology call with a deadline.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, TerminologyError>
where
    F: Future<Output = Result<T, TerminologyError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(TerminologyError::Timeout(deadline)),
    }
}
