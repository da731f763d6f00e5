use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::concept::{transform_concept, SlotValues};
use super::input::{literal_concept_ids, TransformationInputData};
use super::pool::WorkerPool;
use super::validate::{validate, validate_term_slots};
use crate::config::Config;
use crate::db::Database;
use crate::error::{ServiceError, TransformError};
use crate::models::{
    Concept, ConceptMini, TemplateTransformRequest, TemplateTransformation,
    TransformMode, TransformationResult, TransformationStatus, ERROR_KEY, NONCONFORMANCE,
};
use crate::templates::{ParsedTemplate, TemplateService};
use crate::terminology::{with_deadline, ConceptQuery, TerminologyClient};

/// A submitted job. The record keeps being updated in the store; `wait`
/// yields its final state.
pub struct TransformationHandle {
    pub transformation: TemplateTransformation,
    finished: oneshot::Receiver<TemplateTransformation>,
}

impl TransformationHandle {
    pub fn id(&self) -> Uuid {
        self.transformation.id
    }

    /// Fails only if the job task panicked.
    pub async fn wait(self) -> Result<TemplateTransformation, oneshot::error::RecvError> {
        self.finished.await
    }
}

/// Runs bulk template transformations.
///
/// A job is validated and prepared on the caller's task; its batches then run
/// on the worker pool and are merged on a spawned job task.
#[derive(Clone)]
pub struct TransformService {
    db: Database,
    templates: TemplateService,
    client: Arc<dyn TerminologyClient>,
    pool: WorkerPool,
    /// Running job tasks; `None` once shutdown has begun.
    jobs: Arc<Mutex<Option<JoinSet<()>>>>,
    batch_max: usize,
    request_timeout: Duration,
}

impl TransformService {
    pub fn new(db: Database, client: Arc<dyn TerminologyClient>, config: &Config) -> Self {
        Self {
            templates: TemplateService::new(db.clone(), client.clone(), config.request_timeout),
            db,
            client,
            pool: WorkerPool::new(config.worker_pool_size),
            jobs: Arc::new(Mutex::new(Some(JoinSet::new()))),
            batch_max: config.batch_max.max(1),
            request_timeout: config.request_timeout,
        }
    }

    pub fn templates(&self) -> &TemplateService {
        &self.templates
    }

    pub fn is_accepting(&self) -> bool {
        self.jobs.lock().expect("job set lock poisoned").is_some()
    }

    /// Stops accepting jobs, waits for every accepted job to store its final
    /// status and results, then closes the worker pool.
    pub async fn shutdown(&self) {
        let jobs = self.jobs.lock().expect("job set lock poisoned").take();
        if let Some(mut jobs) = jobs {
            tracing::debug!(jobs = jobs.len(), "Draining transformation jobs");
            while let Some(joined) = jobs.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Transformation task failed");
                }
            }
        }
        self.pool.shutdown().await;
    }

    /// Returns false once shutdown has begun.
    fn spawn_job<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut guard = self.jobs.lock().expect("job set lock poisoned");
        let Some(jobs) = guard.as_mut() else {
            return false;
        };
        // Reap finished jobs
        while jobs.try_join_next().is_some() {}
        jobs.spawn(job);
        true
    }

    fn save_rejected(&self, transformation: &TemplateTransformation) {
        if let Err(e) = self.db.update_transformation(transformation) {
            tracing::error!(id = %transformation.id, error = %e, "Failed to save transformation");
        }
    }

    /// Records a job as running and starts it.
    ///
    /// Template and request problems fail the job before any batch runs; the
    /// failure is stored on the record and returned.
    pub async fn transform(
        &self,
        branch_path: &str,
        destination: &str,
        request: TemplateTransformRequest,
    ) -> Result<TransformationHandle, ServiceError> {
        if !self.is_accepting() {
            return Err(ServiceError::ShuttingDown);
        }
        let mut transformation = TemplateTransformation::new(branch_path, destination, request);
        transformation.set_status(TransformationStatus::Running);
        self.db.create_transformation(&transformation)?;
        tracing::info!(
            id = %transformation.id,
            branch = %branch_path,
            destination = %destination,
            mode = transformation.transform_request.mode.as_str(),
            concepts = transformation.transform_request.concepts_to_transform.len(),
            "Transformation started"
        );

        let input = match self.prepare(&transformation).await {
            Ok(input) => Arc::new(input),
            Err(e) => {
                tracing::warn!(id = %transformation.id, error = %e, "Transformation rejected");
                transformation.fail(e.to_string());
                self.save_rejected(&transformation);
                return Err(e);
            }
        };

        let (done, finished) = oneshot::channel();
        let service = self.clone();
        let job = transformation.clone();
        let spawned = self.spawn_job(async move {
            let finished = service.run(job, input).await;
            // The caller may have dropped its handle
            let _ = done.send(finished);
        });
        if !spawned {
            transformation.fail(ServiceError::ShuttingDown.to_string());
            self.save_rejected(&transformation);
            return Err(ServiceError::ShuttingDown);
        }

        Ok(TransformationHandle {
            transformation,
            finished,
        })
    }

    async fn prepare(
        &self,
        transformation: &TemplateTransformation,
    ) -> Result<TransformationInputData, ServiceError> {
        let request = &transformation.transform_request;
        let destination = ParsedTemplate::parse(
            self.templates
                .load_or_throw(&transformation.destination_template)?,
        )?;

        let source = match (&request.source_template, request.mode) {
            (Some(name), _) => Some(ParsedTemplate::parse(self.templates.load_or_throw(name)?)?),
            (None, TransformMode::ConceptToConcept) => {
                return Err(ServiceError::InvalidRequest(
                    "A source template is required to transform concept to concept".to_string(),
                ))
            }
            (None, TransformMode::TemplateToConcept) => None,
        };
        match &source {
            Some(source) => validate(request.mode, source, &destination)?,
            None => validate_term_slots(&destination)?,
        }

        let concept_id_map = self
            .destination_concepts(&transformation.branch_path, &destination)
            .await?;
        TransformationInputData::new(
            request.mode,
            transformation.branch_path.as_str(),
            source.as_ref(),
            destination,
            concept_id_map,
            request.inactivation_reason.clone(),
        )
    }

    /// Concepts for the destination outline's literal types and targets.
    async fn destination_concepts(
        &self,
        branch_path: &str,
        destination: &ParsedTemplate,
    ) -> Result<HashMap<String, ConceptMini>, ServiceError> {
        let ids = literal_concept_ids(&destination.template.concept_outline);
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let query = ConceptQuery::by_ids(ids);
        let concepts = with_deadline(
            self.request_timeout,
            self.client.get_concepts(branch_path, &query),
        )
        .await?;
        Ok(concepts
            .into_iter()
            .map(|concept| (concept.id.clone(), concept.to_mini()))
            .collect())
    }

    async fn run(
        self,
        mut transformation: TemplateTransformation,
        input: Arc<TransformationInputData>,
    ) -> TemplateTransformation {
        let batches = partition(
            &transformation.transform_request.concepts_to_transform,
            self.batch_max,
        );
        tracing::debug!(id = %transformation.id, batches = batches.len(), "Submitting batches");

        let units: Vec<_> = batches
            .into_iter()
            .map(|batch| {
                let service = self.clone();
                let input = input.clone();
                let ids = batch.clone();
                let unit = self
                    .pool
                    .spawn(async move { service.batch_transform(&input, batch).await });
                (ids, unit)
            })
            .collect();

        let mut merged = TransformationResult::default();
        let mut unit_errors = Vec::new();
        for (ids, unit) in units {
            let cause = match unit.await {
                Ok(Ok(result)) => {
                    merged.merge(result);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            let message = format!("Unexpected errors while merging results. {}", cause);
            tracing::error!(id = %transformation.id, batch = ?ids, "{}", message);
            for id in ids {
                merged.add_failure(id, message.clone());
            }
            unit_errors.push(message);
        }

        let status = TransformationStatus::from_outcome(!unit_errors.is_empty(), &merged);
        if unit_errors.is_empty() {
            transformation.set_status(status);
        } else {
            for message in unit_errors {
                transformation.fail(message);
            }
        }

        if let Err(e) = self.db.write_results(transformation.id, &merged) {
            tracing::error!(id = %transformation.id, error = %e, "Failed to save results");
            transformation.fail(format!("Failed to save results. {}", e));
        }
        if let Err(e) = self.db.update_transformation(&transformation) {
            tracing::error!(id = %transformation.id, error = %e, "Failed to save transformation");
        }

        tracing::info!(
            id = %transformation.id,
            status = transformation.status.as_str(),
            transformed = merged.concepts.len(),
            failures = merged.failures.len(),
            "Transformation finished"
        );
        transformation
    }

    /// Transforms one batch. Never fails as a whole: every id ends up either
    /// transformed or in the failures.
    pub async fn batch_transform(
        &self,
        input: &TransformationInputData,
        batch: Vec<String>,
    ) -> TransformationResult {
        let branch = input.branch_path.as_str();
        let mut result = TransformationResult::default();

        let concepts = match with_deadline(
            self.request_timeout,
            self.client.search_concepts(branch, &batch),
        )
        .await
        {
            Ok(concepts) => concepts,
            Err(e) => {
                let message = format!(
                    "Failed to load concepts [{}] from branch {}  caused by {}",
                    batch.join(", "),
                    branch,
                    e
                );
                tracing::warn!("{}", message);
                for id in &batch {
                    result.add_failure(
                        id.as_str(),
                        format!("Failed to load concept {} from branch {}", id, branch),
                    );
                }
                result.add_failure(ERROR_KEY, message);
                return result;
            }
        };

        let mut missing: HashSet<&str> = batch.iter().map(String::as_str).collect();
        for concept in concepts {
            if !missing.remove(concept.concept_id.as_str()) {
                // Not asked for, or returned twice
                continue;
            }
            let concept_id = concept.concept_id.clone();
            match self.transform_one(input, concept).await {
                Ok(transformed) => result.add_concept(transformed),
                Err(e) => {
                    tracing::debug!(concept_id = %concept_id, error = %e, "Concept not transformed");
                    result.add_failure(concept_id, e.to_string());
                }
            }
        }

        for id in batch.iter().filter(|id| missing.contains(id.as_str())) {
            result.add_failure(
                id.as_str(),
                format!("Failed to find concept {} from branch {}", id, branch),
            );
        }
        result
    }

    async fn transform_one(
        &self,
        input: &TransformationInputData,
        concept: Concept,
    ) -> Result<Concept, TransformError> {
        let mut slot_values = input.slot_values(&concept);
        if input.mode == TransformMode::TemplateToConcept {
            slot_values.fsns = self
                .slot_fsns(&input.branch_path, &concept.concept_id, &slot_values)
                .await?;
        }
        transform_concept(
            concept,
            &input.destination,
            &slot_values,
            input.inactivation_reason.as_deref(),
            &input.concept_id_map,
        )
    }

    /// Fully specified names of the concepts filling the slots.
    async fn slot_fsns(
        &self,
        branch: &str,
        concept_id: &str,
        slot_values: &SlotValues,
    ) -> Result<HashMap<String, String>, TransformError> {
        let ids: Vec<String> = slot_values
            .concepts
            .values()
            .map(|mini| mini.concept_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let concepts = with_deadline(self.request_timeout, self.client.search_concepts(branch, &ids))
            .await
            .map_err(|source| TransformError::SlotConcepts {
                concept_id: concept_id.to_string(),
                source,
            })?;
        Ok(concepts
            .iter()
            .filter_map(|concept| {
                concept
                    .fsn()
                    .map(|fsn| (concept.concept_id.clone(), fsn.to_string()))
            })
            .collect())
    }

    /// Applies a template to one concept the caller already holds. Components
    /// the template no longer produces are inactivated as nonconformant.
    pub async fn transform_single_concept(
        &self,
        branch_path: &str,
        destination: &str,
        concept: Concept,
    ) -> Result<Concept, ServiceError> {
        let destination = ParsedTemplate::parse(self.templates.load_or_throw(destination)?)?;
        let concept_id_map = self.destination_concepts(branch_path, &destination).await?;
        let input = TransformationInputData::new(
            TransformMode::TemplateToConcept,
            branch_path,
            None,
            destination,
            concept_id_map,
            Some(NONCONFORMANCE.to_string()),
        )?;
        Ok(self.transform_one(&input, concept).await?)
    }
}

/// Splits ids into consecutive batches of at most `batch_max`, keeping order
/// and duplicates.
pub fn partition(ids: &[String], batch_max: usize) -> Vec<Vec<String>> {
    ids.chunks(batch_max.max(1)).map(<[String]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::models::SimpleConcept;
    use crate::terminology::TerminologyError;

    struct EmptyTerminology;

    #[async_trait]
    impl TerminologyClient for EmptyTerminology {
        async fn search_concepts(
            &self,
            _branch: &str,
            _concept_ids: &[String],
        ) -> Result<Vec<Concept>, TerminologyError> {
            Ok(Vec::new())
        }

        async fn get_concepts(
            &self,
            _branch: &str,
            _query: &ConceptQuery,
        ) -> Result<Vec<SimpleConcept>, TerminologyError> {
            Ok(Vec::new())
        }

        async fn ecl_query(
            &self,
            _branch: &str,
            _expression: &str,
            _limit: usize,
        ) -> Result<HashSet<String>, TerminologyError> {
            Ok(HashSet::new())
        }

        async fn ecl_query_has_any_matches(
            &self,
            _branch: &str,
            _expression: &str,
        ) -> Result<bool, TerminologyError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn rejection_error_survives_a_store_failure() {
        let db = Database::open_memory().unwrap();
        db.migrate().unwrap();
        db.execute_batch(
            "CREATE TRIGGER transformations_read_only BEFORE UPDATE ON transformations
             BEGIN SELECT RAISE(ABORT, 'read only'); END;",
        )
        .unwrap();
        let service = TransformService::new(db, Arc::new(EmptyTerminology), &Config::new(10));

        let result = service
            .transform("MAIN", "Missing", TemplateTransformRequest::default())
            .await;

        assert!(matches!(result, Err(ServiceError::TemplateNotFound(name)) if name == "Missing"));
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    #[test]
    fn partitions_in_order() {
        let input = ids(25);
        let batches = partition(&input, 10);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 5);
        assert_eq!(batches.concat(), input);
    }

    #[test]
    fn partition_keeps_duplicates() {
        let input = vec!["1".to_string(), "1".to_string(), "2".to_string()];
        assert_eq!(partition(&input, 2), vec![vec!["1", "1"], vec!["2"]]);
    }

    #[test]
    fn empty_input_has_no_batches() {
        assert!(partition(&[], 10).is_empty());
    }
}
