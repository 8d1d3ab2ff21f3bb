//! Top-level pipeline entry point
//!
//! The orchestrator owns a run start to finish: alias resolution, wave
//! scheduling, merge, persistence, status report. Provider failures are
//! data in the report; only alias-resolution failure aborts a run.

use super::aggregator::{aggregate, PropertyRecord};
use super::graph::{self, GraphError};
use super::merge::MergePolicy;
use super::scheduler::Scheduler;
use crate::db;
use crate::types::{
    ContextKey, Identifier, Provider, ProviderError, ProviderStatus, RunContext,
};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RunError {
    /// No canonical id could be established, so no providers can run
    #[error("Identifier resolution failed: {0}")]
    Resolution(ProviderError),
}

/// Per-provider status line in the run report.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderReport {
    pub provider_id: &'static str,
    #[serde(flatten)]
    pub status: ProviderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Complete,
    PartialSuccess,
}

/// What a run hands back to the caller: the merged record is always
/// present, even when providers failed or persistence gave up.
#[derive(Debug, Serialize)]
pub struct RunOutcome {
    pub record: PropertyRecord,
    pub providers: Vec<ProviderReport>,
    pub overall: OverallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_error: Option<ProviderError>,
}

pub struct Orchestrator {
    resolver: Arc<dyn Provider>,
    providers: Vec<Arc<dyn Provider>>,
    policy: MergePolicy,
    scheduler: Scheduler,
    pool: SqlitePool,
    run_deadline: Duration,
}

impl Orchestrator {
    /// Build an orchestrator, validating the provider graph. A cyclic or
    /// unsatisfiable graph is a startup error, never a run-time one.
    pub fn new(
        resolver: Arc<dyn Provider>,
        providers: Vec<Arc<dyn Provider>>,
        policy: MergePolicy,
        pool: SqlitePool,
        max_concurrency: usize,
        run_deadline: Duration,
    ) -> Result<Self, GraphError> {
        graph::validate(&providers, &[ContextKey::PropertyId])?;
        Ok(Self {
            resolver,
            providers,
            policy,
            scheduler: Scheduler::new(max_concurrency),
            pool,
            run_deadline,
        })
    }

    /// Execute one profile run. `address_override` seeds the site address
    /// ahead of any provider-supplied value.
    pub async fn run(
        &self,
        identifier: Identifier,
        address_override: Option<String>,
    ) -> Result<RunOutcome, RunError> {
        let run_id = Uuid::new_v4();
        info!(%run_id, identifier = identifier.as_str(), "Starting profile run");
        let mut reports: Vec<ProviderReport> = Vec::new();

        let canonical = match &identifier {
            Identifier::Canonical(id) => id.clone(),
            Identifier::Taxlot(taxlot) => {
                let id = self.resolve_alias(taxlot, &mut reports).await?;
                info!(taxlot = %taxlot, property_id = %id, "Resolved taxlot alias");
                id
            }
        };

        let mut ctx = RunContext::new();
        ctx.insert_if_absent(ContextKey::PropertyId, serde_json::json!(canonical));
        if let Some(address) = address_override {
            ctx.insert_if_absent(ContextKey::SiteAddress, serde_json::json!(address));
        }

        // Whole-run deadline on top of per-provider budgets
        let cancel = CancellationToken::new();
        let deadline_cancel = cancel.clone();
        let deadline = self.run_deadline;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            warn!("Run deadline expired, cancelling in-flight providers");
            deadline_cancel.cancel();
        });

        let (results, _ctx) = self.scheduler.run(&self.providers, ctx, cancel).await;
        timer.abort();

        let record = aggregate(&canonical, &self.policy, &results);
        reports.extend(results.iter().map(|sr| ProviderReport {
            provider_id: sr.result.provider_id,
            status: sr.result.status.clone(),
        }));

        let persistence_error = match db::persist_with_retry(&self.pool, &record).await {
            Ok(()) => None,
            Err(e) => {
                error!(property_id = %canonical, "Persistence failed after retries: {}", e);
                Some(ProviderError::PersistenceFailure(e.to_string()))
            }
        };

        let overall = if persistence_error.is_none()
            && reports.iter().all(|r| r.status.is_success())
        {
            OverallStatus::Complete
        } else {
            OverallStatus::PartialSuccess
        };
        info!(
            %run_id,
            property_id = %canonical,
            fields = record.fields.len(),
            ?overall,
            "Profile run finished"
        );

        Ok(RunOutcome {
            record,
            providers: reports,
            overall,
            persistence_error,
        })
    }

    /// Run the alias resolver as a pre-step. Unlike every other provider,
    /// its failure is fatal to the run.
    async fn resolve_alias(
        &self,
        taxlot: &str,
        reports: &mut Vec<ProviderReport>,
    ) -> Result<String, RunError> {
        let mut ctx = RunContext::new();
        ctx.insert_if_absent(ContextKey::TaxlotId, serde_json::json!(taxlot));

        let budget = self.resolver.timeout();
        let result = match tokio::time::timeout(budget, self.resolver.execute(&ctx)).await {
            Ok(result) => result,
            Err(_) => {
                let err = ProviderError::Timeout(budget.as_secs());
                reports.push(ProviderReport {
                    provider_id: self.resolver.id(),
                    status: ProviderStatus::Failure { error: err.clone() },
                });
                return Err(RunError::Resolution(err));
            }
        };

        reports.push(ProviderReport {
            provider_id: result.provider_id,
            status: result.status.clone(),
        });

        let resolved = result
            .context
            .iter()
            .find(|(key, _)| *key == ContextKey::PropertyId)
            .and_then(|(_, v)| v.as_str())
            .map(str::to_string);

        match (result.status, resolved) {
            (ProviderStatus::Success, Some(id)) => Ok(id),
            (ProviderStatus::Failure { error }, _) => Err(RunError::Resolution(error)),
            (_, _) => Err(RunError::Resolution(ProviderError::ResolutionFailure(
                format!("no canonical id for taxlot {}", taxlot),
            ))),
        }
    }
}
