//! Wave-based concurrent execution of the provider graph
//!
//! Each iteration selects every not-yet-run provider whose required
//! context keys are present, runs that wave concurrently under a
//! semaphore, publishes the wave's context outputs, and repeats. A wave
//! never starts while the previous wave still has providers in flight.

use crate::types::{Provider, ProviderError, ProviderResult, RunContext, SkipReason};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A provider result annotated with its completion order within the run.
/// The merge layer breaks priority ties with the lower sequence number.
#[derive(Debug, Clone)]
pub struct SequencedResult {
    pub result: ProviderResult,
    pub sequence: u64,
}

pub struct Scheduler {
    max_concurrency: usize,
}

impl Scheduler {
    pub fn new(max_concurrency: usize) -> Self {
        Self { max_concurrency }
    }

    /// Run every provider whose dependencies can be met, starting from
    /// the seeded `ctx`. Returns all provider results (executed, timed
    /// out, or skipped) plus the final context.
    pub async fn run(
        &self,
        providers: &[Arc<dyn Provider>],
        mut ctx: RunContext,
        cancel: CancellationToken,
    ) -> (Vec<SequencedResult>, RunContext) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut pending: Vec<Arc<dyn Provider>> = providers.to_vec();
        let mut results: Vec<SequencedResult> = Vec::new();
        let mut sequence: u64 = 0;

        loop {
            let (ready, rest): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|p| p.requires().iter().all(|k| ctx.contains(*k)));
            pending = rest;
            if ready.is_empty() {
                break;
            }

            if cancel.is_cancelled() {
                // Run deadline expired: ready providers never get to
                // start, and are reported the same as cancelled ones.
                for p in ready {
                    results.push(SequencedResult {
                        result: ProviderResult::failure(
                            p.id(),
                            ProviderError::Timeout(p.timeout().as_secs()),
                        ),
                        sequence,
                    });
                    sequence += 1;
                }
                break;
            }

            debug!(
                wave_size = ready.len(),
                "Starting wave: {:?}",
                ready.iter().map(|p| p.id()).collect::<Vec<_>>()
            );

            let snapshot = Arc::new(ctx.clone());
            let mut wave: JoinSet<ProviderResult> = JoinSet::new();
            for provider in ready {
                let sem = semaphore.clone();
                let wave_ctx = snapshot.clone();
                let wave_cancel = cancel.clone();
                wave.spawn(async move {
                    let budget = provider.timeout();
                    let _permit = match sem.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return ProviderResult::failure(
                                provider.id(),
                                ProviderError::ProviderUnavailable(
                                    "worker pool shut down".to_string(),
                                ),
                            )
                        }
                    };
                    tokio::select! {
                        _ = wave_cancel.cancelled() => ProviderResult::failure(
                            provider.id(),
                            ProviderError::Timeout(budget.as_secs()),
                        ),
                        outcome = tokio::time::timeout(budget, provider.execute(&wave_ctx)) => {
                            match outcome {
                                Ok(result) => result,
                                Err(_) => ProviderResult::failure(
                                    provider.id(),
                                    ProviderError::Timeout(budget.as_secs()),
                                ),
                            }
                        }
                    }
                });
            }

            while let Some(joined) = wave.join_next().await {
                let mut result = match joined {
                    Ok(result) => result,
                    Err(e) => {
                        // Providers are contractually panic-free; a task
                        // abort here is a bug, not a run failure.
                        warn!("Provider task aborted: {}", e);
                        continue;
                    }
                };
                for (key, value) in result.context.drain(..) {
                    if !ctx.insert_if_absent(key, value) {
                        debug!(
                            provider = result.provider_id,
                            ?key,
                            "Context key already supplied, ignoring"
                        );
                    }
                }
                results.push(SequencedResult { result, sequence });
                sequence += 1;
            }
        }

        // Whatever is left can never become ready
        for p in pending {
            let missing: Vec<_> = p
                .requires()
                .iter()
                .copied()
                .filter(|k| !ctx.contains(*k))
                .collect();
            if missing.is_empty() {
                continue;
            }
            debug!(provider = p.id(), ?missing, "Skipping provider, dependency unmet");
            results.push(SequencedResult {
                result: ProviderResult::skipped(p.id(), SkipReason::UnmetDependency { missing }),
                sequence,
            });
            sequence += 1;
        }

        (results, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContextKey, FieldValue, ProviderStatus, Scalar};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Step {
        id: &'static str,
        requires: &'static [ContextKey],
        supplies: &'static [ContextKey],
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl Provider for Step {
        fn id(&self) -> &'static str {
            self.id
        }
        fn requires(&self) -> &'static [ContextKey] {
            self.requires
        }
        fn supplies(&self) -> &'static [ContextKey] {
            self.supplies
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(200)
        }
        async fn execute(&self, _ctx: &RunContext) -> ProviderResult {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return ProviderResult::failure(
                    self.id,
                    ProviderError::ProviderUnavailable("down".to_string()),
                );
            }
            let mut result = ProviderResult::success(self.id)
                .with_field(FieldValue::text(self.id, "field", "v", "src"));
            for &key in self.supplies {
                result = result.with_context(key, serde_json::json!("supplied"));
            }
            result
        }
    }

    fn seeded() -> RunContext {
        let mut ctx = RunContext::new();
        ctx.insert_if_absent(ContextKey::PropertyId, serde_json::json!("131214"));
        ctx
    }

    #[tokio::test]
    async fn downstream_waits_for_upstream_context() {
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(Step {
                id: "up",
                requires: &[ContextKey::PropertyId],
                supplies: &[ContextKey::SiteAddress],
                fail: false,
                delay: Duration::from_millis(20),
            }),
            Arc::new(Step {
                id: "down",
                requires: &[ContextKey::SiteAddress],
                supplies: &[],
                fail: false,
                delay: Duration::ZERO,
            }),
        ];
        let (results, ctx) = Scheduler::new(4)
            .run(&providers, seeded(), CancellationToken::new())
            .await;

        assert!(ctx.contains(ContextKey::SiteAddress));
        assert_eq!(results.len(), 2);
        let up = results.iter().find(|r| r.result.provider_id == "up").unwrap();
        let down = results.iter().find(|r| r.result.provider_id == "down").unwrap();
        assert!(up.sequence < down.sequence);
        assert!(down.result.status.is_success());
    }

    #[tokio::test]
    async fn wave_snapshot_carries_upstream_supplied_values() {
        struct AddressEcho;

        #[async_trait]
        impl Provider for AddressEcho {
            fn id(&self) -> &'static str {
                "address_echo"
            }
            fn requires(&self) -> &'static [ContextKey] {
                &[ContextKey::SiteAddress]
            }
            fn supplies(&self) -> &'static [ContextKey] {
                &[]
            }
            async fn execute(&self, ctx: &RunContext) -> ProviderResult {
                match ctx.get_str(ContextKey::SiteAddress) {
                    Some(address) => ProviderResult::success(self.id()).with_field(
                        FieldValue::text(self.id(), "seen_address", address, "context"),
                    ),
                    None => ProviderResult::failure(
                        self.id(),
                        ProviderError::ExtractionFailure(
                            "address missing from snapshot".to_string(),
                        ),
                    ),
                }
            }
        }

        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(Step {
                id: "up",
                requires: &[ContextKey::PropertyId],
                supplies: &[ContextKey::SiteAddress],
                fail: false,
                delay: Duration::from_millis(10),
            }),
            Arc::new(AddressEcho),
        ];
        let (results, _) = Scheduler::new(4)
            .run(&providers, seeded(), CancellationToken::new())
            .await;

        let echo = results
            .iter()
            .find(|r| r.result.provider_id == "address_echo")
            .unwrap();
        assert!(echo.result.status.is_success());
        assert_eq!(
            echo.result.emitted[0].value,
            Some(Scalar::Text("supplied".to_string()))
        );
    }

    #[tokio::test]
    async fn failed_supplier_skips_dependent_only() {
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(Step {
                id: "broken",
                requires: &[ContextKey::PropertyId],
                supplies: &[ContextKey::ParcelNumber],
                fail: true,
                delay: Duration::ZERO,
            }),
            Arc::new(Step {
                id: "dependent",
                requires: &[ContextKey::ParcelNumber],
                supplies: &[],
                fail: false,
                delay: Duration::ZERO,
            }),
            Arc::new(Step {
                id: "independent",
                requires: &[ContextKey::PropertyId],
                supplies: &[],
                fail: false,
                delay: Duration::ZERO,
            }),
        ];
        let (results, _) = Scheduler::new(4)
            .run(&providers, seeded(), CancellationToken::new())
            .await;

        let by_id = |id: &str| {
            results
                .iter()
                .find(|r| r.result.provider_id == id)
                .unwrap()
        };
        match &by_id("dependent").result.status {
            ProviderStatus::Skipped {
                reason: SkipReason::UnmetDependency { missing },
            } => assert_eq!(missing, &[ContextKey::ParcelNumber]),
            other => panic!("expected skip, got {:?}", other),
        }
        assert!(by_id("independent").result.status.is_success());
        assert!(matches!(
            by_id("broken").result.status,
            ProviderStatus::Failure { .. }
        ));
    }

    #[tokio::test]
    async fn slow_provider_reports_timeout() {
        let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(Step {
            id: "slow",
            requires: &[ContextKey::PropertyId],
            supplies: &[],
            fail: false,
            delay: Duration::from_secs(5),
        })];
        let (results, _) = Scheduler::new(4)
            .run(&providers, seeded(), CancellationToken::new())
            .await;

        assert!(matches!(
            results[0].result.status,
            ProviderStatus::Failure {
                error: ProviderError::Timeout(_)
            }
        ));
    }

    #[tokio::test]
    async fn run_cancellation_times_out_in_flight_providers() {
        let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(Step {
            id: "inflight",
            requires: &[ContextKey::PropertyId],
            supplies: &[],
            fail: false,
            delay: Duration::from_millis(150),
        })];
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let (results, _) = Scheduler::new(4).run(&providers, seeded(), cancel).await;

        assert!(matches!(
            results[0].result.status,
            ProviderStatus::Failure {
                error: ProviderError::Timeout(_)
            }
        ));
    }
}
