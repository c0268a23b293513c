//! Mutation coordinator.
//!
//! Runs the remote write first and only touches the cache once it has
//! committed. The post-conditions come from [`MutationPlan`]; when they
//! cannot be derived or applied the whole family is invalidated instead.

use std::future::Future;

use metrics::counter;
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::error::{MutationError, PlanError, RemoteError};
use super::family::FamilyDescriptor;
use super::fetch::FetchExecutor;
use super::keys::{EntityId, KeyPattern, ViewKind};
use super::payload::{Payload, Record};
use super::planner::{MutationIntent, MutationPlan, Operation};
use super::store::PatchOutcome;

const METRIC_MUTATION_FALLBACK: &str = "cms_cache_mutation_fallback_total";

#[derive(Clone)]
pub struct MutationCoordinator {
    executor: FetchExecutor,
}

impl MutationCoordinator {
    pub fn new(executor: FetchExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &FetchExecutor {
        &self.executor
    }

    /// Submit a write and reconcile the cache with its result.
    ///
    /// A failed write leaves the cache untouched, except that an
    /// authentication failure ends the session. An unreadable response to a
    /// write means the remote accepted it, so the family is invalidated and
    /// the write reports no entity.
    #[instrument(
        skip(self, intent, write),
        fields(mutation_id = %intent.id, family = %intent.family, operation = %intent.operation)
    )]
    pub async fn mutate<W>(
        &self,
        intent: MutationIntent,
        write: W,
    ) -> Result<Option<Record>, MutationError>
    where
        W: Future<Output = Result<Option<Record>, RemoteError>>,
    {
        let registry = self.executor.store().registry();
        let family = registry
            .family(&intent.family)
            .ok_or_else(|| MutationError::UnknownFamily(intent.family.clone()))?;
        if intent.operation != Operation::Create && intent.target_id.is_none() {
            return Err(MutationError::MissingTarget {
                family: intent.family.clone(),
                operation: intent.operation.as_str(),
            });
        }

        let written = match write.await {
            Ok(written) => written,
            Err(RemoteError::UnexpectedShape(reason)) => {
                self.fallback(&family, &PlanError::UnreadableResponse(reason));
                return Ok(None);
            }
            Err(error) => {
                if error.is_auth() {
                    warn!(error = %error, "Authentication rejected during write; resetting cache session");
                    self.executor.reset_session();
                }
                return Err(error.into());
            }
        };

        let list_keys = registry.keys_matching(&KeyPattern::view(family.name(), ViewKind::List));
        let reconciled = MutationPlan::build(&family, &intent, written.as_ref(), &list_keys)
            .and_then(|plan| self.apply(&family, &plan).map(|()| plan));

        match reconciled {
            Ok(plan) => info!(plan = %plan, "Mutation reconciled"),
            Err(error) => self.fallback(&family, &error),
        }

        Ok(written)
    }

    pub async fn create<W>(
        &self,
        family: &str,
        payload: Value,
        write: W,
    ) -> Result<Option<Record>, MutationError>
    where
        W: Future<Output = Result<Option<Record>, RemoteError>>,
    {
        self.mutate(MutationIntent::create(family, payload), write)
            .await
    }

    pub async fn update<W>(
        &self,
        family: &str,
        id: impl Into<EntityId>,
        payload: Value,
        write: W,
    ) -> Result<Option<Record>, MutationError>
    where
        W: Future<Output = Result<Option<Record>, RemoteError>>,
    {
        self.mutate(MutationIntent::update(family, id, payload), write)
            .await
    }

    pub async fn delete<W>(
        &self,
        family: &str,
        id: impl Into<EntityId>,
        write: W,
    ) -> Result<Option<Record>, MutationError>
    where
        W: Future<Output = Result<Option<Record>, RemoteError>>,
    {
        self.mutate(MutationIntent::delete(family, id), write).await
    }

    fn apply(&self, family: &FamilyDescriptor, plan: &MutationPlan) -> Result<(), PlanError> {
        let store = self.executor.store();
        let id_field = family.id_field_name();

        for (key, patch) in &plan.patch_lists {
            match store.try_patch(key, |payload| patch.apply(key, payload, id_field))? {
                PatchOutcome::Applied => {}
                // Not loaded yet: whatever is in flight may predate the write.
                PatchOutcome::Missing => {
                    store.invalidate_key(key);
                }
                PatchOutcome::Unchanged => {
                    if patch.invalidates_when_absent() {
                        store.invalidate_key(key);
                    }
                }
            }
        }

        if let Some((key, record)) = &plan.set_detail {
            store.set(key, Payload::Item(record.clone()));
        }
        if let Some(key) = &plan.remove_detail {
            store.remove(key);
        }
        for key in &plan.invalidate_keys {
            store.invalidate_key(key);
        }
        for pattern in &plan.invalidate {
            store.invalidate(pattern);
        }
        Ok(())
    }

    fn fallback(&self, family: &FamilyDescriptor, error: &PlanError) {
        let store = self.executor.store();
        let invalidated: usize = store
            .registry()
            .family_of(family.name())
            .iter()
            .map(|pattern| store.invalidate(pattern))
            .sum();
        counter!(METRIC_MUTATION_FALLBACK).increment(1);
        warn!(
            error = %error,
            invalidated,
            "Could not reconcile write; invalidated the whole family"
        );
    }
}
