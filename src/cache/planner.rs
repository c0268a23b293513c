//! Mutation plan generation.
//!
//! Derives the cache post-conditions of a committed write from the family
//! descriptor, the intent, the entity the backend returned and the list
//! views currently loaded. Planning is pure; the coordinator executes it.

use std::fmt;

use serde_json::Value;
use uuid::Uuid;

use super::error::PlanError;
use super::family::FamilyDescriptor;
use super::keys::{EntityId, KeyPattern, ResourceKey};
use super::payload::{Payload, Record, record_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write the caller wants applied to one family.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationIntent {
    /// Correlates the log lines of one mutation.
    pub id: Uuid,
    pub family: String,
    pub operation: Operation,
    pub payload: Value,
    pub target_id: Option<EntityId>,
}

impl MutationIntent {
    pub fn create(family: impl Into<String>, payload: Value) -> Self {
        Self::new(family, Operation::Create, payload, None)
    }

    pub fn update(family: impl Into<String>, id: impl Into<EntityId>, payload: Value) -> Self {
        Self::new(family, Operation::Update, payload, Some(id.into()))
    }

    pub fn delete(family: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Self::new(family, Operation::Delete, Value::Null, Some(id.into()))
    }

    fn new(
        family: impl Into<String>,
        operation: Operation,
        payload: Value,
        target_id: Option<EntityId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            family: family.into(),
            operation,
            payload,
            target_id,
        }
    }
}

/// Edit applied to one cached list view.
#[derive(Debug, Clone, PartialEq)]
pub enum ListPatch {
    /// Add a summary; an item with the same id is replaced so it appears once.
    Append(Record),
    /// Overwrite the summary fields of an item in place.
    Replace {
        id: EntityId,
        summary: Record,
        /// The list's filter now admits the item; if it is not there, the
        /// list must be refetched to pick it up.
        invalidate_if_absent: bool,
    },
    Remove(EntityId),
}

impl ListPatch {
    /// Apply to a cached list. `Ok(None)` when nothing changes.
    pub fn apply(
        &self,
        key: &ResourceKey,
        payload: &Payload,
        id_field: &str,
    ) -> Result<Option<Payload>, PlanError> {
        let Payload::Collection { items, meta } = payload else {
            return Err(PlanError::NotAList(key.to_string()));
        };
        let position = |id: &EntityId| {
            items
                .iter()
                .position(|record| record_id(record, id_field).as_ref() == Some(id))
        };

        let items = match self {
            Self::Append(summary) => {
                let id = record_id(summary, id_field)
                    .ok_or_else(|| PlanError::MissingId(id_field.to_string()))?;
                let mut items = items.clone();
                match position(&id) {
                    Some(index) => items[index] = summary.clone(),
                    None => items.push(summary.clone()),
                }
                items
            }
            Self::Replace { id, summary, .. } => {
                let Some(index) = position(id) else {
                    return Ok(None);
                };
                let mut items = items.clone();
                items[index].extend(summary.iter().map(|(k, v)| (k.clone(), v.clone())));
                items
            }
            Self::Remove(id) => {
                let Some(index) = position(id) else {
                    return Ok(None);
                };
                let mut items = items.clone();
                items.remove(index);
                items
            }
        };

        Ok(Some(Payload::Collection {
            items,
            meta: meta.clone(),
        }))
    }

    pub fn invalidates_when_absent(&self) -> bool {
        matches!(
            self,
            Self::Replace {
                invalidate_if_absent: true,
                ..
            }
        )
    }
}

/// Cache actions that follow one committed write.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MutationPlan {
    /// Loaded list views to patch in place.
    pub patch_lists: Vec<(ResourceKey, ListPatch)>,
    /// Detail view to overwrite with the full entity.
    pub set_detail: Option<(ResourceKey, Record)>,
    /// Detail view to drop.
    pub remove_detail: Option<ResourceKey>,
    /// Views the server computes, refetched rather than patched.
    pub invalidate: Vec<KeyPattern>,
    /// Loaded lists whose parameters the client cannot evaluate.
    pub invalidate_keys: Vec<ResourceKey>,
}

impl fmt::Display for MutationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = |wanted: fn(&ListPatch) -> bool| {
            self.patch_lists
                .iter()
                .filter(|(_, patch)| wanted(patch))
                .count()
        };
        write!(
            f,
            "MutationPlan {{ append: {}, replace: {}, remove: {}, set_detail: {}, \
             remove_detail: {}, invalidate_patterns: {}, invalidate_keys: {} }}",
            count(|patch| matches!(patch, ListPatch::Append(_))),
            count(|patch| matches!(patch, ListPatch::Replace { .. })),
            count(|patch| matches!(patch, ListPatch::Remove(_))),
            self.set_detail.is_some(),
            self.remove_detail.is_some(),
            self.invalidate.len(),
            self.invalidate_keys.len(),
        )
    }
}

impl MutationPlan {
    /// Build the plan for a committed write.
    ///
    /// - create: append the summary to every loaded list whose filters admit it
    /// - update: replace the summary in place, drop it from lists whose filter
    ///   no longer admits it, and overwrite the detail view
    /// - delete: remove the item from every list and drop the detail view
    /// - always: invalidate the family's server-computed views
    pub fn build(
        family: &FamilyDescriptor,
        intent: &MutationIntent,
        written: Option<&Record>,
        list_keys: &[ResourceKey],
    ) -> Result<Self, PlanError> {
        let mut plan = Self {
            invalidate: family.invalidations().to_vec(),
            ..Self::default()
        };
        let id_field = family.id_field_name();

        match intent.operation {
            Operation::Create => {
                let entity = written.ok_or(PlanError::EmptyResponse)?;
                let id = record_id(entity, id_field)
                    .ok_or_else(|| PlanError::MissingId(id_field.to_string()))?;
                let summary = family.summarize(entity);
                if record_id(&summary, id_field).as_ref() != Some(&id) {
                    return Err(PlanError::MissingId(id_field.to_string()));
                }
                for key in list_keys {
                    if !family.can_evaluate(key) {
                        plan.invalidate_keys.push(key.clone());
                    } else if family.matches_filters(key, entity) {
                        plan.patch_lists
                            .push((key.clone(), ListPatch::Append(summary.clone())));
                    }
                }
            }
            Operation::Update => {
                let entity = written.ok_or(PlanError::EmptyResponse)?;
                let id = match intent.target_id.clone() {
                    Some(id) => id,
                    None => record_id(entity, id_field)
                        .ok_or_else(|| PlanError::MissingId(id_field.to_string()))?,
                };
                let summary = family.summarize(entity);
                for key in list_keys {
                    if !family.can_evaluate(key) {
                        plan.invalidate_keys.push(key.clone());
                    } else if family.matches_filters(key, entity) {
                        let filtered = key
                            .params()
                            .iter()
                            .any(|(name, _)| family.is_filter(name));
                        plan.patch_lists.push((
                            key.clone(),
                            ListPatch::Replace {
                                id: id.clone(),
                                summary: summary.clone(),
                                invalidate_if_absent: filtered,
                            },
                        ));
                    } else {
                        plan.patch_lists
                            .push((key.clone(), ListPatch::Remove(id.clone())));
                    }
                }
                plan.set_detail = Some((
                    ResourceKey::detail(family.name(), id),
                    entity.clone(),
                ));
            }
            Operation::Delete => {
                let id = intent
                    .target_id
                    .clone()
                    .ok_or_else(|| PlanError::MissingId(id_field.to_string()))?;
                for key in list_keys {
                    plan.patch_lists
                        .push((key.clone(), ListPatch::Remove(id.clone())));
                }
                plan.remove_detail = Some(ResourceKey::detail(family.name(), id));
            }
        }

        Ok(plan)
    }

    pub fn is_empty(&self) -> bool {
        self.patch_lists.is_empty()
            && self.set_detail.is_none()
            && self.remove_detail.is_none()
            && self.invalidate.is_empty()
            && self.invalidate_keys.is_empty()
    }
}
