//! Content family descriptors.
//!
//! A descriptor tells the cache everything it needs to reconcile writes for
//! one family: where its REST resource lives, which field identifies an
//! entity, how summaries are projected, which list filters the client can
//! evaluate, and which views must always be refetched after a write.

use std::fmt;
use std::sync::Arc;

use super::keys::{EntityId, KeyParams, KeyPattern, ResourceKey, ViewKind};
use super::payload::Record;
use super::transform::ViewTransformer;

/// Parameters that select a page rather than filter the collection.
pub const PAGINATION_PARAMS: &[&str] = &["page", "per_page"];

const DEFAULT_ID_FIELD: &str = "id";

#[derive(Clone)]
pub struct FamilyDescriptor {
    name: String,
    path: String,
    id_field: String,
    transformer: Arc<dyn ViewTransformer>,
    views: Vec<ViewKind>,
    filter_fields: Vec<String>,
    invalidate_on_write: Vec<KeyPattern>,
}

impl FamilyDescriptor {
    /// A family with list and detail views served under `/{name}`.
    pub fn new(name: impl Into<String>, transformer: impl ViewTransformer + 'static) -> Self {
        let name = name.into();
        Self {
            path: format!("/{name}"),
            name,
            id_field: DEFAULT_ID_FIELD.to_string(),
            transformer: Arc::new(transformer),
            views: vec![ViewKind::List, ViewKind::Detail],
            filter_fields: Vec::new(),
            invalidate_on_write: Vec::new(),
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into().trim_end_matches('/').to_string();
        self
    }

    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Adds a server-computed featured subset, refetched after every write.
    pub fn featured(self) -> Self {
        self.derived_view(ViewKind::Featured)
    }

    /// Adds a server-computed category listing, refetched after every write.
    pub fn categories(self) -> Self {
        self.derived_view(ViewKind::Categories)
    }

    /// A list parameter the client can evaluate against a record field.
    pub fn filter_field(mut self, field: impl Into<String>) -> Self {
        self.filter_fields.push(field.into());
        self
    }

    pub fn invalidate_on_write(mut self, pattern: KeyPattern) -> Self {
        if !self.invalidate_on_write.contains(&pattern) {
            self.invalidate_on_write.push(pattern);
        }
        self
    }

    fn derived_view(mut self, view: ViewKind) -> Self {
        if !self.views.contains(&view) {
            self.views.push(view);
        }
        let pattern = KeyPattern::view(self.name.clone(), view);
        self.invalidate_on_write(pattern)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_field_name(&self) -> &str {
        &self.id_field
    }

    pub fn transformer(&self) -> &dyn ViewTransformer {
        self.transformer.as_ref()
    }

    pub fn views(&self) -> &[ViewKind] {
        &self.views
    }

    pub fn supports(&self, view: ViewKind) -> bool {
        self.views.contains(&view)
    }

    pub fn invalidations(&self) -> &[KeyPattern] {
        &self.invalidate_on_write
    }

    /// One pattern per declared view; together they cover the family.
    pub fn patterns(&self) -> Vec<KeyPattern> {
        self.views
            .iter()
            .map(|view| KeyPattern::view(self.name.clone(), *view))
            .collect()
    }

    pub fn summarize(&self, detail: &Record) -> Record {
        self.transformer.to_summary(detail)
    }

    /// REST path serving a key. `None` for a detail key without an id.
    pub fn path_for(&self, key: &ResourceKey) -> Option<String> {
        match key.view() {
            ViewKind::List => Some(self.path.clone()),
            ViewKind::Featured => Some(format!("{}/featured", self.path)),
            ViewKind::Categories => Some(format!("{}/categories", self.path)),
            ViewKind::Detail => key.entity_id().map(|id| self.item_path(&id)),
        }
    }

    pub fn collection_path(&self) -> &str {
        &self.path
    }

    pub fn item_path(&self, id: &EntityId) -> String {
        format!("{}/{id}", self.path)
    }

    /// Query parameters sent when fetching a key. Detail ids travel in the
    /// path instead.
    pub fn query_for(&self, key: &ResourceKey) -> KeyParams {
        if key.view() == ViewKind::Detail {
            return KeyParams::new();
        }
        key.params().clone()
    }

    /// Whether every parameter of a list key is pagination or a filter the
    /// client can evaluate.
    pub fn can_evaluate(&self, key: &ResourceKey) -> bool {
        key.params()
            .iter()
            .all(|(name, _)| PAGINATION_PARAMS.contains(&name) || self.is_filter(name))
    }

    /// Whether a record satisfies every filter the list key carries.
    pub fn matches_filters(&self, key: &ResourceKey, record: &Record) -> bool {
        key.params()
            .iter()
            .filter(|(name, _)| self.is_filter(name))
            .all(|(name, expected)| {
                record
                    .get(name)
                    .is_some_and(|value| expected.matches_value(value))
            })
    }

    pub fn is_filter(&self, name: &str) -> bool {
        self.filter_fields.iter().any(|field| field == name)
    }
}

impl fmt::Debug for FamilyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FamilyDescriptor")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("id_field", &self.id_field)
            .field("summary_fields", &self.transformer.fields())
            .field("views", &self.views)
            .field("filter_fields", &self.filter_fields)
            .field("invalidate_on_write", &self.invalidate_on_write)
            .finish()
    }
}
