//! Projection of full entities onto the summary shape held by list views.

use serde_json::Value;

use super::payload::Record;

/// Derives the summary view of an entity from its detail view.
pub trait ViewTransformer: Send + Sync {
    /// Total and pure: every allow-listed field is present in the output.
    fn to_summary(&self, detail: &Record) -> Record;

    /// The fields a summary carries.
    fn fields(&self) -> &[&'static str];
}

/// Summary built from an explicit field allow-list. Fields missing from the
/// detail are emitted as `null`; nothing outside the list leaks through.
#[derive(Debug, Clone, Copy)]
pub struct SummaryProjection {
    fields: &'static [&'static str],
}

impl SummaryProjection {
    pub const fn new(fields: &'static [&'static str]) -> Self {
        Self { fields }
    }
}

impl ViewTransformer for SummaryProjection {
    fn to_summary(&self, detail: &Record) -> Record {
        self.fields
            .iter()
            .map(|field| {
                let value = detail.get(*field).cloned().unwrap_or(Value::Null);
                ((*field).to_string(), value)
            })
            .collect()
    }

    fn fields(&self) -> &[&'static str] {
        self.fields
    }
}
