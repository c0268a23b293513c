//! Cache entries and their freshness rules.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use super::error::ErrorInfo;
use super::payload::Payload;

/// Lifecycle status of the most recent fetch for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// How long fetched data counts as fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Staleness {
    /// Data stays fresh until something invalidates it.
    #[default]
    Never,
    After(Duration),
}

/// Snapshot of one cached view.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: Option<Arc<Payload>>,
    pub status: FetchStatus,
    pub error: Option<ErrorInfo>,
    pub fetched_at: Option<OffsetDateTime>,
    pub stale_after: Staleness,
    pub invalidated: bool,
}

impl CacheEntry {
    /// An entry that was never loaded.
    pub fn idle() -> Self {
        Self {
            data: None,
            status: FetchStatus::Idle,
            error: None,
            fetched_at: None,
            stale_after: Staleness::Never,
            invalidated: false,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(OffsetDateTime::now_utc())
    }

    /// An entry is stale when it was invalidated, has never been fetched, or
    /// outlived its staleness window. A fetch time in the future counts as
    /// fresh.
    pub fn is_stale_at(&self, now: OffsetDateTime) -> bool {
        if self.invalidated {
            return true;
        }
        let Some(fetched_at) = self.fetched_at else {
            return true;
        };
        match self.stale_after {
            Staleness::Never => false,
            Staleness::After(window) => {
                let age = now - fetched_at;
                !age.is_negative() && age.unsigned_abs() >= window
            }
        }
    }

    /// Holds data that may be served without a refetch.
    pub fn is_fresh(&self) -> bool {
        self.data.is_some() && !self.is_stale()
    }

    pub fn is_loading(&self) -> bool {
        self.status == FetchStatus::Loading
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.data.as_deref()
    }
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self::idle()
    }
}
