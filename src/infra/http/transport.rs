use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::{KeyParams, Payload, Record, RemoteError};

/// HTTP verbs used for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMethod {
    Post,
    Put,
    Delete,
}

impl WriteMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for WriteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request/response boundary to the remote store. Bodies come back already
/// normalized and failures already classified.
///
/// `RemoteError::UnexpectedShape` is only reported for a success status: on
/// a write it means the remote committed the change but its body could not
/// be read.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn read(&self, path: &str, params: &KeyParams) -> Result<Payload, RemoteError>;

    async fn write(
        &self,
        method: WriteMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Record>, RemoteError>;
}
