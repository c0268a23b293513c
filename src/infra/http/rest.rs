use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use crate::cache::{KeyParams, Payload, Record, RemoteError};
use crate::config::ApiSettings;
use crate::infra::error::InfraError;

use super::transport::{Transport, WriteMethod};

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// [`Transport`] over HTTPS with bearer-token authentication.
#[derive(Clone, Debug)]
pub struct RestTransport {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl RestTransport {
    pub fn new(base: Url, token: Option<String>, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base,
            token,
        })
    }

    pub fn from_settings(settings: &ApiSettings) -> Result<Self, InfraError> {
        Self::new(
            settings.base_url.clone(),
            settings.token.clone(),
            settings.timeout,
        )
    }

    pub fn user_agent() -> &'static str {
        concat!("cms-cache/", env!("CARGO_PKG_VERSION"))
    }

    fn url(&self, path: &str, params: Option<&KeyParams>) -> Result<Url, RemoteError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|err| RemoteError::network(format!("invalid request path `{path}`: {err}")))?;
        if let Some(params) = params.filter(|params| !params.is_empty()) {
            url.set_query(None);
            let mut query = url.query_pairs_mut();
            for (name, value) in params.query_pairs() {
                query.append_pair(&name, &value);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match self.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn handle(response: Response) -> Result<Value, RemoteError> {
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RemoteError::network(err.to_string()))?;
        if !status.is_success() {
            return Err(classify(status, &String::from_utf8_lossy(&bytes)));
        }
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| RemoteError::unexpected_shape(format!("failed to parse body: {err}")))
    }
}

#[async_trait]
impl Transport for RestTransport {
    async fn read(&self, path: &str, params: &KeyParams) -> Result<Payload, RemoteError> {
        let url = self.url(path, Some(params))?;
        debug!(url = %url, "GET");
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|err| RemoteError::network(err.to_string()))?;
        Payload::from_json(Self::handle(response).await?)
    }

    async fn write(
        &self,
        method: WriteMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Record>, RemoteError> {
        let url = self.url(path, None)?;
        debug!(url = %url, method = %method, "Write");
        let method = match method {
            WriteMethod::Post => Method::POST,
            WriteMethod::Put => Method::PUT,
            WriteMethod::Delete => Method::DELETE,
        };
        let mut request = self.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| RemoteError::network(err.to_string()))?;
        Payload::entity_from_json(Self::handle(response).await?)
    }
}

/// Map a non-success status onto the error taxonomy.
pub(crate) fn classify(status: StatusCode, body: &str) -> RemoteError {
    let message = format!("status {status}: {}", error_message(body));
    match status.as_u16() {
        401 | 403 => RemoteError::Auth(message),
        404 => RemoteError::NotFound(message),
        400 | 409 | 422 => RemoteError::Validation(message),
        _ => RemoteError::Network(message),
    }
}

/// Prefer the backend's `message` field; fall back to the truncated body.
fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    if let Some(message) = parsed
        .as_ref()
        .and_then(|value| value.get("message"))
        .and_then(Value::as_str)
    {
        return truncate_body(message);
    }
    truncate_body(body)
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        None => body.to_string(),
        Some((cut, _)) => format!(
            "{}... (truncated, {} total bytes)",
            &body[..cut],
            body.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_onto_the_taxonomy() {
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, ""),
            RemoteError::Auth(_)
        ));
        assert!(matches!(
            classify(StatusCode::FORBIDDEN, ""),
            RemoteError::Auth(_)
        ));
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, ""),
            RemoteError::NotFound(_)
        ));
        assert!(matches!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, ""),
            RemoteError::Validation(_)
        ));
        assert!(matches!(
            classify(StatusCode::CONFLICT, ""),
            RemoteError::Validation(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, ""),
            RemoteError::Network(_)
        ));
    }

    #[test]
    fn backend_message_is_preferred() {
        let error = classify(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message": "The name field is required.", "errors": {}}"#,
        );
        assert_eq!(
            error.message(),
            "status 422 Unprocessable Entity: The name field is required."
        );
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        let truncated = truncate_body(&body);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.ends_with("(truncated, 520 total bytes)"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let body = "é".repeat(MAX_ERROR_BODY_LENGTH + 1);
        let truncated = truncate_body(&body);
        assert!(truncated.contains("truncated"));
    }

    #[test]
    fn query_comes_from_key_params() {
        let transport = RestTransport::new(
            Url::parse("https://cms.example.test/").expect("url"),
            None,
            Duration::from_secs(5),
        )
        .expect("transport");
        let params = KeyParams::new().with("per_page", 10_i64).with("page", 2_i64);

        let url = transport
            .url("/api/admin/news", Some(&params))
            .expect("url");

        assert_eq!(
            url.as_str(),
            "https://cms.example.test/api/admin/news?page=2&per_page=10"
        );
    }
}
