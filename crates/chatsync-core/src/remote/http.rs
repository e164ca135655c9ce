//! HTTP remote store
//!
//! JSON over HTTP against the project API:
//!
//! - `GET    {base}/projects/{id}/messages?offset=&limit=` → `{messages, total}`
//! - `POST   {base}/projects/{id}/messages` with `{messages}`
//! - `DELETE {base}/projects/{id}/messages`
//! - `GET    {base}/projects/{id}/snapshot` (404 when none)
//! - `PUT    {base}/projects/{id}/snapshot`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use tracing::debug;

use super::error::{RemoteError, RemoteResult};
use super::{Page, RemoteStore};
use crate::models::{Message, Snapshot};

/// Default per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct AppendBody<'a> {
    messages: &'a [Message],
}

/// Remote store reached over HTTP
pub struct HttpRemoteStore {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl HttpRemoteStore {
    /// Create a store for the API rooted at `base_url`
    pub fn new(base_url: &str, token: Option<String>) -> RemoteResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| RemoteError::Network(format!("invalid remote url '{}': {}", base_url, e)))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(map_reqwest_error)?;

        Ok(Self {
            client,
            base,
            token,
        })
    }

    /// Build `{base}/projects/{project_id}/{resource}` with the id escaped
    fn endpoint(&self, project_id: &str, resource: &str) -> RemoteResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Network(format!("remote url '{}' cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(["projects", project_id, resource]);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response).await
    }
}

fn map_reqwest_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else if error.is_decode() {
        RemoteError::Decode(error.to_string())
    } else {
        RemoteError::Network(error.to_string())
    }
}

async fn check_status(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(RemoteError::RateLimited { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::from_status(status.as_u16(), body))
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get_messages_page(
        &self,
        project_id: &str,
        offset: usize,
        limit: usize,
    ) -> RemoteResult<Page> {
        let url = self.endpoint(project_id, "messages")?;
        debug!("GET {} offset={} limit={}", url, offset, limit);

        let request = self
            .client
            .get(url)
            .query(&[("offset", offset), ("limit", limit)]);
        let response = self.send(request).await?;
        response.json::<Page>().await.map_err(map_reqwest_error)
    }

    async fn append_messages(&self, project_id: &str, messages: &[Message]) -> RemoteResult<()> {
        let url = self.endpoint(project_id, "messages")?;
        debug!("POST {} ({} messages)", url, messages.len());

        let request = self.client.post(url).json(&AppendBody { messages });
        self.send(request).await?;
        Ok(())
    }

    async fn clear_messages(&self, project_id: &str) -> RemoteResult<()> {
        let url = self.endpoint(project_id, "messages")?;
        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn get_snapshot(&self, project_id: &str) -> RemoteResult<Option<Snapshot>> {
        let url = self.endpoint(project_id, "snapshot")?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = check_status(response).await?;
        response
            .json::<Snapshot>()
            .await
            .map(Some)
            .map_err(map_reqwest_error)
    }

    async fn set_snapshot(&self, project_id: &str, snapshot: &Snapshot) -> RemoteResult<()> {
        let url = self.endpoint(project_id, "snapshot")?;
        self.send(self.client.put(url).json(snapshot)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_escapes_project_id() {
        let store = HttpRemoteStore::new("https://api.example.com/v1/", None).unwrap();
        let url = store.endpoint("team/app 1", "messages").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/projects/team%2Fapp%201/messages"
        );
    }

    #[test]
    fn test_endpoint_without_trailing_slash() {
        let store = HttpRemoteStore::new("https://api.example.com", None).unwrap();
        let url = store.endpoint("p1", "snapshot").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/projects/p1/snapshot");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpRemoteStore::new("not a url", None).is_err());
    }
}
