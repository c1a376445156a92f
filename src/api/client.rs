//! HTTP client for the course bot backend

use super::types::{HistoryPayload, NewPrompt};
use super::{ApiError, ByteStream};
use crate::history::{BotId, History, Prompt, PromptId};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER};
use reqwest::{Client, RequestBuilder};
use std::time::Duration;

const CSRF_HEADER: &str = "X-CSRFToken";

/// Client for the `/api/bots/...` endpoints
#[derive(Clone)]
pub struct CourseBotClient {
    client: Client,
    base_url: String,
    session_id: Option<String>,
    request_timeout: Duration,
}

impl CourseBotClient {
    pub fn new(
        base_url: &str,
        session_id: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = base_url.trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        let referer = HeaderValue::from_str(&format!("{base_url}/"))
            .map_err(|e| ApiError::unknown(format!("Invalid base URL: {e}")))?;
        headers.insert(REFERER, referer);

        // No client-wide timeout: it would also cut off long response streams
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            session_id,
            request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Attach the session and CSRF cookies Django expects next to the header
    fn with_credentials(&self, builder: RequestBuilder, csrf_token: Option<&str>) -> RequestBuilder {
        let mut cookies = Vec::new();
        if let Some(session_id) = &self.session_id {
            cookies.push(format!("sessionid={session_id}"));
        }
        if let Some(token) = csrf_token {
            cookies.push(format!("csrftoken={token}"));
        }

        let builder = match csrf_token {
            Some(token) => builder.header(CSRF_HEADER, token),
            None => builder,
        };
        if cookies.is_empty() {
            builder
        } else {
            builder.header(COOKIE, cookies.join("; "))
        }
    }

    async fn send(builder: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(&e))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// `GET /api/bots/{bot}/history/`
    pub async fn fetch_history(&self, bot_id: BotId) -> Result<History, ApiError> {
        let request = self
            .client
            .get(self.url(&format!("/api/bots/{bot_id}/history/")))
            .timeout(self.request_timeout);
        let response = Self::send(self.with_credentials(request, None)).await?;

        let payload: HistoryPayload = response
            .json()
            .await
            .map_err(|e| ApiError::decode(format!("Failed to parse history: {e}")))?;
        Ok(payload.into_history())
    }

    /// `POST /api/bots/{bot}/prompts/`
    pub async fn create_prompt(
        &self,
        bot_id: BotId,
        body: &str,
        csrf_token: &str,
    ) -> Result<Prompt, ApiError> {
        let request = self
            .client
            .post(self.url(&format!("/api/bots/{bot_id}/prompts/")))
            .timeout(self.request_timeout)
            .json(&NewPrompt { body });
        let response = Self::send(self.with_credentials(request, Some(csrf_token))).await?;

        response
            .json()
            .await
            .map_err(|e| ApiError::decode(format!("Failed to parse created prompt: {e}")))
    }

    /// `POST /api/bots/{bot}/prompts/{prompt}/response/`, returning the raw body stream
    pub async fn open_response_stream(
        &self,
        bot_id: BotId,
        prompt_id: PromptId,
        csrf_token: &str,
    ) -> Result<ByteStream, ApiError> {
        let request = self
            .client
            .post(self.url(&format!("/api/bots/{bot_id}/prompts/{prompt_id}/response/")));
        let response = Self::send(self.with_credentials(request, Some(csrf_token))).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ApiError::network(format!("Stream interrupted: {e}"))))
            .boxed())
    }
}
