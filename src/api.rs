use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    config::AssistantConfig,
    error::{AssistantError, Result},
    types::{
        ChatRequest, ChatResponse, FeedbackRequest, FeedbackResponse, StarterSuggestions,
        SuggestionResponse, TicketDescriptor, TicketUpdate,
    },
};

/// Backend capabilities consumed by the assistant components.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    async fn suggest(&self, query: &str, session_id: &str) -> Result<SuggestionResponse>;

    async fn starter_suggestions(&self, session_id: &str) -> Result<Vec<String>>;

    async fn fetch_ticket(&self, ticket_id: &str) -> Result<TicketDescriptor>;

    async fn update_ticket(&self, ticket_id: &str, update: &TicketUpdate)
        -> Result<TicketDescriptor>;

    async fn submit_feedback(&self, feedback: &FeedbackRequest) -> Result<FeedbackResponse>;

    async fn clear_session(&self, session_id: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HttpAssistantApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpAssistantApi {
    pub fn new(config: &AssistantConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(
            client,
            &config.api_base_url,
            config.api_token.clone(),
        ))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Base URL plus `segments`, each percent-encoded as a single path segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| AssistantError::config(format!("invalid api url: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| AssistantError::config("api url cannot take a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let builder = self.client.request(method, self.url(segments)?);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn send(&self, endpoint: &str, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        debug!(endpoint, status = status.as_u16(), "backend replied");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        builder: RequestBuilder,
    ) -> Result<T> {
        let response = self.send(endpoint, builder).await?;
        let body = response.bytes().await?;
        serde_json::from_slice::<T>(&body).map_err(|err| AssistantError::InvalidResponse {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        })
    }
}

#[async_trait]
impl AssistantApi for HttpAssistantApi {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let builder = self.request(Method::POST, &["chatbot", "chat"])?.json(request);
        self.send_json("chat", builder).await
    }

    async fn suggest(&self, query: &str, session_id: &str) -> Result<SuggestionResponse> {
        let builder = self
            .request(Method::GET, &["search", "suggestions"])?
            .query(&[("q", query), ("sessionId", session_id)]);
        self.send_json("suggestions", builder).await
    }

    async fn starter_suggestions(&self, session_id: &str) -> Result<Vec<String>> {
        let builder = self
            .request(Method::GET, &["chatbot", "suggestions"])?
            .query(&[("sessionId", session_id)]);
        let starters: StarterSuggestions = self.send_json("starter suggestions", builder).await?;
        Ok(starters.suggestions)
    }

    async fn fetch_ticket(&self, ticket_id: &str) -> Result<TicketDescriptor> {
        let builder = self.request(Method::GET, &["chatbot", "tickets", ticket_id])?;
        self.send_json("ticket", builder).await
    }

    async fn update_ticket(
        &self,
        ticket_id: &str,
        update: &TicketUpdate,
    ) -> Result<TicketDescriptor> {
        let builder = self
            .request(Method::PATCH, &["chatbot", "tickets", ticket_id])?
            .json(update);
        self.send_json("ticket update", builder).await
    }

    async fn submit_feedback(&self, feedback: &FeedbackRequest) -> Result<FeedbackResponse> {
        let builder = self
            .request(Method::POST, &["chatbot", "feedback"])?
            .json(feedback);
        self.send_json("feedback", builder).await
    }

    async fn clear_session(&self, session_id: &str) -> Result<()> {
        let builder = self.request(Method::DELETE, &["chatbot", "session", session_id])?;
        self.send("clear session", builder).await?;
        Ok(())
    }
}
