//! Scripted backend shared by the unit tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    api::AssistantApi,
    error::{AssistantError, Result},
    types::{
        ChatRequest, ChatResponse, FeedbackRequest, FeedbackResponse, SuggestionResponse,
        TicketDescriptor, TicketUpdate,
    },
};

fn offline(endpoint: &str) -> AssistantError {
    AssistantError::Status {
        endpoint: endpoint.to_string(),
        status: 503,
        body: "offline".to_string(),
    }
}

#[derive(Default)]
pub(crate) struct MockApi {
    pub chat_delay: Duration,
    pub chat_replies: Mutex<VecDeque<Option<ChatResponse>>>,
    pub chat_requests: Mutex<Vec<ChatRequest>>,

    pub suggest_delays: HashMap<String, Duration>,
    pub suggest_results: HashMap<String, SuggestionResponse>,
    pub failing_queries: HashSet<String>,
    pub suggest_calls: Mutex<Vec<String>>,

    pub starters: Mutex<Option<Vec<String>>>,
    pub starter_calls: Mutex<Vec<String>>,

    pub ticket_delay: Duration,
    pub tickets: Mutex<VecDeque<Option<TicketDescriptor>>>,
    pub ticket_fetches: Mutex<Vec<String>>,
    pub ticket_updates: Mutex<Vec<(String, TicketUpdate)>>,

    pub feedback_reply: Mutex<Option<String>>,
    pub feedback_requests: Mutex<Vec<FeedbackRequest>>,

    pub cleared_sessions: Mutex<Vec<String>>,
}

impl MockApi {
    pub fn reply_with(&self, reply: Option<ChatResponse>) {
        self.chat_replies.lock().unwrap().push_back(reply);
    }

    pub fn ticket_with(&self, ticket: Option<TicketDescriptor>) {
        self.tickets.lock().unwrap().push_back(ticket);
    }

    pub fn suggest_count(&self) -> usize {
        self.suggest_calls.lock().unwrap().len()
    }

    /// Takes the next scripted ticket before sleeping so concurrent calls
    /// cannot steal each other's replies.
    async fn next_ticket(&self, endpoint: &str) -> Result<TicketDescriptor> {
        let ticket = self.tickets.lock().unwrap().pop_front().flatten();
        if !self.ticket_delay.is_zero() {
            tokio::time::sleep(self.ticket_delay).await;
        }
        ticket.ok_or_else(|| offline(endpoint))
    }
}

#[async_trait]
impl AssistantApi for MockApi {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.chat_requests.lock().unwrap().push(request.clone());
        if !self.chat_delay.is_zero() {
            tokio::time::sleep(self.chat_delay).await;
        }
        let reply = self.chat_replies.lock().unwrap().pop_front().flatten();
        reply.ok_or_else(|| offline("chat"))
    }

    async fn suggest(&self, query: &str, _session_id: &str) -> Result<SuggestionResponse> {
        self.suggest_calls.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.suggest_delays.get(query) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing_queries.contains(query) {
            return Err(offline("suggestions"));
        }
        Ok(self
            .suggest_results
            .get(query)
            .cloned()
            .unwrap_or_else(|| SuggestionResponse {
                corrected_query: None,
                suggestions: vec![format!("{query} result")],
                intent: Some("product_search".to_string()),
            }))
    }

    async fn starter_suggestions(&self, session_id: &str) -> Result<Vec<String>> {
        self.starter_calls.lock().unwrap().push(session_id.to_string());
        self.starters
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| offline("starter suggestions"))
    }

    async fn fetch_ticket(&self, ticket_id: &str) -> Result<TicketDescriptor> {
        self.ticket_fetches.lock().unwrap().push(ticket_id.to_string());
        self.next_ticket("ticket").await
    }

    async fn update_ticket(
        &self,
        ticket_id: &str,
        update: &TicketUpdate,
    ) -> Result<TicketDescriptor> {
        self.ticket_updates
            .lock()
            .unwrap()
            .push((ticket_id.to_string(), update.clone()));
        self.next_ticket("ticket update").await
    }

    async fn submit_feedback(&self, feedback: &FeedbackRequest) -> Result<FeedbackResponse> {
        self.feedback_requests.lock().unwrap().push(feedback.clone());
        let reply = self.feedback_reply.lock().unwrap().clone();
        reply
            .map(|message| FeedbackResponse { message })
            .ok_or_else(|| offline("feedback"))
    }

    async fn clear_session(&self, session_id: &str) -> Result<()> {
        self.cleared_sessions
            .lock()
            .unwrap()
            .push(session_id.to_string());
        Ok(())
    }
}
