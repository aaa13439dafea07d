use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    api::AssistantApi,
    escalation::EscalationWorkflow,
    session::SessionIdentity,
    types::{
        CartPreview, CategorySuggestion, ChatMessage, ChatRequest, ChatResponse, OrderStatusCard,
        Product, SentimentReading,
    },
};

pub const DISPATCH_ERROR: &str = "Failed to send message. Please try again.";
pub const FALLBACK_REPLY: &str =
    "Sorry, I'm having trouble connecting right now. Please try again in a moment.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DispatchState {
    #[default]
    Idle,
    Sending {
        session_id: String,
    },
}

/// Everything the chat surfaces render from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationSnapshot {
    pub messages: Vec<ChatMessage>,
    pub dispatch: DispatchState,
    pub suggestions: Vec<String>,
    pub recommended_products: Vec<Product>,
    pub recommended_categories: Vec<CategorySuggestion>,
    pub cart_preview: Option<CartPreview>,
    pub order_status: Option<OrderStatusCard>,
    pub sentiment: Option<SentimentReading>,
    pub error: Option<String>,
}

impl ConversationSnapshot {
    pub fn is_loading(&self) -> bool {
        matches!(self.dispatch, DispatchState::Sending { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing to send after trimming.
    Empty,
    /// Another dispatch is still in flight.
    Busy,
    Replied,
    Failed,
}

/// The conversation store shared by every chat surface. Clones share state.
#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    api: Arc<dyn AssistantApi>,
    session: Arc<SessionIdentity>,
    escalation: EscalationWorkflow,
    state: watch::Sender<ConversationSnapshot>,
}

impl ConversationStore {
    pub fn new(
        api: Arc<dyn AssistantApi>,
        session: Arc<SessionIdentity>,
        escalation: EscalationWorkflow,
    ) -> Self {
        let (state, _) = watch::channel(ConversationSnapshot::default());
        Self {
            inner: Arc::new(StoreInner {
                api,
                session,
                escalation,
                state,
            }),
        }
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn escalation(&self) -> &EscalationWorkflow {
        &self.inner.escalation
    }

    pub fn session_id(&self) -> String {
        self.inner.session.get_or_create()
    }

    pub async fn send_message(&self, content: &str) -> SendOutcome {
        let content = content.trim();
        if content.is_empty() {
            return SendOutcome::Empty;
        }

        let session_id = self.inner.session.get_or_create();
        let mut history = None;
        self.inner.state.send_if_modified(|state| {
            if state.is_loading() {
                return false;
            }
            state.messages.push(ChatMessage::user(content));
            state.dispatch = DispatchState::Sending {
                session_id: session_id.clone(),
            };
            state.error = None;
            history = Some(state.messages.clone());
            true
        });
        let Some(messages) = history else {
            debug!("send ignored while a reply is pending");
            return SendOutcome::Busy;
        };

        let request = ChatRequest {
            messages,
            session_id: session_id.clone(),
        };
        match self.inner.api.chat(&request).await {
            Ok(reply) => {
                self.apply_reply(&session_id, reply);
                SendOutcome::Replied
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "chat dispatch failed");
                self.inner.state.send_modify(|state| {
                    state.error = Some(DISPATCH_ERROR.to_string());
                    state.messages.push(ChatMessage::assistant(FALLBACK_REPLY));
                    state.dispatch = DispatchState::Idle;
                });
                SendOutcome::Failed
            }
        }
    }

    fn apply_reply(&self, sent_with: &str, reply: ChatResponse) {
        if let Some(server_id) = reply.session_id.as_deref() {
            if server_id != sent_with && self.inner.session.adopt(server_id) {
                info!(
                    from = %sent_with,
                    to = %server_id,
                    "backend moved the conversation to a new session"
                );
            }
        }
        if let Some(sentiment) = &reply.sentiment {
            debug!(label = %sentiment.label, score = sentiment.score, "reply sentiment");
        }
        if let Some(ticket) = &reply.escalation {
            self.inner.escalation.apply(ticket);
        }

        self.inner.state.send_modify(|state| {
            state.messages.push(ChatMessage::assistant(reply.message));
            if let Some(suggestions) = reply.suggestions {
                state.suggestions = suggestions;
            }
            if let Some(products) = reply.recommended_products {
                state.recommended_products = products;
            }
            if let Some(categories) = reply.categories {
                state.recommended_categories = categories;
            }
            if reply.cart_preview.is_some() {
                state.cart_preview = reply.cart_preview;
            }
            if reply.order_status.is_some() {
                state.order_status = reply.order_status;
            }
            if reply.sentiment.is_some() {
                state.sentiment = reply.sentiment;
            }
            state.dispatch = DispatchState::Idle;
        });
    }

    /// Fetches conversation starters for the current session. Failures keep
    /// whatever suggestions are already shown.
    pub async fn load_suggestions(&self) -> bool {
        let session_id = self.inner.session.get_or_create();
        match self.inner.api.starter_suggestions(&session_id).await {
            Ok(suggestions) => {
                self.inner
                    .state
                    .send_modify(|state| state.suggestions = suggestions);
                true
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "failed to load suggestions");
                false
            }
        }
    }

    /// Starts over on a fresh session. Ignored while a reply is pending.
    pub async fn clear_chat(&self) -> bool {
        let previous = self.inner.session.current();
        let cleared = self.inner.state.send_if_modified(|state| {
            if state.is_loading() {
                return false;
            }
            *state = ConversationSnapshot::default();
            true
        });
        if !cleared {
            debug!("clear ignored while a reply is pending");
            return false;
        }

        self.inner.escalation.reset();
        let session_id = self.inner.session.rotate();
        info!(session_id = %session_id, "conversation cleared");

        if let Some(previous) = previous {
            if let Err(err) = self.inner.api.clear_session(&previous).await {
                warn!(session_id = %previous, error = %err, "failed to release old session");
            }
        }
        self.load_suggestions().await;
        true
    }
}
