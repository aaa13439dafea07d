use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    api::AssistantApi,
    error::{AssistantError, Result},
    session::SessionIdentity,
    types::FeedbackRequest,
};

pub const FALLBACK_THANKS: &str = "Thank you for your feedback!";

/// Ratings at or below this value unlock the comment box.
pub const COMMENT_MAX_RATING: u8 = 3;

/// Sends a rating and returns the message to show. Never fails: backend errors
/// degrade to a generic thank-you.
pub async fn submit_feedback(
    api: &dyn AssistantApi,
    session_id: &str,
    rating: u8,
    comment: Option<&str>,
) -> String {
    let request = FeedbackRequest {
        session_id: session_id.to_string(),
        rating,
        comment: comment
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string),
    };
    match api.submit_feedback(&request).await {
        Ok(reply) if !reply.message.trim().is_empty() => reply.message,
        Ok(_) => FALLBACK_THANKS.to_string(),
        Err(err) => {
            warn!(session_id, rating, error = %err, "feedback submit failed");
            FALLBACK_THANKS.to_string()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum FeedbackPhase {
    #[default]
    Idle,
    RatingSelected {
        rating: u8,
    },
    Submitting {
        rating: u8,
    },
    Submitted {
        message: String,
    },
    Dismissed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackState {
    pub phase: FeedbackPhase,
    pub comment: String,
}

impl FeedbackState {
    pub fn rating(&self) -> u8 {
        match self.phase {
            FeedbackPhase::RatingSelected { rating } | FeedbackPhase::Submitting { rating } => {
                rating
            }
            _ => 0,
        }
    }

    pub fn shows_comment_box(&self) -> bool {
        (1..=COMMENT_MAX_RATING).contains(&self.rating())
    }
}

/// End-of-session star rating widget.
#[derive(Clone)]
pub struct SatisfactionSurvey {
    inner: Arc<SurveyInner>,
}

struct SurveyInner {
    api: Arc<dyn AssistantApi>,
    session: Arc<SessionIdentity>,
    dismiss_after: Duration,
    state: watch::Sender<FeedbackState>,
    dismiss_timer: Mutex<Option<JoinHandle<()>>>,
}

impl SatisfactionSurvey {
    pub fn new(
        api: Arc<dyn AssistantApi>,
        session: Arc<SessionIdentity>,
        dismiss_after: Duration,
    ) -> Self {
        let (state, _) = watch::channel(FeedbackState::default());
        Self {
            inner: Arc::new(SurveyInner {
                api,
                session,
                dismiss_after,
                state,
                dismiss_timer: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> FeedbackState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedbackState> {
        self.inner.state.subscribe()
    }

    /// Returns false once the survey has moved past rating selection.
    pub fn select_rating(&self, rating: u8) -> Result<bool> {
        if !(1..=5).contains(&rating) {
            return Err(AssistantError::InvalidRating(rating));
        }
        let accepted = self.inner.state.send_if_modified(|state| match state.phase {
            FeedbackPhase::Idle | FeedbackPhase::RatingSelected { .. } => {
                state.phase = FeedbackPhase::RatingSelected { rating };
                true
            }
            _ => false,
        });
        Ok(accepted)
    }

    /// Ignored unless the current rating shows the comment box.
    pub fn set_comment(&self, comment: &str) -> bool {
        self.inner.state.send_if_modified(|state| {
            if !state.shows_comment_box() {
                return false;
            }
            state.comment = comment.to_string();
            true
        })
    }

    /// Submits the selected rating. Returns the message shown to the user, or
    /// `None` when no rating is selected.
    pub async fn submit(&self) -> Option<String> {
        let mut pending = None;
        self.inner.state.send_if_modified(|state| {
            let FeedbackPhase::RatingSelected { rating } = state.phase else {
                return false;
            };
            let comment = state.shows_comment_box().then(|| state.comment.clone());
            pending = Some((rating, comment));
            state.phase = FeedbackPhase::Submitting { rating };
            true
        });
        let (rating, comment) = pending?;

        let session_id = self.inner.session.get_or_create();
        let message = submit_feedback(
            self.inner.api.as_ref(),
            &session_id,
            rating,
            comment.as_deref(),
        )
        .await;
        info!(session_id = %session_id, rating, "feedback submitted");

        self.inner.state.send_modify(|state| {
            state.phase = FeedbackPhase::Submitted {
                message: message.clone(),
            }
        });
        self.schedule_dismiss();
        Some(message)
    }

    /// Starts a fresh survey, e.g. after the conversation was cleared.
    pub fn reset(&self) {
        self.inner.replace_timer(None);
        self.inner
            .state
            .send_modify(|state| *state = FeedbackState::default());
    }

    fn schedule_dismiss(&self) {
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.dismiss_after;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.state.send_if_modified(|state| {
                if !matches!(state.phase, FeedbackPhase::Submitted { .. }) {
                    return false;
                }
                state.phase = FeedbackPhase::Dismissed;
                true
            });
        });
        self.inner.replace_timer(Some(timer));
    }
}

impl SurveyInner {
    fn replace_timer(&self, next: Option<JoinHandle<()>>) {
        let previous = match self.dismiss_timer.lock() {
            Ok(mut timer) => std::mem::replace(&mut *timer, next),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), next),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Drop for SurveyInner {
    fn drop(&mut self) {
        let timer = match self.dismiss_timer.get_mut() {
            Ok(timer) => timer.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(timer) = timer {
            timer.abort();
        }
    }
}
