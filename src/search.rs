use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use reqwest::Url;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    api::AssistantApi, error::Result, session::SessionIdentity, types::SuggestionResponse,
};

pub const MIN_QUERY_CHARS: usize = 2;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuggestionState {
    pub raw_query: String,
    pub debounced_query: String,
    pub corrected_query: String,
    pub suggestions: Vec<String>,
    pub intent: Option<String>,
    pub is_loading: bool,
    pub is_open: bool,
}

impl SuggestionState {
    /// Spelling correction worth offering for what is currently typed.
    pub fn did_you_mean(&self) -> Option<&str> {
        let corrected = self.corrected_query.trim();
        if corrected.is_empty() || corrected.to_lowercase() == self.raw_query.trim().to_lowercase()
        {
            return None;
        }
        Some(corrected)
    }

    fn search_target(&self) -> Option<String> {
        let typed = self.raw_query.trim();
        if typed.is_empty() {
            return None;
        }
        // a correction only belongs to the query it was fetched for
        if typed != self.debounced_query.trim() {
            return Some(typed.to_string());
        }
        Some(self.did_you_mean().unwrap_or(typed).to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchNavigation {
    pub query: String,
}

impl SearchNavigation {
    pub fn path(&self) -> String {
        let Ok(mut url) = Url::parse("app:/search") else {
            return format!("/search?q={}", self.query);
        };
        url.query_pairs_mut().append_pair("q", &self.query);
        format!("{}?{}", url.path(), url.query().unwrap_or_default())
    }
}

/// Smart search bar backend: debounces keystrokes into suggestion requests
/// and only ever applies the reply for the latest settled query.
#[derive(Clone)]
pub struct SmartSearch {
    inner: Arc<SearchInner>,
}

struct SearchInner {
    api: Arc<dyn AssistantApi>,
    session: Arc<SessionIdentity>,
    delay: Duration,
    state: watch::Sender<SuggestionState>,
    keystrokes: AtomicU64,
    requests: AtomicU64,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl SmartSearch {
    pub fn new(api: Arc<dyn AssistantApi>, session: Arc<SessionIdentity>, delay: Duration) -> Self {
        let (state, _) = watch::channel(SuggestionState::default());
        Self {
            inner: Arc::new(SearchInner {
                api,
                session,
                delay,
                state,
                keystrokes: AtomicU64::new(0),
                requests: AtomicU64::new(0),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> SuggestionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SuggestionState> {
        self.inner.state.subscribe()
    }

    /// Records a keystroke and restarts the debounce timer.
    pub fn on_input(&self, text: &str) {
        self.inner
            .state
            .send_modify(|state| state.raw_query = text.to_string());

        let keystroke = self.inner.keystrokes.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.settle(keystroke);
            }
        });
        self.inner.replace_timer(Some(timer));
    }

    /// Reopens the dropdown when it still has something to show.
    pub fn focus(&self) {
        self.inner.state.send_if_modified(|state| {
            let open = !state.suggestions.is_empty()
                && state.debounced_query.trim().chars().count() >= MIN_QUERY_CHARS;
            let changed = state.is_open != open;
            state.is_open = open;
            changed
        });
    }

    pub fn close(&self) {
        self.inner.state.send_if_modified(|state| {
            let changed = state.is_open;
            state.is_open = false;
            changed
        });
    }

    /// Enter key or search icon.
    pub fn submit(&self) -> Option<SearchNavigation> {
        let target = self.inner.state.borrow().search_target();
        self.inner.cancel_pending();
        self.close();
        target.map(|query| SearchNavigation { query })
    }

    pub fn select_suggestion(&self, suggestion: &str) -> Option<SearchNavigation> {
        let suggestion = suggestion.trim();
        self.inner.cancel_pending();
        self.inner.state.send_modify(|state| {
            state.raw_query = suggestion.to_string();
            state.is_open = false;
        });
        if suggestion.is_empty() {
            return None;
        }
        Some(SearchNavigation {
            query: suggestion.to_string(),
        })
    }
}

impl SearchInner {
    fn replace_timer(&self, next: Option<JoinHandle<()>>) {
        let previous = match self.timer.lock() {
            Ok(mut timer) => std::mem::replace(&mut *timer, next),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), next),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Drops the pending debounce and marks in-flight replies as stale.
    fn cancel_pending(&self) {
        self.replace_timer(None);
        self.keystrokes.fetch_add(1, Ordering::SeqCst);
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.state.send_if_modified(|state| {
            let changed = state.is_loading;
            state.is_loading = false;
            changed
        });
    }

    fn settle(self: &Arc<Self>, keystroke: u64) {
        if self.keystrokes.load(Ordering::SeqCst) != keystroke {
            return;
        }

        let mut query = None;
        self.state.send_modify(|state| {
            state.debounced_query = state.raw_query.clone();
            if state.debounced_query.trim().chars().count() < MIN_QUERY_CHARS {
                state.suggestions.clear();
                state.corrected_query.clear();
                state.intent = None;
                state.is_open = false;
                state.is_loading = false;
            } else {
                state.is_loading = true;
                query = Some(state.debounced_query.clone());
            }
        });
        let Some(query) = query else {
            return;
        };

        let request = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = self.session.get_or_create();
        let api = self.api.clone();
        let weak: Weak<SearchInner> = Arc::downgrade(self);
        debug!(query = %query, request, "fetching suggestions");

        tokio::spawn(async move {
            let result = api.suggest(query.trim(), &session_id).await;
            if let Some(inner) = weak.upgrade() {
                inner.apply(request, &query, result);
            }
        });
    }

    fn apply(&self, request: u64, query: &str, result: Result<SuggestionResponse>) {
        let latest = self.requests.load(Ordering::SeqCst);
        self.state.send_if_modified(|state| {
            if state.debounced_query != query || latest != request {
                debug!(query = %query, request, latest, "discarding stale suggestions");
                return false;
            }

            state.is_loading = false;
            match result {
                Ok(reply) => {
                    state.suggestions = reply.suggestions;
                    state.corrected_query = reply.corrected_query.unwrap_or_default();
                    state.intent = reply.intent;
                    state.is_open = true;
                }
                Err(err) => warn!(query = %query, error = %err, "suggestion fetch failed"),
            }
            true
        });
    }
}

impl Drop for SearchInner {
    fn drop(&mut self) {
        let timer = match self.timer.get_mut() {
            Ok(timer) => timer.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(timer) = timer {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockApi;
    use tokio::time::sleep;

    const DEBOUNCE: Duration = Duration::from_millis(400);

    fn search_with(api: MockApi) -> (SmartSearch, Arc<MockApi>) {
        let api = Arc::new(api);
        let search = SmartSearch::new(
            api.clone(),
            Arc::new(SessionIdentity::in_memory()),
            DEBOUNCE,
        );
        (search, api)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_keystrokes_issues_one_request() {
        let (search, api) = search_with(MockApi::default());

        for text in ["r", "ri", "ric"] {
            search.on_input(text);
            sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(api.suggest_count(), 0);
        assert_eq!(search.state().raw_query, "ric");

        sleep(Duration::from_millis(500)).await;
        assert_eq!(*api.suggest_calls.lock().unwrap(), vec!["ric".to_string()]);
        let state = search.state();
        assert_eq!(state.debounced_query, "ric");
        assert_eq!(state.suggestions, vec!["ric result".to_string()]);
        assert!(state.is_open);
        assert!(!state.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_for_superseded_query_is_discarded() {
        let mut api = MockApi::default();
        api.suggest_delays
            .insert("ric".to_string(), Duration::from_millis(1000));
        api.suggest_delays
            .insert("rice".to_string(), Duration::from_millis(100));
        let (search, api) = search_with(api);

        search.on_input("ric");
        sleep(Duration::from_millis(450)).await;
        assert!(search.state().is_loading);

        search.on_input("rice");
        sleep(Duration::from_millis(600)).await;
        assert_eq!(search.state().suggestions, vec!["rice result".to_string()]);

        // "ric" answers last
        sleep(Duration::from_millis(1000)).await;
        assert_eq!(api.suggest_count(), 2);
        let state = search.state();
        assert_eq!(state.suggestions, vec!["rice result".to_string()]);
        assert_eq!(state.debounced_query, "rice");
        assert!(!state.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn short_query_clears_without_request() {
        let (search, api) = search_with(MockApi::default());

        search.on_input("ric");
        sleep(Duration::from_millis(500)).await;
        assert!(search.state().is_open);

        search.on_input("r");
        sleep(Duration::from_millis(500)).await;
        let state = search.state();
        assert_eq!(api.suggest_count(), 1);
        assert!(state.suggestions.is_empty());
        assert!(!state.is_open);
        assert!(!state.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_previous_suggestions() {
        let mut api = MockApi::default();
        api.failing_queries.insert("rice".to_string());
        let (search, _api) = search_with(api);

        search.on_input("ric");
        sleep(Duration::from_millis(500)).await;
        search.on_input("rice");
        sleep(Duration::from_millis(500)).await;

        let state = search.state();
        assert_eq!(state.suggestions, vec!["ric result".to_string()]);
        assert!(!state.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn did_you_mean_and_selecting_a_suggestion() {
        let mut api = MockApi::default();
        api.suggest_results.insert(
            "ric".to_string(),
            SuggestionResponse {
                corrected_query: Some("rice".to_string()),
                suggestions: vec!["rice 5kg".to_string(), "rice basmati".to_string()],
                intent: Some("product_search".to_string()),
            },
        );
        let (search, _api) = search_with(api);

        search.on_input("ric");
        sleep(Duration::from_millis(500)).await;

        let state = search.state();
        assert!(state.is_open);
        assert_eq!(state.did_you_mean(), Some("rice"));
        assert_eq!(state.suggestions.len(), 2);
        assert_eq!(state.intent.as_deref(), Some("product_search"));

        let nav = search.select_suggestion("rice basmati").unwrap();
        assert_eq!(nav.query, "rice basmati");
        assert_eq!(nav.path(), "/search?q=rice+basmati");
        assert!(!search.state().is_open);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_prefers_correction_and_cancels_pending_fetch() {
        let mut api = MockApi::default();
        api.suggest_results.insert(
            "ric".to_string(),
            SuggestionResponse {
                corrected_query: Some("rice".to_string()),
                suggestions: vec!["rice 5kg".to_string()],
                intent: None,
            },
        );
        let (search, api) = search_with(api);

        search.on_input("ric");
        sleep(Duration::from_millis(500)).await;
        assert_eq!(search.submit().unwrap().query, "rice");

        search.on_input("milk");
        let nav = search.submit().unwrap();
        assert_eq!(nav.query, "milk");
        sleep(Duration::from_millis(500)).await;
        assert_eq!(api.suggest_count(), 1);
        assert!(!search.state().is_open);
    }

    #[test]
    fn correction_matching_typed_text_is_not_offered() {
        let state = SuggestionState {
            raw_query: "Rice".to_string(),
            corrected_query: "rice".to_string(),
            ..Default::default()
        };
        assert_eq!(state.did_you_mean(), None);
        assert_eq!(state.search_target().as_deref(), Some("Rice"));

        let empty = SuggestionState::default();
        assert_eq!(empty.search_target(), None);
    }
}
