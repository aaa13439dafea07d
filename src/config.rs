use std::{env, time::Duration};

use crate::error::{AssistantError, Result};

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
    pub search_debounce: Duration,
    pub agent_viewing_delay: Duration,
    pub feedback_dismiss_delay: Duration,
    pub ticket_poll_interval: Duration,
    /// Send a best-effort ticket update when the customer cancels a handoff.
    pub notify_ticket_cancel: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            request_timeout: Duration::from_secs(30),
            search_debounce: Duration::from_millis(400),
            agent_viewing_delay: Duration::from_millis(3000),
            feedback_dismiss_delay: Duration::from_millis(3000),
            ticket_poll_interval: Duration::from_secs(10),
            notify_ticket_cancel: true,
        }
    }
}

impl AssistantConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let api_base_url = lookup("ASSISTANT_API_URL")
            .unwrap_or(defaults.api_base_url)
            .trim()
            .trim_end_matches('/')
            .to_string();
        if api_base_url.is_empty() {
            return Err(AssistantError::config("ASSISTANT_API_URL is empty"));
        }

        let api_token = lookup("ASSISTANT_API_TOKEN")
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        // zero would spin the poller and disable debouncing, so it counts as unset
        let positive = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
        };
        let millis = |key: &str, fallback: Duration| {
            positive(key).map(Duration::from_millis).unwrap_or(fallback)
        };
        let secs = |key: &str, fallback: Duration| {
            positive(key).map(Duration::from_secs).unwrap_or(fallback)
        };

        let notify_ticket_cancel = lookup("NOTIFY_TICKET_CANCEL")
            .map(|v| {
                let v = v.trim().to_ascii_lowercase();
                !matches!(v.as_str(), "0" | "false" | "no" | "off")
            })
            .unwrap_or(defaults.notify_ticket_cancel);

        Ok(Self {
            api_base_url,
            api_token,
            request_timeout: secs("ASSISTANT_REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            search_debounce: millis("SEARCH_DEBOUNCE_MS", defaults.search_debounce),
            agent_viewing_delay: millis("AGENT_VIEWING_DELAY_MS", defaults.agent_viewing_delay),
            feedback_dismiss_delay: millis("FEEDBACK_DISMISS_MS", defaults.feedback_dismiss_delay),
            ticket_poll_interval: secs("TICKET_POLL_INTERVAL_SECS", defaults.ticket_poll_interval),
            notify_ticket_cancel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = AssistantConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, AssistantConfig::default());
        assert_eq!(config.search_debounce, Duration::from_millis(400));
    }

    #[test]
    fn reads_overrides_and_trims_url() {
        let config = AssistantConfig::from_lookup(lookup_from(&[
            ("ASSISTANT_API_URL", "https://shop.example/api/"),
            ("ASSISTANT_API_TOKEN", "  secret "),
            ("SEARCH_DEBOUNCE_MS", "250"),
            ("TICKET_POLL_INTERVAL_SECS", "abc"),
            ("NOTIFY_TICKET_CANCEL", "off"),
        ]))
        .unwrap();

        assert_eq!(config.api_base_url, "https://shop.example/api");
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.search_debounce, Duration::from_millis(250));
        assert_eq!(config.ticket_poll_interval, Duration::from_secs(10));
        assert!(!config.notify_ticket_cancel);
    }

    #[test]
    fn zero_durations_fall_back_to_defaults() {
        let config = AssistantConfig::from_lookup(lookup_from(&[
            ("TICKET_POLL_INTERVAL_SECS", "0"),
            ("SEARCH_DEBOUNCE_MS", " 0 "),
            ("ASSISTANT_REQUEST_TIMEOUT_SECS", "0"),
            ("FEEDBACK_DISMISS_MS", "1500"),
        ]))
        .unwrap();

        assert_eq!(config.ticket_poll_interval, Duration::from_secs(10));
        assert_eq!(config.search_debounce, Duration::from_millis(400));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.feedback_dismiss_delay, Duration::from_millis(1500));
    }

    #[test]
    fn empty_url_is_rejected() {
        let err = AssistantConfig::from_lookup(lookup_from(&[("ASSISTANT_API_URL", " / ")]))
            .unwrap_err();
        assert!(matches!(err, AssistantError::Config(_)));
    }
}
