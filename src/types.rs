use chrono::Utc;
use serde::{Deserialize, Serialize};

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One immutable turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_millis(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub discount_price: Option<f64>,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_in_stock")]
    pub in_stock: bool,
}

fn default_in_stock() -> bool {
    true
}

impl Product {
    pub fn effective_price(&self) -> f64 {
        self.discount_price
            .filter(|price| *price < self.price)
            .unwrap_or(self.price)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySuggestion {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub product_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartPreview {
    #[serde(default)]
    pub items: Vec<CartItem>,
    pub total: f64,
}

impl CartPreview {
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusCard {
    pub order_id: String,
    pub status: String,
    #[serde(default)]
    pub estimated_delivery: Option<String>,
    #[serde(default)]
    pub total: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentReading {
    pub label: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    /// Wait time shown to the customer while a ticket is queued.
    pub fn indicative_wait(self) -> &'static str {
        match self {
            TicketPriority::Urgent => "< 2 min",
            TicketPriority::High => "< 5 min",
            TicketPriority::Medium => "< 10 min",
            TicketPriority::Low => "< 15 min",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Pending,
    Assigned,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub session_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub message: String,
    #[serde(default)]
    pub suggestions: Option<Vec<String>>,
    #[serde(default)]
    pub recommended_products: Option<Vec<Product>>,
    #[serde(default)]
    pub categories: Option<Vec<CategorySuggestion>>,
    #[serde(default)]
    pub cart_preview: Option<CartPreview>,
    #[serde(default)]
    pub order_status: Option<OrderStatusCard>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub escalation: Option<TicketDescriptor>,
    #[serde(default)]
    pub sentiment: Option<SentimentReading>,
}

impl ChatResponse {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionResponse {
    #[serde(default)]
    pub corrected_query: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub intent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarterSuggestions {
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub session_id: String,
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_response_tolerates_missing_payloads() {
        let parsed: ChatResponse = serde_json::from_value(json!({
            "message": "Here are some snacks",
            "recommendedProducts": [
                { "id": "p1", "name": "Chips", "price": 120.0 }
            ],
            "escalation": { "priority": "high", "status": "pending" }
        }))
        .unwrap();

        assert_eq!(parsed.message, "Here are some snacks");
        assert!(parsed.suggestions.is_none());
        let products = parsed.recommended_products.unwrap();
        assert!(products[0].in_stock);
        let ticket = parsed.escalation.unwrap();
        assert_eq!(ticket.id, None);
        assert_eq!(ticket.priority, TicketPriority::High);
    }

    #[test]
    fn priority_wait_table() {
        assert_eq!(TicketPriority::Urgent.indicative_wait(), "< 2 min");
        assert_eq!(TicketPriority::High.indicative_wait(), "< 5 min");
        assert_eq!(TicketPriority::Medium.indicative_wait(), "< 10 min");
        assert_eq!(TicketPriority::Low.indicative_wait(), "< 15 min");
    }

    #[test]
    fn ticket_update_omits_unset_fields() {
        let update = TicketUpdate {
            status: Some(TicketStatus::Assigned),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({ "status": "assigned" })
        );
    }

    #[test]
    fn discount_only_applies_when_lower() {
        let mut product = Product {
            id: "p1".into(),
            name: "Basmati rice".into(),
            price: 500.0,
            discount_price: Some(450.0),
            unit: "5kg".into(),
            image_url: None,
            category: None,
            in_stock: true,
        };
        assert_eq!(product.effective_price(), 450.0);
        product.discount_price = Some(600.0);
        assert_eq!(product.effective_price(), 500.0);
    }
}
