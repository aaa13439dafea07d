use minijinja::{context, Environment};
use regex::Regex;
use serde_json::{json, Value};

use crate::{
    escalation::{EscalationAction, EscalationPhase},
    feedback::{FeedbackPhase, FeedbackState},
    search::SuggestionState,
    store::ConversationSnapshot,
    types::{ChatMessage, Role},
};

const REPLY_CARDS_TEMPLATE: &str = include_str!("templates/reply_cards.j2");

fn price(value: f64) -> String {
    format!("{value:.2}")
}

/// Flattens the markdown subset the assistant emits into terminal text.
pub fn render_message_content(content: &str) -> String {
    let image_re = Regex::new(r"!\[([^\]]*)\]\(([^)\s]+)[^)]*\)").ok();
    let link_re = Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").ok();
    let bold_re = Regex::new(r"\*\*([^*]+)\*\*").ok();

    let mut text = content.to_string();
    if let Some(re) = image_re.as_ref() {
        text = re
            .replace_all(&text, |caps: &regex::Captures| {
                let alt = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
                if alt.is_empty() {
                    "[image]".to_string()
                } else {
                    format!("[image: {alt}]")
                }
            })
            .to_string();
    }
    if let Some(re) = link_re.as_ref() {
        text = re.replace_all(&text, "$1 ($2)").to_string();
    }
    if let Some(re) = bold_re.as_ref() {
        text = re.replace_all(&text, "$1").to_string();
    }
    text.trim().to_string()
}

pub fn render_message(message: &ChatMessage) -> String {
    let speaker = match message.role {
        Role::User => "You",
        Role::Assistant => "Assistant",
        Role::System => "System",
    };
    format!("{speaker}: {}", render_message_content(&message.content))
}

fn cards_view(snapshot: &ConversationSnapshot) -> Value {
    let products = snapshot
        .recommended_products
        .iter()
        .map(|product| {
            let current = product.effective_price();
            json!({
                "name": product.name,
                "unit": product.unit,
                "price": price(current),
                "was": (current < product.price).then(|| price(product.price)),
                "in_stock": product.in_stock,
            })
        })
        .collect::<Vec<_>>();

    let categories = snapshot
        .recommended_categories
        .iter()
        .map(|category| match category.product_count {
            Some(count) => format!("{} ({count})", category.name),
            None => category.name.clone(),
        })
        .collect::<Vec<_>>();

    let cart = snapshot.cart_preview.as_ref().map(|cart| {
        json!({
            "count": cart.item_count(),
            "total": price(cart.total),
            "items": cart.items.iter().map(|item| json!({
                "quantity": item.quantity,
                "name": item.name,
                "price": price(item.price),
            })).collect::<Vec<_>>(),
        })
    });

    let order = snapshot.order_status.as_ref().map(|order| {
        json!({
            "id": order.order_id,
            "status": order.status,
            "eta": order.estimated_delivery,
            "total": order.total.map(price),
        })
    });

    json!({
        "products": products,
        "categories": categories,
        "cart": cart,
        "order": order,
    })
}

/// Product cards, category chips, cart preview and order status for the
/// latest reply. Empty when the reply carried no structured payload.
pub fn render_cards(snapshot: &ConversationSnapshot) -> String {
    let view = cards_view(snapshot);

    let mut env = Environment::new();
    if env
        .add_template("reply_cards", REPLY_CARDS_TEMPLATE)
        .is_err()
    {
        return fallback_cards(&view);
    }
    let Ok(template) = env.get_template("reply_cards") else {
        return fallback_cards(&view);
    };

    template
        .render(context! {
            products => view["products"],
            categories => view["categories"],
            cart => view["cart"],
            order => view["order"],
        })
        .map(|text| text.trim().to_string())
        .unwrap_or_else(|_| fallback_cards(&view))
}

fn fallback_cards(view: &Value) -> String {
    let text = |value: &Value| value.as_str().unwrap_or_default().to_string();
    let mut out = Vec::<String>::new();

    if let Some(products) = view["products"].as_array().filter(|p| !p.is_empty()) {
        out.push("Recommended products:".to_string());
        for (index, p) in products.iter().enumerate() {
            let mut line = format!("  {}. {}", index + 1, text(&p["name"]));
            if !text(&p["unit"]).is_empty() {
                line.push_str(&format!(" ({})", text(&p["unit"])));
            }
            line.push_str(&format!(" - {}", text(&p["price"])));
            if p["was"].is_string() {
                line.push_str(&format!(" (was {})", text(&p["was"])));
            }
            if !p["in_stock"].as_bool().unwrap_or(true) {
                line.push_str(" [out of stock]");
            }
            out.push(line);
        }
    }

    if let Some(categories) = view["categories"].as_array().filter(|c| !c.is_empty()) {
        let chips = categories
            .iter()
            .map(|c| format!("[{}]", text(c)))
            .collect::<Vec<_>>()
            .join(" ");
        out.push(format!("Categories: {chips}"));
    }

    if view["cart"].is_object() {
        let cart = &view["cart"];
        out.push(format!(
            "Cart ({} items, total {}):",
            cart["count"],
            text(&cart["total"])
        ));
        for item in cart["items"].as_array().into_iter().flatten() {
            out.push(format!(
                "  - {} x {} @ {}",
                item["quantity"],
                text(&item["name"]),
                text(&item["price"])
            ));
        }
    }

    if view["order"].is_object() {
        let order = &view["order"];
        let mut line = format!("Order {}: {}", text(&order["id"]), text(&order["status"]));
        if order["eta"].is_string() {
            line.push_str(&format!(", arriving {}", text(&order["eta"])));
        }
        if order["total"].is_string() {
            line.push_str(&format!(", total {}", text(&order["total"])));
        }
        out.push(line);
    }

    out.join("\n")
}

pub fn render_suggestions(state: &SuggestionState) -> Option<String> {
    if !state.is_open {
        return None;
    }
    let mut lines = Vec::new();
    if let Some(corrected) = state.did_you_mean() {
        lines.push(format!("Did you mean: {corrected}"));
    }
    for (index, suggestion) in state.suggestions.iter().enumerate() {
        lines.push(format!("  {}. {suggestion}", index + 1));
    }
    if lines.is_empty() {
        return None;
    }
    Some(lines.join("\n"))
}

pub fn render_escalation(phase: &EscalationPhase) -> Option<String> {
    let mut text = match phase {
        EscalationPhase::Inactive => return None,
        EscalationPhase::Connecting { priority } => format!(
            "Connecting you to a support agent... (priority {}, expected wait {})",
            priority.as_str(),
            priority.indicative_wait()
        ),
        EscalationPhase::Pending {
            ticket_id,
            priority,
            agent_viewing,
        } => {
            let mut line = format!(
                "Ticket #{ticket_id} is waiting for an agent (priority {}, expected wait {})",
                priority.as_str(),
                priority.indicative_wait()
            );
            if *agent_viewing {
                line.push_str("\nAn agent is viewing your conversation...");
            }
            line
        }
        EscalationPhase::Assigned {
            ticket_id, agent, ..
        } => format!(
            "{} has joined the conversation (ticket #{ticket_id})",
            agent.as_deref().unwrap_or("A support agent")
        ),
        EscalationPhase::Resolved { ticket_id, .. } => {
            format!("Ticket #{ticket_id} has been resolved. Thanks for your patience!")
        }
    };

    let actions = phase
        .actions()
        .iter()
        .map(|action| match action {
            EscalationAction::Cancel => "[/cancel]",
            EscalationAction::AssignToMe => "[/assign]",
        })
        .collect::<Vec<_>>();
    if !actions.is_empty() {
        text.push_str(&format!("\n{}", actions.join(" ")));
    }
    Some(text)
}

pub fn render_feedback(state: &FeedbackState) -> Option<String> {
    match &state.phase {
        FeedbackPhase::Idle => Some("How was your experience? Rate us with /rate 1-5".to_string()),
        FeedbackPhase::RatingSelected { rating } => {
            let stars = (1..=5)
                .map(|n| if n <= *rating { '★' } else { '☆' })
                .collect::<String>();
            let mut text = format!("Your rating: {stars}");
            if state.shows_comment_box() {
                text.push_str("\nTell us what went wrong with /comment <text>, then /submit");
            } else {
                text.push_str("\nSend it with /submit");
            }
            Some(text)
        }
        FeedbackPhase::Submitting { .. } => Some("Sending feedback...".to_string()),
        FeedbackPhase::Submitted { message } => Some(message.clone()),
        FeedbackPhase::Dismissed => None,
    }
}
