use std::sync::Arc;

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::{
    api::{AssistantApi, HttpAssistantApi},
    config::AssistantConfig,
    error::Result,
    escalation::EscalationWorkflow,
    feedback::SatisfactionSurvey,
    render::{
        render_cards, render_escalation, render_feedback, render_message, render_suggestions,
    },
    search::{SearchNavigation, SmartSearch},
    session::SessionIdentity,
    store::{ConversationStore, SendOutcome},
    types::Role,
};

const HELP: &str = "\
Commands:
  <text>              ask the assistant
  /search <text>      type into the search box
  /go                 run the current search
  /pick <n>           choose suggestion n from the dropdown
  /clear              start a new conversation
  /rate <1-5> [text]  rate this conversation
  /comment <text>     tell us what went wrong
  /submit             send your rating
  /cancel             stop waiting for a human agent
  /assign [agent]     hand the pending ticket to an agent
  /ticket             check on your support ticket
  /help               show this help
  /quit               leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Say(String),
    Search(String),
    Go,
    Pick(usize),
    Clear,
    Rate { rating: u8, comment: Option<String> },
    Comment(String),
    Submit,
    Cancel,
    Assign(Option<String>),
    Ticket,
    Help,
    Quit,
    Unknown(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let optional = |arg: &str| (!arg.is_empty()).then(|| arg.to_string());

    match name.to_ascii_lowercase().as_str() {
        "search" | "s" => Command::Search(arg.to_string()),
        "go" => Command::Go,
        "pick" => match arg.parse::<usize>() {
            Ok(index) if index > 0 => Command::Pick(index),
            _ => Command::Unknown(line.to_string()),
        },
        "clear" => Command::Clear,
        "rate" => {
            let (rating, comment) = match arg.split_once(char::is_whitespace) {
                Some((rating, comment)) => (rating, optional(comment.trim())),
                None => (arg, None),
            };
            match rating.parse::<u8>() {
                Ok(rating) => Command::Rate { rating, comment },
                Err(_) => Command::Unknown(line.to_string()),
            }
        }
        "comment" => Command::Comment(arg.to_string()),
        "submit" => Command::Submit,
        "cancel" => Command::Cancel,
        "assign" => Command::Assign(optional(arg)),
        "ticket" => Command::Ticket,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    }
}

struct Assistant {
    config: AssistantConfig,
    store: ConversationStore,
    search: SmartSearch,
    survey: SatisfactionSurvey,
    poller: Option<JoinHandle<()>>,
    watchers: Vec<JoinHandle<()>>,
}

impl Assistant {
    fn new(config: AssistantConfig, api: Arc<dyn AssistantApi>) -> Self {
        let session = Arc::new(SessionIdentity::in_memory());
        let escalation = EscalationWorkflow::new(
            api.clone(),
            config.agent_viewing_delay,
            config.notify_ticket_cancel,
        );
        let store = ConversationStore::new(api.clone(), session.clone(), escalation);
        let search = SmartSearch::new(api.clone(), session.clone(), config.search_debounce);
        let survey = SatisfactionSurvey::new(api, session, config.feedback_dismiss_delay);

        Self {
            config,
            store,
            search,
            survey,
            poller: None,
            watchers: Vec::new(),
        }
    }

    fn spawn_watchers(&mut self) {
        let mut suggestions = self.search.subscribe();
        self.watchers.push(tokio::spawn(async move {
            let mut last_shown = None;
            while suggestions.changed().await.is_ok() {
                let state = suggestions.borrow_and_update().clone();
                if state.is_loading {
                    continue;
                }
                let shown = render_suggestions(&state);
                if shown != last_shown {
                    if let Some(text) = &shown {
                        println!("{text}");
                    }
                    last_shown = shown;
                }
            }
        }));

        let mut escalation = self.store.escalation().subscribe();
        self.watchers.push(tokio::spawn(async move {
            let mut last_phase = escalation.borrow().phase.clone();
            while escalation.changed().await.is_ok() {
                let phase = escalation.borrow_and_update().phase.clone();
                if phase == last_phase {
                    continue;
                }
                if let Some(text) = render_escalation(&phase) {
                    println!("{text}");
                }
                last_phase = phase;
            }
        }));
    }

    fn ensure_polling(&mut self) {
        if !self.store.escalation().phase().is_live() {
            return;
        }
        let running = self
            .poller
            .as_ref()
            .is_some_and(|poller| !poller.is_finished());
        if !running {
            self.poller = Some(
                self.store
                    .escalation()
                    .spawn_polling(self.config.ticket_poll_interval),
            );
        }
    }

    fn stop_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }

    fn show_starters(&self) {
        let snapshot = self.store.snapshot();
        if !snapshot.suggestions.is_empty() {
            println!("Try: {}", snapshot.suggestions.join(" | "));
        }
    }

    async fn say(&mut self, text: &str) {
        match self.store.send_message(text).await {
            SendOutcome::Empty => {}
            SendOutcome::Busy => println!("Still waiting for the previous reply..."),
            SendOutcome::Replied | SendOutcome::Failed => {
                let snapshot = self.store.snapshot();
                if let Some(reply) = snapshot
                    .messages
                    .iter()
                    .rev()
                    .find(|message| message.role == Role::Assistant)
                {
                    println!("{}", render_message(reply));
                }
                let cards = render_cards(&snapshot);
                if !cards.is_empty() {
                    println!("{cards}");
                }
                if let Some(error) = &snapshot.error {
                    println!("({error})");
                }
                self.show_starters();
                self.ensure_polling();
            }
        }
    }

    fn navigate(&self, target: Option<SearchNavigation>) {
        match target {
            Some(target) => println!("-> {}", target.path()),
            None => println!("Type at least a couple of letters first."),
        }
    }

    /// Returns false when the user asked to leave.
    async fn handle(&mut self, command: Command) -> bool {
        debug!(?command, "command");
        match command {
            Command::Empty => {}
            Command::Say(text) => self.say(&text).await,
            Command::Search(text) => {
                self.search.focus();
                self.search.on_input(&text);
            }
            Command::Go => self.navigate(self.search.submit()),
            Command::Pick(index) => {
                let state = self.search.state();
                match state.suggestions.get(index - 1) {
                    Some(suggestion) => {
                        let suggestion = suggestion.clone();
                        self.navigate(self.search.select_suggestion(&suggestion));
                    }
                    None => println!("No suggestion #{index}."),
                }
            }
            Command::Clear => {
                if self.store.clear_chat().await {
                    self.stop_polling();
                    self.survey.reset();
                    self.search.close();
                    println!("Started a new conversation.");
                    self.show_starters();
                } else {
                    println!("Wait for the current reply before clearing.");
                }
            }
            Command::Rate { rating, comment } => match self.survey.select_rating(rating) {
                Ok(true) => {
                    if let Some(comment) = comment {
                        self.survey.set_comment(&comment);
                    }
                    if let Some(text) = render_feedback(&self.survey.state()) {
                        println!("{text}");
                    }
                }
                Ok(false) => println!("Feedback for this conversation was already sent."),
                Err(err) => println!("{err}"),
            },
            Command::Comment(text) => {
                if !self.survey.set_comment(&text) {
                    println!("Comments are only collected for ratings of 3 or below.");
                }
            }
            Command::Submit => match self.survey.submit().await {
                Some(message) => println!("{message}"),
                None => println!("Pick a rating with /rate first."),
            },
            Command::Cancel => {
                if self.store.escalation().cancel().await {
                    self.stop_polling();
                    println!("You're back with the assistant.");
                } else {
                    println!("There is no handoff to cancel.");
                }
            }
            Command::Assign(agent) => {
                let agent = agent.unwrap_or_else(|| self.store.session_id());
                match self.store.escalation().assign_to(&agent).await {
                    Ok(_) => self.ensure_polling(),
                    Err(err) => println!("{err}"),
                }
            }
            Command::Ticket => match self.store.escalation().refresh().await {
                Ok(phase) => {
                    if let Some(text) = render_escalation(&phase) {
                        println!("{text}");
                    }
                }
                Err(err) => println!("{err}"),
            },
            Command::Help => println!("{HELP}"),
            Command::Quit => return false,
            Command::Unknown(line) => println!("Unknown command: {line} (try /help)"),
        }
        true
    }
}

impl Drop for Assistant {
    fn drop(&mut self) {
        self.stop_polling();
        for watcher in self.watchers.drain(..) {
            watcher.abort();
        }
    }
}

/// Interactive terminal front end. Expects `.env` to be loaded already.
pub async fn run() -> Result<()> {
    let config = AssistantConfig::from_env()?;
    let api: Arc<dyn AssistantApi> = Arc::new(HttpAssistantApi::new(&config)?);
    info!(api = %config.api_base_url, "shop assistant starting");

    let mut assistant = Assistant::new(config, api);
    assistant.spawn_watchers();

    println!("Hi! I'm your grocery assistant. Type /help for commands.");
    assistant.store.load_suggestions().await;
    assistant.show_starters();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !assistant.handle(parse_command(&line)).await {
            break;
        }
    }

    info!(session_id = %assistant.store.session_id(), "shop assistant stopped");
    Ok(())
}
