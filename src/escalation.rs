use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    api::AssistantApi,
    error::{AssistantError, Result},
    types::{TicketDescriptor, TicketPriority, TicketStatus, TicketUpdate},
};

pub const CANCEL_RESOLUTION: &str = "cancelled_by_customer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationAction {
    Cancel,
    AssignToMe,
}

/// Where a human handoff currently stands. `Inactive` is plain AI-only chat.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EscalationPhase {
    #[default]
    Inactive,
    Connecting {
        priority: TicketPriority,
    },
    Pending {
        ticket_id: String,
        priority: TicketPriority,
        agent_viewing: bool,
    },
    Assigned {
        ticket_id: String,
        priority: TicketPriority,
        agent: Option<String>,
    },
    Resolved {
        ticket_id: String,
        priority: TicketPriority,
    },
}

impl EscalationPhase {
    pub fn ticket_id(&self) -> Option<&str> {
        match self {
            Self::Pending { ticket_id, .. }
            | Self::Assigned { ticket_id, .. }
            | Self::Resolved { ticket_id, .. } => Some(ticket_id),
            Self::Inactive | Self::Connecting { .. } => None,
        }
    }

    pub fn priority(&self) -> Option<TicketPriority> {
        match self {
            Self::Inactive => None,
            Self::Connecting { priority }
            | Self::Pending { priority, .. }
            | Self::Assigned { priority, .. }
            | Self::Resolved { priority, .. } => Some(*priority),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Connecting { .. } | Self::Pending { .. } | Self::Assigned { .. }
        )
    }

    pub fn actions(&self) -> &'static [EscalationAction] {
        match self {
            Self::Connecting { .. } | Self::Assigned { .. } => &[EscalationAction::Cancel],
            Self::Pending { .. } => &[EscalationAction::Cancel, EscalationAction::AssignToMe],
            Self::Inactive | Self::Resolved { .. } => &[],
        }
    }

    pub fn offers(&self, action: EscalationAction) -> bool {
        self.actions().contains(&action)
    }

    /// Queue wait shown while nobody has picked the ticket up yet.
    pub fn indicative_wait(&self) -> Option<&'static str> {
        match self {
            Self::Connecting { priority } | Self::Pending { priority, .. } => {
                Some(priority.indicative_wait())
            }
            _ => None,
        }
    }

    /// Phase reached by applying a backend ticket descriptor, or `None` when
    /// the descriptor does not move this workflow.
    pub fn next(&self, ticket: &TicketDescriptor) -> Option<EscalationPhase> {
        let priority = ticket.priority;
        let incoming = ticket
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let Some(id) = incoming else {
            return match self {
                Self::Inactive | Self::Resolved { .. } => Some(Self::Connecting { priority }),
                Self::Connecting { priority: current } if *current != priority => {
                    Some(Self::Connecting { priority })
                }
                _ => None,
            };
        };

        if let Some(current) = self.ticket_id() {
            let terminal = matches!(self, Self::Resolved { .. });
            if current != id && !terminal {
                return None;
            }
            if current == id && terminal {
                return None;
            }
        }

        let next = match ticket.status {
            TicketStatus::Pending => {
                if matches!(self, Self::Assigned { ticket_id, .. } if ticket_id == id) {
                    return None;
                }
                Self::Pending {
                    ticket_id: id.to_string(),
                    priority,
                    agent_viewing: false,
                }
            }
            TicketStatus::Assigned => Self::Assigned {
                ticket_id: id.to_string(),
                priority,
                agent: ticket.assigned_to.clone(),
            },
            TicketStatus::Resolved => Self::Resolved {
                ticket_id: id.to_string(),
                priority,
            },
        };

        match (self, &next) {
            (
                Self::Pending {
                    ticket_id: a,
                    priority: pa,
                    ..
                },
                Self::Pending {
                    ticket_id: b,
                    priority: pb,
                    ..
                },
            ) if a == b && pa == pb => None,
            _ if *self == next => None,
            _ => Some(next),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EscalationState {
    pub phase: EscalationPhase,
    pub last_error: Option<String>,
}

/// Human-handoff tracker fed by chat responses and ticket polling.
#[derive(Clone)]
pub struct EscalationWorkflow {
    inner: Arc<EscalationInner>,
}

struct EscalationInner {
    api: Arc<dyn AssistantApi>,
    viewing_delay: Duration,
    notify_on_cancel: bool,
    state: watch::Sender<EscalationState>,
    viewing_timer: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every local reset; ticket replies issued under an older value
    /// are dropped.
    generation: AtomicU64,
    /// Tickets the customer walked away from. Descriptors carrying these ids
    /// never bring the handoff back.
    cancelled: Mutex<HashSet<String>>,
}

impl EscalationWorkflow {
    pub fn new(
        api: Arc<dyn AssistantApi>,
        viewing_delay: Duration,
        notify_on_cancel: bool,
    ) -> Self {
        let (state, _) = watch::channel(EscalationState::default());
        Self {
            inner: Arc::new(EscalationInner {
                api,
                viewing_delay,
                notify_on_cancel,
                state,
                viewing_timer: Mutex::new(None),
                generation: AtomicU64::new(0),
                cancelled: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn state(&self) -> EscalationState {
        self.inner.state.borrow().clone()
    }

    pub fn phase(&self) -> EscalationPhase {
        self.inner.state.borrow().phase.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EscalationState> {
        self.inner.state.subscribe()
    }

    pub fn apply(&self, ticket: &TicketDescriptor) -> bool {
        EscalationInner::apply(&self.inner, ticket)
    }

    /// Returns the conversation to AI-only mode.
    pub async fn cancel(&self) -> bool {
        let previous = self.phase();
        if !previous.offers(EscalationAction::Cancel) {
            return false;
        }
        if let Some(ticket_id) = previous.ticket_id() {
            self.inner.forget_ticket(ticket_id);
        }
        self.inner.set_phase(EscalationPhase::Inactive);
        info!(ticket_id = ?previous.ticket_id(), "escalation cancelled by customer");

        if let (true, Some(ticket_id)) = (self.inner.notify_on_cancel, previous.ticket_id()) {
            let update = TicketUpdate {
                status: Some(TicketStatus::Resolved),
                assigned_to: None,
                resolution: Some(CANCEL_RESOLUTION.to_string()),
            };
            if let Err(err) = self.inner.api.update_ticket(ticket_id, &update).await {
                warn!(ticket_id, error = %err, "failed to withdraw cancelled ticket");
            }
        }
        true
    }

    pub async fn assign_to(&self, agent_id: &str) -> Result<EscalationPhase> {
        let phase = self.phase();
        let Some(ticket_id) = phase
            .offers(EscalationAction::AssignToMe)
            .then(|| phase.ticket_id())
            .flatten()
        else {
            return Err(AssistantError::ticket("no pending ticket to assign"));
        };

        let update = TicketUpdate {
            status: Some(TicketStatus::Assigned),
            assigned_to: Some(agent_id.to_string()),
            resolution: None,
        };
        let generation = self.inner.generation();
        let result = self.inner.api.update_ticket(ticket_id, &update).await;
        if self.inner.is_stale(generation) {
            debug!(ticket_id, "handoff reset while assigning, dropping ticket");
            return Ok(self.phase());
        }
        let ticket = self.inner.track(result)?;
        self.apply(&ticket);
        Ok(self.phase())
    }

    /// Polls the ticket once. Only live tickets with an id are polled.
    pub async fn refresh(&self) -> Result<EscalationPhase> {
        let phase = self.phase();
        let ticket_id = match &phase {
            EscalationPhase::Pending { ticket_id, .. }
            | EscalationPhase::Assigned { ticket_id, .. } => ticket_id.clone(),
            _ => return Err(AssistantError::ticket("no open ticket to refresh")),
        };

        let generation = self.inner.generation();
        let result = self.inner.api.fetch_ticket(&ticket_id).await;
        if self.inner.is_stale(generation) {
            debug!(ticket_id = %ticket_id, "handoff reset while polling, dropping ticket");
            return Ok(self.phase());
        }
        let ticket = self.inner.track(result)?;
        self.apply(&ticket);
        Ok(self.phase())
    }

    /// Polls every `interval` until the handoff is resolved or cancelled.
    pub fn spawn_polling(&self, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let workflow = EscalationWorkflow { inner };
                match workflow.phase() {
                    EscalationPhase::Connecting { .. } => continue,
                    EscalationPhase::Pending { .. } | EscalationPhase::Assigned { .. } => {
                        if let Err(err) = workflow.refresh().await {
                            warn!(error = %err, "ticket poll failed");
                        }
                    }
                    EscalationPhase::Inactive | EscalationPhase::Resolved { .. } => break,
                }
            }
            debug!("ticket polling stopped");
        })
    }

    pub fn reset(&self) {
        self.inner.set_phase(EscalationPhase::Inactive);
    }
}

impl EscalationInner {
    fn apply(this: &Arc<Self>, ticket: &TicketDescriptor) -> bool {
        if this.is_cancelled(ticket) {
            debug!(ticket_id = ?ticket.id, "ignoring cancelled ticket");
            return false;
        }

        let mut entered = None;
        let changed = this.state.send_if_modified(|state| {
            let Some(next) = state.phase.next(ticket) else {
                return false;
            };
            entered = Some(next.clone());
            state.phase = next;
            state.last_error = None;
            true
        });

        let Some(phase) = entered else {
            debug!(ticket_id = ?ticket.id, status = ?ticket.status, "ticket update ignored");
            return false;
        };
        info!(ticket_id = ?phase.ticket_id(), phase = ?phase, "escalation phase changed");

        let viewing_timer = match &phase {
            EscalationPhase::Pending { ticket_id, .. } => {
                Some(Self::spawn_viewing_timer(this, ticket_id.clone()))
            }
            _ => None,
        };
        this.replace_timer(viewing_timer);
        changed
    }

    fn spawn_viewing_timer(this: &Arc<Self>, ticket_id: String) -> JoinHandle<()> {
        let weak = Arc::downgrade(this);
        let delay = this.viewing_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.state.send_if_modified(|state| match &mut state.phase {
                EscalationPhase::Pending {
                    ticket_id: current,
                    agent_viewing,
                    ..
                } if *current == ticket_id && !*agent_viewing => {
                    *agent_viewing = true;
                    true
                }
                _ => false,
            });
        })
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation() != generation
    }

    fn forget_ticket(&self, ticket_id: &str) {
        match self.cancelled.lock() {
            Ok(mut cancelled) => cancelled.insert(ticket_id.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(ticket_id.to_string()),
        };
    }

    fn is_cancelled(&self, ticket: &TicketDescriptor) -> bool {
        let Some(id) = ticket.id.as_deref().map(str::trim) else {
            return false;
        };
        match self.cancelled.lock() {
            Ok(cancelled) => cancelled.contains(id),
            Err(poisoned) => poisoned.into_inner().contains(id),
        }
    }

    fn set_phase(&self, phase: EscalationPhase) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.replace_timer(None);
        self.state.send_if_modified(|state| {
            let changed = state.phase != phase || state.last_error.is_some();
            state.phase = phase;
            state.last_error = None;
            changed
        });
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            let message = err.to_string();
            self.state
                .send_modify(|state| state.last_error = Some(message));
        }
        result
    }

    fn replace_timer(&self, next: Option<JoinHandle<()>>) {
        let previous = match self.viewing_timer.lock() {
            Ok(mut timer) => std::mem::replace(&mut *timer, next),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), next),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Drop for EscalationInner {
    fn drop(&mut self) {
        let timer = match self.viewing_timer.get_mut() {
            Ok(timer) => timer.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(timer) = timer {
            timer.abort();
        }
    }
}
