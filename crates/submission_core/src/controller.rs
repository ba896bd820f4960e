use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    domain::{AttemptId, ContactFields, ControllerId, FieldName, Phase},
    error::FailureReport,
};
use tokio::{
    sync::{broadcast, Mutex},
    task::{AbortHandle, JoinHandle},
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    error::{EditError, RelayError, SubmitError},
    relay::RelayTransport,
};

pub const DEFAULT_REVERT_AFTER: Duration = Duration::from_secs(5);
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    /// How long `Succeeded`/`Failed` stay visible before reverting to `Idle`.
    pub revert_after: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            revert_after: DEFAULT_REVERT_AFTER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    PhaseChanged { phase: Phase, at: DateTime<Utc> },
    FieldEdited { field: FieldName, at: DateTime<Utc> },
    FieldsCleared { at: DateTime<Utc> },
    DeliveryFailed { report: FailureReport, at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionSnapshot {
    pub phase: Phase,
    pub fields: ContactFields,
}

struct SubmissionState {
    fields: ContactFields,
    phase: Phase,
    attempt: AttemptId,
    revert_task: Option<JoinHandle<()>>,
    delivery_task: Option<AbortHandle>,
    detached: bool,
}

impl SubmissionState {
    fn cancel_revert(&mut self) {
        if let Some(task) = self.revert_task.take() {
            task.abort();
        }
    }

    fn cancel_delivery(&mut self) {
        if let Some(task) = self.delivery_task.take() {
            task.abort();
        }
    }
}

/// Owns the contact form state and drives it through
/// `Idle -> Submitting -> Succeeded | Failed -> Idle`.
///
/// A submission is only started from a non-`Submitting` phase, so at most one
/// relay call is in flight per controller. The relay call and the settle
/// step run on a task owned by the controller, so a caller dropping its
/// `submit` future never strands the phase in `Submitting`.
pub struct SubmissionController {
    id: ControllerId,
    relay: Arc<dyn RelayTransport>,
    settings: ControllerSettings,
    inner: Mutex<SubmissionState>,
    events: broadcast::Sender<ControllerEvent>,
}

impl SubmissionController {
    pub fn new(relay: Arc<dyn RelayTransport>, settings: ControllerSettings) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            id: ControllerId::new(),
            relay,
            settings,
            inner: Mutex::new(SubmissionState {
                fields: ContactFields::default(),
                phase: Phase::Idle,
                attempt: AttemptId(0),
                revert_task: None,
                delivery_task: None,
                detached: false,
            }),
            events,
        })
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> Phase {
        self.inner.lock().await.phase.clone()
    }

    pub async fn fields(&self) -> ContactFields {
        self.inner.lock().await.fields.clone()
    }

    pub async fn snapshot(&self) -> SubmissionSnapshot {
        let guard = self.inner.lock().await;
        SubmissionSnapshot {
            phase: guard.phase.clone(),
            fields: guard.fields.clone(),
        }
    }

    pub async fn banner_text(&self) -> Option<String> {
        let guard = self.inner.lock().await;
        guard.phase.banner().map(|banner| banner.to_string())
    }

    pub async fn is_detached(&self) -> bool {
        self.inner.lock().await.detached
    }

    pub async fn edit_field(
        &self,
        field: FieldName,
        value: impl Into<String>,
    ) -> Result<(), EditError> {
        let value = value.into();
        let mut guard = self.inner.lock().await;
        if guard.detached {
            return Err(EditError::Detached);
        }
        if !guard.phase.accepts_edits() {
            debug!(controller = %self.id, %field, "submission: edit rejected, inputs locked");
            return Err(EditError::InputLocked);
        }
        guard.fields.set(field, value);
        self.publish(ControllerEvent::FieldEdited {
            field,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Validates the current fields, moves to `Submitting` and performs exactly
    /// one relay call. Resolves to the settled phase, `Succeeded` or `Failed`.
    pub async fn submit(self: &Arc<Self>) -> Result<Phase, SubmitError> {
        let (attempt, delivery) = {
            let mut guard = self.inner.lock().await;
            if guard.detached {
                return Err(SubmitError::Detached);
            }
            match guard.phase {
                Phase::Submitting => {
                    debug!(controller = %self.id, "submission: rejected, already in flight");
                    return Err(SubmitError::InFlight);
                }
                Phase::Idle | Phase::Succeeded | Phase::Failed { .. } => {}
            }
            if let Err(err) = guard.fields.validate() {
                debug!(controller = %self.id, field = %err.field(), "submission: validation failed");
                return Err(err.into());
            }

            guard.cancel_revert();
            guard.attempt = guard.attempt.next();
            self.transition(&mut guard, Phase::Submitting);

            let attempt = guard.attempt;
            let delivery = tokio::spawn(Arc::clone(self).deliver(attempt, guard.fields.clone()));
            guard.delivery_task = Some(delivery.abort_handle());
            (attempt, delivery)
        };

        match delivery.await {
            Ok(settled) => settled,
            Err(err) if err.is_cancelled() => Err(SubmitError::Detached),
            Err(err) => {
                warn!(controller = %self.id, attempt = attempt.0, "submission: delivery task panicked: {err}");
                self.settle(
                    attempt,
                    Err(RelayError::Transport("delivery task panicked".to_string())),
                )
                .await
            }
        }
    }

    /// Invalidates the controller: cancels the pending revert, aborts any
    /// in-flight delivery and rejects every later operation.
    pub async fn teardown(&self) {
        let mut guard = self.inner.lock().await;
        if guard.detached {
            return;
        }
        guard.detached = true;
        guard.cancel_revert();
        guard.cancel_delivery();
        info!(controller = %self.id, phase = guard.phase.label(), "submission: controller torn down");
    }

    async fn deliver(
        self: Arc<Self>,
        attempt: AttemptId,
        fields: ContactFields,
    ) -> Result<Phase, SubmitError> {
        info!(controller = %self.id, attempt = attempt.0, "submission: delivering to relay");
        let result = self.relay.deliver(&fields).await;
        self.settle(attempt, result).await
    }

    async fn settle(
        self: &Arc<Self>,
        attempt: AttemptId,
        result: Result<(), RelayError>,
    ) -> Result<Phase, SubmitError> {
        let mut guard = self.inner.lock().await;
        if guard.detached || guard.attempt != attempt || guard.phase != Phase::Submitting {
            info!(controller = %self.id, attempt = attempt.0, "submission: torn down in flight, result discarded");
            return Err(SubmitError::Detached);
        }
        guard.delivery_task = None;

        let settled = match result {
            Ok(()) => {
                info!(controller = %self.id, attempt = attempt.0, "submission: accepted by relay");
                guard.fields.clear();
                self.publish(ControllerEvent::FieldsCleared { at: Utc::now() });
                Phase::Succeeded
            }
            Err(err) => {
                warn!(controller = %self.id, attempt = attempt.0, code = ?err.code(), "submission: failed: {err}");
                self.publish(ControllerEvent::DeliveryFailed {
                    report: FailureReport::from(&err),
                    at: Utc::now(),
                });
                Phase::Failed {
                    message: err.user_message(),
                }
            }
        };
        self.transition(&mut guard, settled.clone());
        guard.revert_task = Some(self.arm_revert(attempt));
        Ok(settled)
    }

    fn arm_revert(self: &Arc<Self>, attempt: AttemptId) -> JoinHandle<()> {
        let controller = Arc::downgrade(self);
        let delay = self.settings.revert_after;
        tokio::spawn(async move {
            sleep(delay).await;
            if let Some(controller) = controller.upgrade() {
                controller.revert_to_idle(attempt).await;
            }
        })
    }

    async fn revert_to_idle(&self, attempt: AttemptId) {
        let mut guard = self.inner.lock().await;
        // A newer attempt owns the phase now.
        if guard.detached || guard.attempt != attempt || !guard.phase.is_transient() {
            return;
        }
        guard.revert_task = None;
        self.transition(&mut guard, Phase::Idle);
    }

    fn transition(&self, state: &mut SubmissionState, next: Phase) {
        debug!(
            controller = %self.id,
            from = state.phase.label(),
            to = next.label(),
            "submission: phase change"
        );
        state.phase = next.clone();
        self.publish(ControllerEvent::PhaseChanged {
            phase: next,
            at: Utc::now(),
        });
    }

    fn publish(&self, event: ControllerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Drop for SubmissionController {
    fn drop(&mut self) {
        let state = self.inner.get_mut();
        state.cancel_revert();
        state.cancel_delivery();
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
