use super::*;
use crate::error::{RelayError, ValidationError, TRANSPORT_FALLBACK_MESSAGE};
use async_trait::async_trait;
use shared::error::ErrorCode;
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering},
};
use tokio::sync::Notify;

struct ScriptedRelay {
    outcomes: Mutex<VecDeque<Result<(), RelayError>>>,
    delivered: Mutex<Vec<ContactFields>>,
    calls: AtomicUsize,
    gate: Option<Notify>,
}

impl ScriptedRelay {
    fn accepting() -> Self {
        Self::scripted(Vec::new())
    }

    fn scripted(outcomes: Vec<Result<(), RelayError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            delivered: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    fn rejecting(message: &str) -> Self {
        Self::scripted(vec![Err(RelayError::Rejected(message.to_string()))])
    }

    fn gated(mut self) -> Self {
        self.gate = Some(Notify::new());
        self
    }

    fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayTransport for ScriptedRelay {
    async fn deliver(&self, fields: &ContactFields) -> Result<(), RelayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.delivered.lock().await.push(fields.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.outcomes.lock().await.pop_front().unwrap_or(Ok(()))
    }
}

fn controller_with(relay: &Arc<ScriptedRelay>) -> Arc<SubmissionController> {
    SubmissionController::new(relay.clone(), ControllerSettings::default())
}

async fn fill(controller: &SubmissionController, name: &str, email: &str, message: &str) {
    controller
        .edit_field(FieldName::Name, name)
        .await
        .expect("edit name");
    controller
        .edit_field(FieldName::Email, email)
        .await
        .expect("edit email");
    controller
        .edit_field(FieldName::Message, message)
        .await
        .expect("edit message");
}

fn drain_phases(events: &mut broadcast::Receiver<ControllerEvent>) -> Vec<Phase> {
    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ControllerEvent::PhaseChanged { phase, .. } = event {
            phases.push(phase);
        }
    }
    phases
}

fn drain_failures(events: &mut broadcast::Receiver<ControllerEvent>) -> Vec<FailureReport> {
    let mut reports = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ControllerEvent::DeliveryFailed { report, .. } = event {
            reports.push(report);
        }
    }
    reports
}

async fn next_phase(events: &mut broadcast::Receiver<ControllerEvent>) -> Phase {
    loop {
        match events.recv().await.expect("event") {
            ControllerEvent::PhaseChanged { phase, .. } => return phase,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn starts_idle_with_empty_fields() {
    let relay = Arc::new(ScriptedRelay::accepting());
    let controller = controller_with(&relay);

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Idle);
    assert_eq!(snapshot.fields, ContactFields::default());
    assert_eq!(controller.banner_text().await, None);
}

#[tokio::test]
async fn each_controller_gets_its_own_id() {
    let relay = Arc::new(ScriptedRelay::accepting());
    let first = controller_with(&relay);
    let second = controller_with(&relay);

    assert_ne!(first.id(), second.id());
    assert_eq!(first.id(), first.id());
}

#[tokio::test]
async fn edits_keep_the_last_value_per_field() {
    let relay = Arc::new(ScriptedRelay::accepting());
    let controller = controller_with(&relay);
    let mut events = controller.subscribe_events();

    fill(&controller, "A", "a@x.com", "draft").await;
    controller
        .edit_field(FieldName::Name, "Ava")
        .await
        .expect("edit");
    controller
        .edit_field(FieldName::Message, "Hi")
        .await
        .expect("edit");

    assert_eq!(
        controller.fields().await,
        ContactFields::new("Ava", "a@x.com", "Hi")
    );
    assert_eq!(controller.phase().await, Phase::Idle);
    assert!(drain_phases(&mut events).is_empty());
}

#[tokio::test]
async fn empty_field_never_leaves_idle_or_calls_relay() {
    let relay = Arc::new(ScriptedRelay::accepting());
    let controller = controller_with(&relay);
    let mut events = controller.subscribe_events();

    controller
        .edit_field(FieldName::Name, "Ava")
        .await
        .expect("edit");
    controller
        .edit_field(FieldName::Message, "Hi")
        .await
        .expect("edit");

    let err = controller.submit().await.expect_err("must not submit");
    assert_eq!(
        err,
        SubmitError::Validation(ValidationError::EmptyField(FieldName::Email))
    );
    assert_eq!(controller.phase().await, Phase::Idle);
    assert_eq!(relay.calls(), 0);
    assert!(drain_phases(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn accepted_submission_clears_fields_then_reverts() {
    let relay = Arc::new(ScriptedRelay::accepting());
    let controller = controller_with(&relay);
    let mut events = controller.subscribe_events();
    fill(&controller, "Ava", "a@x.com", "Hi").await;

    let settled = controller.submit().await.expect("submit");

    assert_eq!(settled, Phase::Succeeded);
    assert_eq!(
        drain_phases(&mut events),
        vec![Phase::Submitting, Phase::Succeeded]
    );
    assert_eq!(controller.fields().await, ContactFields::default());
    assert_eq!(
        relay.delivered.lock().await.as_slice(),
        &[ContactFields::new("Ava", "a@x.com", "Hi")]
    );
    assert_eq!(
        controller.banner_text().await.as_deref(),
        Some("Success: Transmission received! Preparing response sequence...")
    );

    sleep(Duration::from_secs(4)).await;
    assert_eq!(controller.phase().await, Phase::Succeeded);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(controller.phase().await, Phase::Idle);
    assert_eq!(drain_phases(&mut events), vec![Phase::Idle]);
    assert_eq!(controller.banner_text().await, None);
}

#[tokio::test(start_paused = true)]
async fn rejected_submission_keeps_fields_and_reports_relay_message() {
    let relay = Arc::new(ScriptedRelay::rejecting("quota exceeded"));
    let controller = controller_with(&relay);
    let mut events = controller.subscribe_events();
    let mut failures = controller.subscribe_events();
    fill(&controller, "Ava", "a@x.com", "Hi").await;

    let settled = controller.submit().await.expect("submit");
    assert_eq!(
        drain_failures(&mut failures),
        vec![FailureReport::new(ErrorCode::Rejected, "quota exceeded")]
    );

    let failed = Phase::Failed {
        message: "quota exceeded".to_string(),
    };
    assert_eq!(settled, failed);
    assert_eq!(
        drain_phases(&mut events),
        vec![Phase::Submitting, failed.clone()]
    );
    assert_eq!(
        controller.fields().await,
        ContactFields::new("Ava", "a@x.com", "Hi")
    );
    assert_eq!(
        controller.banner_text().await.as_deref(),
        Some("Error: quota exceeded")
    );

    sleep(Duration::from_secs(6)).await;
    let phase = controller.phase().await;
    assert_eq!(phase, Phase::Idle);
    assert_eq!(phase.error_message(), None);
    assert_eq!(
        controller.fields().await,
        ContactFields::new("Ava", "a@x.com", "Hi")
    );
}

#[tokio::test]
async fn transport_failure_uses_generic_message() {
    let relay = Arc::new(ScriptedRelay::scripted(vec![Err(RelayError::Transport(
        "connection refused".to_string(),
    ))]));
    let controller = controller_with(&relay);
    fill(&controller, "Ava", "a@x.com", "Hi").await;
    let mut events = controller.subscribe_events();

    let settled = controller.submit().await.expect("submit");

    assert_eq!(
        settled,
        Phase::Failed {
            message: TRANSPORT_FALLBACK_MESSAGE.to_string()
        }
    );
    assert_eq!(relay.calls(), 1);
    assert_eq!(
        drain_failures(&mut events),
        vec![FailureReport::new(
            ErrorCode::Transport,
            TRANSPORT_FALLBACK_MESSAGE
        )]
    );
}

#[tokio::test]
async fn second_submit_while_in_flight_is_rejected() {
    let relay = Arc::new(ScriptedRelay::accepting().gated());
    let controller = controller_with(&relay);
    fill(&controller, "Ava", "a@x.com", "Hi").await;
    let mut events = controller.subscribe_events();

    let first = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.submit().await }
    });
    assert_eq!(next_phase(&mut events).await, Phase::Submitting);

    assert_eq!(controller.submit().await, Err(SubmitError::InFlight));
    assert_eq!(
        controller.edit_field(FieldName::Message, "changed").await,
        Err(EditError::InputLocked)
    );
    assert_eq!(relay.calls(), 1);

    relay.release();
    let settled = first.await.expect("join").expect("submit");

    assert_eq!(settled, Phase::Succeeded);
    assert_eq!(relay.calls(), 1);
    assert_eq!(
        relay.delivered.lock().await.as_slice(),
        &[ContactFields::new("Ava", "a@x.com", "Hi")]
    );
}

#[tokio::test]
async fn concurrent_submits_issue_one_relay_call() {
    let relay = Arc::new(ScriptedRelay::accepting().gated());
    let controller = controller_with(&relay);
    fill(&controller, "Ava", "a@x.com", "Hi").await;

    let releaser = {
        let relay = Arc::clone(&relay);
        async move {
            tokio::task::yield_now().await;
            relay.release();
        }
    };
    let (first, second, ()) =
        futures::join!(controller.submit(), controller.submit(), releaser);

    let outcomes = [first, second];
    assert_eq!(
        outcomes
            .iter()
            .filter(|outcome| **outcome == Ok(Phase::Succeeded))
            .count(),
        1
    );
    assert!(outcomes.contains(&Err(SubmitError::InFlight)));
    assert_eq!(relay.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn abandoned_submit_future_still_settles_and_reverts() {
    let relay = Arc::new(ScriptedRelay::accepting().gated());
    let controller = controller_with(&relay);
    fill(&controller, "Ava", "a@x.com", "Hi").await;

    let abandoned = tokio::time::timeout(Duration::from_secs(1), controller.submit()).await;
    assert!(abandoned.is_err(), "submit should still be waiting on the relay");
    assert_eq!(controller.phase().await, Phase::Submitting);

    relay.release();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(controller.phase().await, Phase::Succeeded);
    assert_eq!(controller.fields().await, ContactFields::default());
    assert_eq!(relay.calls(), 1);

    sleep(Duration::from_secs(6)).await;
    assert_eq!(controller.phase().await, Phase::Idle);

    fill(&controller, "Ava", "a@x.com", "Still there?").await;
    relay.release();
    assert_eq!(controller.submit().await, Ok(Phase::Succeeded));
    assert_eq!(relay.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn resubmission_cancels_pending_revert() {
    let relay = Arc::new(ScriptedRelay::scripted(vec![
        Err(RelayError::Rejected("try later".to_string())),
        Ok(()),
    ]));
    let controller = controller_with(&relay);
    let mut events = controller.subscribe_events();
    fill(&controller, "Ava", "a@x.com", "Hi").await;

    controller.submit().await.expect("first submit");
    sleep(Duration::from_secs(3)).await;
    assert_eq!(controller.submit().await, Ok(Phase::Succeeded));

    // The first revert would have fired at t=5.
    sleep(Duration::from_secs(3)).await;
    assert_eq!(controller.phase().await, Phase::Succeeded);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(controller.phase().await, Phase::Idle);
    assert_eq!(
        drain_phases(&mut events),
        vec![
            Phase::Submitting,
            Phase::Failed {
                message: "try later".to_string()
            },
            Phase::Submitting,
            Phase::Succeeded,
            Phase::Idle,
        ]
    );
    assert_eq!(relay.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn new_message_can_be_sent_while_success_banner_is_shown() {
    let relay = Arc::new(ScriptedRelay::accepting());
    let controller = controller_with(&relay);
    fill(&controller, "Ava", "a@x.com", "Hi").await;
    controller.submit().await.expect("first submit");

    fill(&controller, "Ava", "a@x.com", "One more thing").await;
    assert_eq!(controller.phase().await, Phase::Succeeded);
    assert_eq!(controller.submit().await, Ok(Phase::Succeeded));

    assert_eq!(relay.calls(), 2);
    assert_eq!(
        relay.delivered.lock().await.last(),
        Some(&ContactFields::new("Ava", "a@x.com", "One more thing"))
    );
}

#[tokio::test(start_paused = true)]
async fn edits_during_failed_phase_do_not_reset_revert() {
    let relay = Arc::new(ScriptedRelay::rejecting("quota exceeded"));
    let controller = controller_with(&relay);
    fill(&controller, "Ava", "a@x.com", "Hi").await;
    controller.submit().await.expect("submit");

    sleep(Duration::from_secs(2)).await;
    controller
        .edit_field(FieldName::Message, "Hello again")
        .await
        .expect("edit while failed");
    assert!(matches!(controller.phase().await, Phase::Failed { .. }));

    sleep(Duration::from_secs(4)).await;
    assert_eq!(controller.phase().await, Phase::Idle);
    assert_eq!(
        controller.fields().await,
        ContactFields::new("Ava", "a@x.com", "Hello again")
    );
}

#[tokio::test]
async fn teardown_mid_request_discards_result() {
    let relay = Arc::new(ScriptedRelay::accepting().gated());
    let controller = controller_with(&relay);
    fill(&controller, "Ava", "a@x.com", "Hi").await;
    let mut events = controller.subscribe_events();

    let pending = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.submit().await }
    });
    assert_eq!(next_phase(&mut events).await, Phase::Submitting);

    controller.teardown().await;
    assert_eq!(pending.await.expect("join"), Err(SubmitError::Detached));

    relay.release();
    tokio::task::yield_now().await;

    assert!(controller.is_detached().await);
    assert_eq!(controller.phase().await, Phase::Submitting);
    assert_eq!(
        controller.fields().await,
        ContactFields::new("Ava", "a@x.com", "Hi")
    );
    assert!(drain_phases(&mut events).is_empty());
    assert_eq!(
        controller.edit_field(FieldName::Name, "Bo").await,
        Err(EditError::Detached)
    );
    assert_eq!(controller.submit().await, Err(SubmitError::Detached));
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_pending_revert() {
    let relay = Arc::new(ScriptedRelay::accepting());
    let controller = controller_with(&relay);
    fill(&controller, "Ava", "a@x.com", "Hi").await;
    controller.submit().await.expect("submit");
    let mut events = controller.subscribe_events();

    controller.teardown().await;
    controller.teardown().await;
    sleep(Duration::from_secs(10)).await;

    assert_eq!(controller.phase().await, Phase::Succeeded);
    assert!(drain_phases(&mut events).is_empty());
}

#[tokio::test]
async fn phase_events_serialize_with_event_tag() {
    let relay = Arc::new(ScriptedRelay::accepting());
    let controller = controller_with(&relay);
    let mut events = controller.subscribe_events();

    controller
        .edit_field(FieldName::Email, "a@x.com")
        .await
        .expect("edit");
    let event = events.recv().await.expect("event");
    let value = serde_json::to_value(&event).expect("serialize");

    assert_eq!(value["event"], "field_edited");
    assert_eq!(value["field"], "email");
    assert!(value["at"].is_string());
}
