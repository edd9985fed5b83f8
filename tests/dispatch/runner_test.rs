//! Campaign runner lifecycle against scripted senders.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use herald::channels::{Attachment, ChannelSender, Delivery, SendError, SendResult};
use herald::config::{CampaignConfig, Channel};
use herald::contacts::Contact;
use herald::dispatch::{
    CampaignError, CampaignRunner, CampaignState, CancelToken, ChannelSink, ProgressEvent,
};

/// Plays back one outcome per send, in order, and records what it saw.
#[derive(Default)]
struct ScriptedSender {
    outcomes: Mutex<VecDeque<Result<Delivery, SendError>>>,
    attempted: Mutex<Vec<(String, String)>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    open_error: Option<SendError>,
    cancel_during: Option<(usize, CancelToken)>,
    stall_on: Option<usize>,
    panic_on: Option<usize>,
}

impl ScriptedSender {
    fn with_outcomes(outcomes: Vec<Result<Delivery, SendError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    fn attempted(&self) -> Vec<String> {
        self.attempted
            .lock()
            .expect("lock")
            .iter()
            .map(|(identity, _)| identity.clone())
            .collect()
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    fn channel(&self) -> Channel {
        Channel::Chat
    }

    async fn open(&self, _cancel: &CancelToken) -> Result<(), SendError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match &self.open_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn send(
        &self,
        contact: &Contact,
        message: &str,
        _attachment: Option<&Attachment>,
        _cancel: &CancelToken,
    ) -> SendResult {
        let index = {
            let mut attempted = self.attempted.lock().expect("lock");
            attempted.push((contact.identity.clone(), message.to_owned()));
            attempted.len()
        };
        if let Some((at, token)) = &self.cancel_during {
            if *at == index {
                token.cancel();
            }
        }
        if self.stall_on == Some(index) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.panic_on == Some(index) {
            panic!("driver crashed");
        }
        let outcome = self
            .outcomes
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(Ok(Delivery::Text));
        SendResult {
            identity: contact.identity.clone(),
            outcome,
        }
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn contacts(n: usize) -> Vec<Contact> {
    (1..=n)
        .map(|i| Contact::new(format!("555000{i}"), format!("Person {i}"), i))
        .collect()
}

fn runner(
    config: CampaignConfig,
    sender: Arc<ScriptedSender>,
    cancel: CancelToken,
) -> (CampaignRunner, UnboundedReceiver<ProgressEvent>) {
    let (sink, rx) = ChannelSink::new();
    (CampaignRunner::new(config, sender, Arc::new(sink), cancel), rx)
}

fn drain(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn per_contact(events: &[ProgressEvent]) -> Vec<&ProgressEvent> {
    events.iter().filter(|e| e.line.starts_with('[')).collect()
}

fn chat_config() -> CampaignConfig {
    CampaignConfig::new(Channel::Chat, "Our store opens at nine, {name}.")
}

#[tokio::test]
async fn empty_contact_list_completes_without_opening_the_channel() {
    let sender = Arc::new(ScriptedSender::default());
    let (mut runner, mut rx) = runner(chat_config(), Arc::clone(&sender), CancelToken::new());

    let report = runner.run(Vec::new()).await.expect("empty run succeeds");

    assert_eq!(runner.state(), CampaignState::Completed);
    assert_eq!(report.stats.sent, 0);
    assert_eq!(report.stats.failed, 0);
    assert_eq!(sender.opens.load(Ordering::SeqCst), 0);
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| e.line == "No contacts to process"));
}

#[tokio::test]
async fn mixed_outcomes_are_counted_and_reported() {
    let sender = Arc::new(ScriptedSender::with_outcomes(vec![
        Ok(Delivery::Text),
        Err(SendError::ContextTimeout("chat pane".into())),
        Ok(Delivery::TextFallback),
        Err(SendError::Transport("bridge down".into())),
    ]));
    let (mut runner, mut rx) = runner(chat_config(), Arc::clone(&sender), CancelToken::new());

    let report = runner.run(contacts(4)).await.expect("run succeeds");

    assert_eq!(report.total, 4);
    assert_eq!(report.stats.sent, 2);
    assert_eq!(report.stats.failed, 2);
    assert_eq!(report.stats.pending, 0);
    assert_eq!(report.stats.failed_identities, vec!["5550002", "5550004"]);
    assert!(!report.cancelled);
    assert_eq!(sender.opens.load(Ordering::SeqCst), 1);
    assert_eq!(sender.closes.load(Ordering::SeqCst), 1);

    let events = drain(&mut rx);
    let contact_events = per_contact(&events);
    assert_eq!(contact_events.len(), 4);
    let pending: Vec<usize> = contact_events.iter().map(|e| e.stats.pending).collect();
    assert_eq!(pending, vec![3, 2, 1, 0]);
    assert!(events.iter().any(|e| e.line == "COMPLETE: 2/4 sent | Failed: 2"));
    assert!(events
        .iter()
        .any(|e| e.line == "Failed contacts: 5550002, 5550004"));
}

#[tokio::test]
async fn messages_are_personalized_per_contact() {
    let sender = Arc::new(ScriptedSender::default());
    let (mut runner, _rx) = runner(chat_config(), Arc::clone(&sender), CancelToken::new());

    runner.run(contacts(2)).await.expect("run succeeds");

    let attempted = sender.attempted.lock().expect("lock");
    assert_eq!(attempted[0].1, "Hello Person 1,\n\nOur store opens at nine, Person 1.");
    assert_eq!(attempted[1].1, "Hello Person 2,\n\nOur store opens at nine, Person 2.");
}

#[tokio::test]
async fn cancellation_lets_the_in_flight_send_finish_then_stops() {
    let cancel = CancelToken::new();
    let sender = Arc::new(ScriptedSender {
        cancel_during: Some((2, cancel.clone())),
        ..ScriptedSender::default()
    });
    let (mut runner, mut rx) = runner(chat_config(), Arc::clone(&sender), cancel);

    let report = runner.run(contacts(5)).await.expect("cancelled run is not an error");

    assert!(report.cancelled);
    assert_eq!(report.state, CampaignState::Completed);
    assert_eq!(sender.attempted(), vec!["5550001", "5550002"]);
    assert_eq!(report.stats.sent, 2);
    assert_eq!(report.stats.failed, 0);
    assert_eq!(report.stats.pending, 3);
    assert_eq!(sender.closes.load(Ordering::SeqCst), 1);

    let events = drain(&mut rx);
    let stopped = events
        .iter()
        .position(|e| e.line == "Stopped by operator")
        .expect("stop line emitted");
    assert_eq!(events[stopped].state, CampaignState::Cancelling);
    assert!(events.iter().any(|e| e.line == "COMPLETE: 2/5 sent | Failed: 0"));
}

#[tokio::test]
async fn cancellation_during_the_last_send_completes_normally() {
    let cancel = CancelToken::new();
    let sender = Arc::new(ScriptedSender {
        cancel_during: Some((3, cancel.clone())),
        ..ScriptedSender::default()
    });
    let (mut runner, mut rx) = runner(chat_config(), Arc::clone(&sender), cancel);

    let report = runner.run(contacts(3)).await.expect("run succeeds");

    assert!(!report.cancelled);
    assert_eq!(report.stats.sent, 3);
    assert_eq!(report.stats.pending, 0);
    let events = drain(&mut rx);
    assert!(!events.iter().any(|e| e.line == "Stopped by operator"));
    assert!(!events.iter().any(|e| e.state == CampaignState::Cancelling));
    assert!(events.iter().any(|e| e.line == "COMPLETE: 3/3 sent | Failed: 0"));
}

#[tokio::test]
async fn cancelled_before_start_attempts_nothing() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let sender = Arc::new(ScriptedSender::default());
    let (mut runner, _rx) = runner(chat_config(), Arc::clone(&sender), cancel);

    let report = runner.run(contacts(3)).await.expect("run returns a report");

    assert!(report.cancelled);
    assert!(sender.attempted().is_empty());
    assert_eq!(report.stats.pending, 3);
}

#[tokio::test]
async fn authentication_failure_aborts_after_first_contact() {
    let sender = Arc::new(ScriptedSender::with_outcomes(vec![Err(
        SendError::Authentication("535 5.7.8 bad credentials".into()),
    )]));
    let (mut runner, _rx) = runner(chat_config(), Arc::clone(&sender), CancelToken::new());

    let err = runner.run(contacts(3)).await.expect_err("auth failure is fatal");

    assert!(matches!(err, CampaignError::Authentication(_)), "got {err}");
    assert_eq!(sender.attempted(), vec!["5550001"]);
    assert_eq!(runner.state(), CampaignState::Completed);
    assert_eq!(runner.stats().failed, 1);
    assert_eq!(sender.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn watchdog_fails_a_stalled_send_and_moves_on() {
    let sender = Arc::new(ScriptedSender {
        stall_on: Some(1),
        ..ScriptedSender::default()
    });
    let config = chat_config().with_contact_timeout(Some(Duration::from_secs(30)));
    let (mut runner, _rx) = runner(config, Arc::clone(&sender), CancelToken::new());

    let report = runner.run(contacts(2)).await.expect("run succeeds");

    assert_eq!(report.stats.failed_identities, vec!["5550001"]);
    assert_eq!(report.stats.sent, 1);
    assert_eq!(sender.attempted(), vec!["5550001", "5550002"]);
}

#[tokio::test]
async fn panicking_sender_is_recorded_as_failure() {
    let sender = Arc::new(ScriptedSender {
        panic_on: Some(1),
        ..ScriptedSender::default()
    });
    let (mut runner, _rx) = runner(chat_config(), Arc::clone(&sender), CancelToken::new());

    let report = runner.run(contacts(2)).await.expect("run survives the panic");

    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.sent, 1);
}

#[tokio::test]
async fn session_that_never_opens_is_fatal_and_closed() {
    let sender = Arc::new(ScriptedSender {
        open_error: Some(SendError::ContextTimeout("QR code not scanned".into())),
        ..ScriptedSender::default()
    });
    let (mut runner, _rx) = runner(chat_config(), Arc::clone(&sender), CancelToken::new());

    let err = runner.run(contacts(2)).await.expect_err("no session");

    assert!(matches!(err, CampaignError::SessionUnavailable(_)), "got {err}");
    assert!(sender.attempted().is_empty());
    assert_eq!(sender.closes.load(Ordering::SeqCst), 1);
    assert_eq!(runner.state(), CampaignState::Completed);
}

#[tokio::test]
async fn email_campaign_without_credentials_fails_before_running() {
    let sender = Arc::new(ScriptedSender::default());
    let config = CampaignConfig::new(Channel::Email, "hi");
    let (mut runner, _rx) = runner(config, Arc::clone(&sender), CancelToken::new());

    let err = runner.run(contacts(1)).await.expect_err("missing credentials");

    assert!(matches!(err, CampaignError::Config(_)), "got {err}");
    assert_eq!(sender.opens.load(Ordering::SeqCst), 0);
    assert_eq!(runner.state(), CampaignState::Completed);
}

#[tokio::test]
async fn runner_is_single_use() {
    let sender = Arc::new(ScriptedSender::default());
    let (mut runner, _rx) = runner(chat_config(), Arc::clone(&sender), CancelToken::new());
    runner.run(contacts(1)).await.expect("first run");

    let err = runner.run(contacts(1)).await.expect_err("second run rejected");

    assert!(matches!(err, CampaignError::InvalidTransition { .. }), "got {err}");
    assert_eq!(sender.attempted().len(), 1);
}

#[tokio::test]
async fn run_path_reports_unreadable_tables() {
    let sender = Arc::new(ScriptedSender::default());
    let (mut runner, _rx) = runner(chat_config(), Arc::clone(&sender), CancelToken::new());

    let err = runner
        .run_path(std::path::Path::new("/nonexistent/herald/list.csv"))
        .await
        .expect_err("missing table");

    assert!(matches!(err, CampaignError::Load(_)), "got {err}");
    assert_eq!(runner.state(), CampaignState::Completed);
}
