//! SMS sender flows against a scripted device bridge.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use herald::channels::{Attachment, ChannelSender, Delivery, ExhaustionPolicy, SendError, SmsSender};
use herald::contacts::Contact;
use herald::device::{DeviceBridge, DeviceError};
use herald::dispatch::{CancelToken, DelayPlanner};

const LAUNCHER: &str = "mCurrentFocus=Window{9f u0 com.android.launcher3/.Launcher}";

/// Answers shell commands by prefix and records everything it ran.
///
/// A landed tap or an ENTER key "sends" the message, after which the
/// launcher holds focus.
struct ScriptedBridge {
    focus: &'static str,
    booted: &'static str,
    tap_fails: bool,
    tap_lands: bool,
    enter_lands: bool,
    push_fails: bool,
    sent: AtomicBool,
    commands: Mutex<Vec<String>>,
}

impl Default for ScriptedBridge {
    fn default() -> Self {
        Self {
            focus: "mCurrentFocus=Window{1a2b u0 com.google.android.apps.messaging/.ui.ConversationActivity}",
            booted: "1\n",
            tap_fails: false,
            tap_lands: true,
            enter_lands: true,
            push_fails: false,
            sent: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedBridge {
    fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("lock").clone()
    }
}

#[async_trait]
impl DeviceBridge for ScriptedBridge {
    async fn shell(&self, command: &str) -> Result<String, DeviceError> {
        self.commands.lock().expect("lock").push(command.to_owned());
        if command.starts_with("input tap") {
            if self.tap_fails {
                return Err(DeviceError::Timeout(command.to_owned()));
            }
            if self.tap_lands {
                self.sent.store(true, Ordering::SeqCst);
            }
        }
        if command == "input keyevent 66" && self.enter_lands {
            self.sent.store(true, Ordering::SeqCst);
        }
        if command.starts_with("dumpsys window") {
            if self.sent.load(Ordering::SeqCst) {
                return Ok(LAUNCHER.to_owned());
            }
            return Ok(self.focus.to_owned());
        }
        if command.starts_with("getprop sys.boot_completed") {
            return Ok(self.booted.to_owned());
        }
        Ok(String::new())
    }

    async fn push(&self, local: &Path, remote: &str) -> Result<(), DeviceError> {
        self.commands
            .lock()
            .expect("lock")
            .push(format!("push {} {remote}", local.display()));
        if self.push_fails {
            return Err(DeviceError::NoDevice);
        }
        Ok(())
    }
}

fn sender(bridge: &Arc<ScriptedBridge>) -> SmsSender {
    SmsSender::new(
        Arc::clone(bridge) as Arc<dyn DeviceBridge>,
        DelayPlanner::new(1, 0),
        (1000, 2200),
        ExhaustionPolicy::Fail,
    )
}

fn ann() -> Contact {
    Contact::new("9779803661701", "Ann", 1)
}

#[tokio::test(start_paused = true)]
async fn text_is_composed_by_intent_and_sent_by_tap() {
    let bridge = Arc::new(ScriptedBridge::default());

    let result = sender(&bridge)
        .send(&ann(), "It's ready", None, &CancelToken::new())
        .await;

    assert_eq!(result.outcome, Ok(Delivery::Text));
    let commands = bridge.commands();
    assert_eq!(
        commands[0],
        r"am start -a android.intent.action.SENDTO -d sms:9779803661701 --es sms_body 'It'\''s ready' --ez exit_on_sent true"
    );
    assert!(commands.contains(&"input tap 1000 2200".to_owned()));
    assert!(!commands.iter().any(|c| c.starts_with("input keyevent")));
}

#[tokio::test(start_paused = true)]
async fn key_navigation_is_the_fallback_when_tapping_fails() {
    let bridge = Arc::new(ScriptedBridge {
        tap_fails: true,
        ..ScriptedBridge::default()
    });

    let result = sender(&bridge)
        .send(&ann(), "hi", None, &CancelToken::new())
        .await;

    assert!(result.ok());
    let keys: Vec<String> = bridge
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("input keyevent"))
        .collect();
    assert_eq!(keys, vec!["input keyevent 22", "input keyevent 66"]);
}

#[tokio::test(start_paused = true)]
async fn tap_that_leaves_compose_open_falls_through_to_keys() {
    let bridge = Arc::new(ScriptedBridge {
        tap_lands: false,
        ..ScriptedBridge::default()
    });

    let result = sender(&bridge)
        .send(&ann(), "hi", None, &CancelToken::new())
        .await;

    assert_eq!(result.outcome, Ok(Delivery::Text));
    let commands = bridge.commands();
    let tap = commands
        .iter()
        .position(|c| c == "input tap 1000 2200")
        .expect("tap attempted");
    let keys: Vec<String> = commands[tap..]
        .iter()
        .filter(|c| c.starts_with("input keyevent"))
        .cloned()
        .collect();
    assert_eq!(keys, vec!["input keyevent 22", "input keyevent 66"]);
}

#[tokio::test(start_paused = true)]
async fn submit_that_never_leaves_compose_fails() {
    let bridge = Arc::new(ScriptedBridge {
        tap_lands: false,
        enter_lands: false,
        ..ScriptedBridge::default()
    });

    let result = sender(&bridge)
        .send(&ann(), "hi", None, &CancelToken::new())
        .await;

    assert!(matches!(result.outcome, Err(SendError::Transport(_))), "{result:?}");
}

#[tokio::test(start_paused = true)]
async fn unfocused_messaging_app_is_a_context_timeout() {
    let bridge = Arc::new(ScriptedBridge {
        focus: LAUNCHER,
        ..ScriptedBridge::default()
    });

    let result = sender(&bridge)
        .send(&ann(), "hi", None, &CancelToken::new())
        .await;

    assert!(matches!(result.outcome, Err(SendError::ContextTimeout(_))), "{result:?}");
    assert!(!bridge.commands().iter().any(|c| c.starts_with("input")));
}

#[tokio::test(start_paused = true)]
async fn attachment_is_pushed_and_shared() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("coupon.png");
    std::fs::write(&path, b"png").expect("write");
    let attachment = Attachment::from_path(&path).expect("attachment");
    let bridge = Arc::new(ScriptedBridge::default());

    let result = sender(&bridge)
        .send(&ann(), "Your coupon", Some(&attachment), &CancelToken::new())
        .await;

    assert_eq!(result.outcome, Ok(Delivery::WithAttachment));
    let commands = bridge.commands();
    assert!(commands[0].ends_with(" /sdcard/Download/coupon.png"));
    assert!(commands[1].starts_with("am start -a android.intent.action.SEND -t image/png"));
    assert!(commands[1].contains("file:///sdcard/Download/coupon.png"));
}

#[tokio::test(start_paused = true)]
async fn failed_push_falls_back_to_text() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("coupon.png");
    std::fs::write(&path, b"png").expect("write");
    let attachment = Attachment::from_path(&path).expect("attachment");
    let bridge = Arc::new(ScriptedBridge {
        push_fails: true,
        ..ScriptedBridge::default()
    });

    let result = sender(&bridge)
        .send(&ann(), "Your coupon", Some(&attachment), &CancelToken::new())
        .await;

    assert_eq!(result.outcome, Ok(Delivery::TextFallback));
    assert!(bridge
        .commands()
        .iter()
        .any(|c| c.contains("android.intent.action.SENDTO")));
}

#[tokio::test]
async fn open_requires_a_booted_device() {
    let ready = Arc::new(ScriptedBridge::default());
    sender(&ready)
        .open(&CancelToken::new())
        .await
        .expect("device booted");

    let booting = Arc::new(ScriptedBridge {
        booted: "0\n",
        ..ScriptedBridge::default()
    });
    let err = sender(&booting)
        .open(&CancelToken::new())
        .await
        .expect_err("not booted");
    assert!(matches!(err, SendError::ContextTimeout(_)), "got {err}");
}
