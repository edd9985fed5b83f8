//! Messenger sender flows against the mock driver.

use std::sync::Arc;

use herald::channels::{ChannelSender, Delivery, ExhaustionPolicy, MessengerSender, SendError};
use herald::contacts::Contact;
use herald::dispatch::{CancelToken, DelayPlanner};
use herald::driver::BrowserDriver;

use crate::mock_driver::MockDriver;

fn sender(driver: &Arc<MockDriver>) -> MessengerSender {
    MessengerSender::new(
        Arc::clone(driver) as Arc<dyn BrowserDriver>,
        "https://m.example",
        DelayPlanner::new(1, 0),
        10,
        ExhaustionPolicy::Fail,
    )
}

#[test]
fn conversation_url_uses_the_handle() {
    let driver = Arc::new(MockDriver::default());
    assert_eq!(sender(&driver).conversation_url("ann.lee"), "https://m.example/t/ann.lee");
}

#[tokio::test(start_paused = true)]
async fn message_box_is_cleared_typed_and_submitted() {
    let driver = Arc::new(MockDriver::with_present(&["@role='textbox'"]));
    let contact = Contact::new("ann.lee", "Ann", 1);

    let result = sender(&driver)
        .send(&contact, "Thanks for visiting", None, &CancelToken::new())
        .await;

    assert_eq!(result.outcome, Ok(Delivery::Text));
    let log = driver.log();
    assert_eq!(log[0], "navigate:https://m.example/t/ann.lee");
    let keys: Vec<&str> = log
        .iter()
        .filter(|e| e.starts_with("press:") || e.starts_with("type:"))
        .map(String::as_str)
        .collect();
    assert_eq!(
        keys,
        vec!["press:Control+A", "press:Backspace", "type:Thanks for visiting", "press:Enter"]
    );
}

#[tokio::test(start_paused = true)]
async fn continue_chatting_interstitial_is_dismissed() {
    let driver = Arc::new(MockDriver::with_present(&["@role='textbox'", "Continue chatting"]));
    let contact = Contact::new("bo99", "Bo", 2);

    let result = sender(&driver)
        .send(&contact, "hi", None, &CancelToken::new())
        .await;

    assert!(result.ok());
    assert!(driver
        .log()
        .iter()
        .any(|e| e.starts_with("click:Native:") && e.contains("Continue chatting")));
}

#[tokio::test(start_paused = true)]
async fn missing_message_box_is_a_context_timeout() {
    let driver = Arc::new(MockDriver::default());
    let contact = Contact::new("ghost", "Friend", 1);

    let result = sender(&driver)
        .send(&contact, "hi", None, &CancelToken::new())
        .await;

    assert!(matches!(result.outcome, Err(SendError::ContextTimeout(_))), "{result:?}");
}

#[tokio::test(start_paused = true)]
async fn open_waits_out_the_login_page() {
    let driver = Arc::new(MockDriver {
        login_polls: 3,
        ..MockDriver::default()
    });
    sender(&driver)
        .open(&CancelToken::new())
        .await
        .expect("login completes");
    assert!(driver.contains("navigate:https://m.example"));
}

#[tokio::test(start_paused = true)]
async fn open_gives_up_when_never_logged_in() {
    let driver = Arc::new(MockDriver {
        login_polls: usize::MAX,
        ..MockDriver::default()
    });
    let err = sender(&driver)
        .open(&CancelToken::new())
        .await
        .expect_err("still on login");
    assert!(matches!(err, SendError::ContextTimeout(_)), "got {err}");
}
