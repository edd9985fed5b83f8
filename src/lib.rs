//! Herald: bulk messaging campaigns over web chat, email, device SMS, and messenger.
//!
//! A campaign loads a contact table, personalizes one message template per
//! contact, and hands each message to a channel sender, one contact at a time.
//! Flaky UI automation is tamed by ordered fallback strategies, and every wait
//! point honors a shared cancellation token.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod contacts;
pub mod dispatch;

pub mod channels;
pub mod device;
pub mod driver;
