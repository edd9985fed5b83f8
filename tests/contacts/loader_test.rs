//! Tests for loading contact tables from disk.

use std::path::PathBuf;

use herald::config::{CampaignConfig, Channel};
use herald::contacts::{ContactLoader, ContactsError};

fn write_csv(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).expect("write csv");
    path
}

#[test]
fn phone_table_respects_row_window_and_prefix() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_csv(
        &dir,
        "phones.csv",
        "Name,Phone\nAnn,+977-980-3661701\nBo,98012345\nCy,(555) 010-2000\nDee,\nEd,555 0100\n",
    );
    let config = CampaignConfig::new(Channel::Chat, "hi")
        .with_rows(1, 4)
        .with_skip_prefix(Some("980".to_owned()));

    let contacts = ContactLoader::from_config(&config)
        .load_path(&path)
        .expect("table parses");

    let identities: Vec<&str> = contacts.iter().map(|c| c.identity.as_str()).collect();
    assert_eq!(identities, vec!["9779803661701", "5550102000"]);
    assert!(contacts.iter().all(|c| (1..=4).contains(&c.row_number)));
    assert_eq!(contacts[0].display_name, "Ann");
    assert_eq!(contacts[1].row_number, 3);
}

#[test]
fn email_table_drops_malformed_addresses() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_csv(
        &dir,
        "mail.csv",
        "email,name\n Ann@Example.COM ,Ann\na@b,Bad\nnot-an-address,Worse\nbo@mail.org,\n",
    );

    let loader = ContactLoader::new(Channel::Email);
    let table = herald::contacts::Table::from_path(&path).expect("table parses");
    let (contacts, rejected) = loader.load_detailed(&table);

    let identities: Vec<&str> = contacts.iter().map(|c| c.identity.as_str()).collect();
    assert_eq!(identities, vec!["ann@example.com", "bo@mail.org"]);
    assert_eq!(contacts[1].display_name, "Friend");
    let rejected_rows: Vec<usize> = rejected.iter().map(|r| r.row_number).collect();
    assert_eq!(rejected_rows, vec![2, 3]);
}

#[test]
fn messenger_rows_carry_their_own_message() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_csv(
        &dir,
        "handles.csv",
        "username,name,message\nAnn.Lee,Ann,See you {name}\nbo99,Bo,\nnan,Nobody,skip me\n",
    );

    let contacts = ContactLoader::new(Channel::Messenger)
        .load_path(&path)
        .expect("table parses");

    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[0].identity, "Ann.Lee");
    assert_eq!(contacts[0].custom_message.as_deref(), Some("See you {name}"));
    assert_eq!(contacts[1].custom_message, None);
}

#[test]
fn missing_file_is_a_load_error() {
    let err = ContactLoader::new(Channel::Sms)
        .load_path(std::path::Path::new("/nonexistent/herald/contacts.csv"))
        .expect_err("file does not exist");
    assert!(matches!(err, ContactsError::Io { .. }), "got {err}");
}

#[test]
fn empty_records_keep_row_numbers_aligned() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_csv(&dir, "gaps.csv", "phone,name\n111,A\n,\n333,C\n");
    let table = herald::contacts::Table::from_path(&path).expect("table parses");

    let third_only = ContactLoader::new(Channel::Chat).with_rows(3, 3).load(&table);
    assert_eq!(third_only.len(), 1);
    assert_eq!(third_only[0].identity, "333");
    assert_eq!(third_only[0].row_number, 3);

    let (contacts, rejected) = ContactLoader::new(Channel::Chat).load_detailed(&table);
    assert_eq!(contacts.len(), 2);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].row_number, 2);
    assert_eq!(rejected[0].reason, "empty identity");
}
