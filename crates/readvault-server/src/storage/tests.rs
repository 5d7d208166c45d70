//! Storage layer tests for `ReadVault`.
//!
//! Most tests run against in-memory `SQLite`. `conformance_on_every_backend`
//! also runs against `PostgreSQL` and `MySQL` when
//! `READVAULT_TEST_POSTGRES_URL` / `READVAULT_TEST_MYSQL_URL` are set.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use readvault_core::config::DatabaseConfig;
use readvault_core::db::unix_timestamp;

use super::migrate::{CURRENT_VERSION, SchemaOps, VERSION_SETTING};
use super::*;
use crate::auth::password::hash_password;

static DIGEST: LazyLock<String> = LazyLock::new(|| hash_password("correct horse").unwrap());

async fn test_db() -> SqliteDatabase {
    SqliteDatabase::open_in_memory().await.unwrap()
}

async fn add_account(db: &dyn Database, email: &str) -> Account {
    db.add_account(NewAccount {
        name: "Timer".to_string(),
        email: email.to_string(),
        password: DIGEST.clone(),
        account_type: AccountType::Paid,
    })
    .await
    .unwrap()
}

fn key(account_id: i64, value: &str, reader: &str, scope: Scope) -> Key {
    Key {
        account_id,
        name: format!("{reader} key"),
        value: value.to_string(),
        reader_name: reader.to_string(),
        scope,
        valid_until: None,
    }
}

async fn add_key(db: &dyn Database, account_id: i64, value: &str, reader: &str) -> Key {
    db.add_key(key(account_id, value, reader, Scope::Write))
        .await
        .unwrap()
}

fn read(identifier: &str, seconds: i64, milliseconds: i32) -> Read {
    Read {
        key: String::new(),
        identifier: identifier.to_string(),
        seconds,
        milliseconds,
        ident_type: IdentType::Chip,
        kind: ReadKind::Reader,
        antenna: Some(1),
        reader: "reader-1".to_string(),
        rssi: "-60".to_string(),
    }
}

// === Schema tests ===

#[tokio::test]
async fn fresh_database_is_created_at_current_version() {
    let db = test_db().await;
    assert_eq!(db.schema_version().await, CURRENT_VERSION);

    db.ensure_schema().await.unwrap();
    assert_eq!(db.schema_version().await, CURRENT_VERSION);
}

#[tokio::test]
async fn unmigrated_database_reports_no_schema() {
    let db = SqliteDatabase::connect_in_memory().await.unwrap();
    assert_eq!(db.schema_version().await, migrate::NO_SCHEMA);
    assert!(db.get_setting(VERSION_SETTING).await.is_err());
}

#[tokio::test]
async fn version_one_database_is_upgraded() {
    let db = SqliteDatabase::connect_in_memory().await.unwrap();
    let catalog = &sqlite::CATALOG;
    let version_one = &catalog.create[..catalog.create.len() - 1];
    db.apply(version_one, 1).await.unwrap();
    assert_eq!(db.schema_version().await, 1);

    db.ensure_schema().await.unwrap();
    assert_eq!(db.schema_version().await, 2);

    let account = add_account(&db, "upgrade@example.com").await;
    add_key(&db, account.id, "k-upgrade", "r1").await;
    let outcome = db
        .save_notification(NotificationType::Restarting, unix_timestamp(), "k-upgrade")
        .await
        .unwrap();
    assert_eq!(outcome, SaveOutcome::Inserted);
}

#[tokio::test]
async fn unparsable_version_recreates_idempotently() {
    let db = test_db().await;
    db.set_setting(VERSION_SETTING, "garbage").await.unwrap();
    assert_eq!(db.schema_version().await, migrate::NO_SCHEMA);

    db.ensure_schema().await.unwrap();
    assert_eq!(db.schema_version().await, CURRENT_VERSION);
}

#[tokio::test]
async fn newer_schema_is_refused() {
    let db = test_db().await;
    db.set_setting(VERSION_SETTING, "3").await.unwrap();
    let err = db.ensure_schema().await.unwrap_err();
    assert!(matches!(err, DatabaseError::Migration(_)));
}

#[tokio::test]
async fn failed_statement_rolls_back_the_whole_apply() {
    let db = SqliteDatabase::connect_in_memory().await.unwrap();
    let err = db
        .apply(&["CREATE TABLE IF NOT EXISTS t(a)", "NOT SQL"], CURRENT_VERSION)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Migration(_)));

    let tables: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 't'")
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(tables, 0);
    assert_eq!(db.schema_version().await, migrate::NO_SCHEMA);
}

#[tokio::test]
async fn apply_is_bounded_by_the_query_timeout() {
    let db = SqliteDatabase::connect_in_memory()
        .await
        .unwrap()
        .with_query_timeout(Duration::ZERO);
    let err = db
        .apply(sqlite::CATALOG.create, CURRENT_VERSION)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Timeout(_)));

    let db = db.with_query_timeout(Duration::from_secs(5));
    assert_eq!(db.schema_version().await, migrate::NO_SCHEMA);
}

#[tokio::test]
async fn settings_upsert() {
    let db = test_db().await;
    assert_eq!(db.get_setting("theme").await.unwrap(), None);
    db.set_setting("theme", "dark").await.unwrap();
    db.set_setting("theme", "light").await.unwrap();
    assert_eq!(db.get_setting("theme").await.unwrap().as_deref(), Some("light"));
}

// === Account tests ===

#[tokio::test]
async fn add_and_get_account_every_way() {
    let db = test_db().await;
    let account = add_account(&db, "alice@example.com").await;
    assert_eq!(account.account_type, AccountType::Paid);
    assert!(!account.locked);
    assert_eq!(account.wrong_pass_attempts, 0);

    add_key(&db, account.id, "k-alice", "r1").await;

    let by_email = db
        .get_account(AccountLookup::Email("alice@example.com"))
        .await
        .unwrap();
    let by_key = db.get_account(AccountLookup::Key("k-alice")).await.unwrap();
    let by_id = db.get_account(AccountLookup::Id(account.id)).await.unwrap();
    assert_eq!(by_email, account);
    assert_eq!(by_key, account);
    assert_eq!(by_id, account);

    assert!(matches!(
        db.get_account(AccountLookup::Email("ALICE@example.com")).await,
        Err(DatabaseError::NotFound(_))
    ));
}

#[tokio::test]
async fn plaintext_password_is_rejected() {
    let db = test_db().await;
    let err = db
        .add_account(NewAccount {
            name: "Plain".to_string(),
            email: "plain@example.com".to_string(),
            password: "hunter22".to_string(),
            account_type: AccountType::Free,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Validation(_)));

    let account = add_account(&db, "plain@example.com").await;
    let err = db
        .change_password(&account.email, "hunter22", false)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Validation(_)));
}

#[tokio::test]
async fn email_is_unique_among_active_accounts() {
    let db = test_db().await;
    let first = add_account(&db, "dup@example.com").await;
    let err = db
        .add_account(NewAccount {
            name: "Again".to_string(),
            email: "dup@example.com".to_string(),
            password: DIGEST.clone(),
            account_type: AccountType::Free,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Conflict(_)));

    db.delete_account(first.id).await.unwrap();
    let second = add_account(&db, "dup@example.com").await;
    assert_ne!(first.id, second.id);

    // The old account cannot come back while the email is taken.
    let err = db.resurrect_account("dup@example.com").await.unwrap_err();
    assert!(matches!(err, DatabaseError::Conflict(_)));
}

#[tokio::test]
async fn delete_account_cascades_to_keys_and_resurrects() {
    let db = test_db().await;
    let account = add_account(&db, "gone@example.com").await;
    add_key(&db, account.id, "k-gone-1", "r1").await;
    add_key(&db, account.id, "k-gone-2", "r2").await;

    db.delete_account(account.id).await.unwrap();
    assert!(db.list_accounts().await.unwrap().is_empty());
    assert!(matches!(
        db.get_key("k-gone-1").await,
        Err(DatabaseError::NotFound(_))
    ));
    assert!(matches!(
        db.get_key_and_account("k-gone-2").await,
        Err(DatabaseError::NotFound(_))
    ));
    assert!(matches!(
        db.delete_account(account.id).await,
        Err(DatabaseError::NotFound(_))
    ));

    let deleted = db.get_deleted_account("gone@example.com").await.unwrap();
    assert_eq!(deleted.id, account.id);

    let restored = db.resurrect_account("gone@example.com").await.unwrap();
    assert_eq!(restored.id, account.id);
    assert_eq!(db.list_accounts().await.unwrap().len(), 1);
    // Keys stay retired.
    assert!(
        db.list_account_keys(KeyOwner::Id(account.id))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn update_account_name_and_type() {
    let db = test_db().await;
    let mut account = add_account(&db, "edit@example.com").await;
    account.name = "Renamed".to_string();
    account.account_type = AccountType::Admin;
    db.update_account(&account).await.unwrap();

    let stored = db.get_account(AccountLookup::Id(account.id)).await.unwrap();
    assert_eq!(stored.name, "Renamed");
    assert_eq!(stored.account_type, AccountType::Admin);

    account.email = "nobody@example.com".to_string();
    assert!(db.update_account(&account).await.is_err());
}

#[tokio::test]
async fn four_invalid_passwords_lock_the_account() {
    let db = test_db().await;
    let mut account = add_account(&db, "lock@example.com").await;
    account.token = "access".to_string();
    account.refresh_token = "refresh".to_string();
    db.update_tokens(&account).await.unwrap();

    for attempt in 1..MAX_LOGIN_ATTEMPTS {
        let updated = db.record_invalid_password(&account).await.unwrap();
        assert_eq!(updated.wrong_pass_attempts, attempt);
        assert!(!updated.locked);
        assert_eq!(updated.token, "access");
    }
    let locked = db.record_invalid_password(&account).await.unwrap();
    assert!(locked.locked);
    assert!(locked.token.is_empty());
    assert!(locked.refresh_token.is_empty());

    let err = db.record_valid_password(&locked).await.unwrap_err();
    assert!(matches!(err, DatabaseError::AccountLocked(_)));

    // Further failures keep it locked.
    assert!(db.record_invalid_password(&locked).await.unwrap().locked);

    db.unlock_account(&locked).await.unwrap();
    let unlocked = db.get_account(AccountLookup::Id(account.id)).await.unwrap();
    assert!(!unlocked.locked);
    assert_eq!(unlocked.wrong_pass_attempts, 0);

    db.record_valid_password(&unlocked).await.unwrap();
    assert!(matches!(
        db.unlock_account(&unlocked).await,
        Err(DatabaseError::Validation(_))
    ));
}

#[tokio::test]
async fn valid_password_resets_counter() {
    let db = test_db().await;
    let account = add_account(&db, "reset@example.com").await;
    db.record_invalid_password(&account).await.unwrap();
    db.record_invalid_password(&account).await.unwrap();
    db.record_valid_password(&account).await.unwrap();

    let stored = db.get_account(AccountLookup::Id(account.id)).await.unwrap();
    assert_eq!(stored.wrong_pass_attempts, 0);
}

#[tokio::test]
async fn password_and_email_changes_clear_tokens() {
    let db = test_db().await;
    let mut account = add_account(&db, "old@example.com").await;
    account.token = "access".to_string();
    account.refresh_token = "refresh".to_string();
    db.update_tokens(&account).await.unwrap();

    let new_digest = hash_password("new password").unwrap();
    db.change_password("old@example.com", &new_digest, false)
        .await
        .unwrap();
    let kept = db.get_account(AccountLookup::Id(account.id)).await.unwrap();
    assert_eq!(kept.password, new_digest);
    assert_eq!(kept.token, "access");

    db.change_password("old@example.com", &new_digest, true)
        .await
        .unwrap();
    let cleared = db.get_account(AccountLookup::Id(account.id)).await.unwrap();
    assert!(cleared.token.is_empty());
    assert!(cleared.refresh_token.is_empty());

    db.update_tokens(&account).await.unwrap();
    db.change_email("old@example.com", "new@example.com")
        .await
        .unwrap();
    let moved = db.get_account(AccountLookup::Id(account.id)).await.unwrap();
    assert_eq!(moved.email, "new@example.com");
    assert!(moved.token.is_empty());
    assert!(
        db.change_email("old@example.com", "other@example.com")
            .await
            .is_err()
    );
}

// === Key tests ===

#[tokio::test]
async fn key_round_trip_and_update() {
    let db = test_db().await;
    let account = add_account(&db, "keys@example.com").await;
    let mut original = key(account.id, "k-round", "r1", Scope::Read);
    original.valid_until = Some(unix_timestamp() + 3600);

    let added = db.add_key(original.clone()).await.unwrap();
    assert_eq!(added, original);
    assert_eq!(db.get_key("k-round").await.unwrap(), original);

    let mut changed = original.clone();
    changed.name = "renamed".to_string();
    changed.scope = Scope::Delete;
    changed.reader_name = "r9".to_string();
    changed.valid_until = None;
    db.update_key(&changed).await.unwrap();
    assert_eq!(db.get_key("k-round").await.unwrap(), changed);
}

#[tokio::test]
async fn deleted_key_rejects_update_and_second_delete() {
    let db = test_db().await;
    let account = add_account(&db, "del@example.com").await;
    let k = add_key(&db, account.id, "k-del", "r1").await;

    db.delete_key("k-del").await.unwrap();
    assert!(matches!(
        db.delete_key("k-del").await,
        Err(DatabaseError::Validation(_))
    ));
    assert!(db.update_key(&k).await.is_err());
    assert!(matches!(
        db.get_key("k-del").await,
        Err(DatabaseError::NotFound(_))
    ));
}

#[tokio::test]
async fn reader_name_is_unique_per_account_only() {
    let db = test_db().await;
    let a = add_account(&db, "a@example.com").await;
    let b = add_account(&db, "b@example.com").await;

    add_key(&db, a.id, "k-a1", "r1").await;
    let err = db
        .add_key(key(a.id, "k-a2", "r1", Scope::Read))
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Conflict(_)));

    // Another account may use the same reader name.
    add_key(&db, b.id, "k-b1", "r1").await;

    // Key values are globally unique.
    let err = db
        .add_key(key(b.id, "k-a1", "r2", Scope::Read))
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Conflict(_)));

    // A retired key frees its reader name.
    db.delete_key("k-a1").await.unwrap();
    add_key(&db, a.id, "k-a3", "r1").await;
}

#[tokio::test]
async fn key_for_missing_account_is_rejected() {
    let db = test_db().await;
    let err = db
        .add_key(key(999, "k-orphan", "r1", Scope::Write))
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::NotFound(_)));
}

#[tokio::test]
async fn list_keys_by_owner_and_sibling() {
    let db = test_db().await;
    let a = add_account(&db, "lists@example.com").await;
    let b = add_account(&db, "other@example.com").await;
    add_key(&db, a.id, "k-l1", "r1").await;
    add_key(&db, a.id, "k-l2", "r2").await;
    add_key(&db, a.id, "k-l3", "r3").await;
    add_key(&db, b.id, "k-o1", "r1").await;
    db.delete_key("k-l3").await.unwrap();

    let by_email = db
        .list_account_keys(KeyOwner::Email("lists@example.com"))
        .await
        .unwrap();
    let by_id = db.list_account_keys(KeyOwner::Id(a.id)).await.unwrap();
    assert_eq!(by_email, by_id);
    assert_eq!(by_email.len(), 2);

    let siblings = db.list_sibling_keys("k-l1").await.unwrap();
    let values: Vec<&str> = siblings.iter().map(|k| k.value.as_str()).collect();
    assert_eq!(values, vec!["k-l1", "k-l2"]);

    assert!(db.list_sibling_keys("missing").await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_key_is_still_stored() {
    let db = test_db().await;
    let account = add_account(&db, "exp@example.com").await;
    let mut expired = key(account.id, "k-exp", "r1", Scope::Write);
    expired.valid_until = Some(unix_timestamp() - 10);
    db.add_key(expired).await.unwrap();

    let stored = db.get_key("k-exp").await.unwrap();
    assert!(stored.is_expired());

    let resolved = db.get_key_and_account("k-exp").await.unwrap();
    assert_eq!(resolved.account.id, account.id);
    assert!(resolved.key.is_expired());
}

#[tokio::test]
async fn key_and_account_resolution() {
    let db = test_db().await;
    let account = add_account(&db, "resolve@example.com").await;
    add_key(&db, account.id, "k-res", "r1").await;

    let resolved = db.get_key_and_account("k-res").await.unwrap();
    assert_eq!(resolved.key.reader_name, "r1");
    assert_eq!(resolved.key.scope, Scope::Write);
    assert_eq!(resolved.account.email, "resolve@example.com");

    assert!(matches!(
        db.get_key_and_account("nope").await,
        Err(DatabaseError::NotFound(_))
    ));
}

// === Read tests ===

#[tokio::test]
async fn add_reads_is_idempotent() {
    let db = test_db().await;
    let account = add_account(&db, "reads@example.com").await;
    add_key(&db, account.id, "k-reads", "r1").await;

    let batch = vec![read("100", 10, 0), read("101", 11, 500), read("100", 10, 0)];
    let returned = db.add_reads("k-reads", batch.clone()).await.unwrap();
    assert_eq!(returned.len(), 3);
    assert!(returned.iter().all(|r| r.key == "k-reads"));

    db.add_reads("k-reads", batch).await.unwrap();
    let stored = db.get_reads(account.id, "r1", 0, 100).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].identifier, "100");
    assert_eq!(stored[1].milliseconds, 500);
}

#[tokio::test]
async fn identifier_type_is_part_of_read_identity() {
    let db = test_db().await;
    let account = add_account(&db, "bib@example.com").await;
    add_key(&db, account.id, "k-bib", "r1").await;

    let mut bib = read("100", 10, 0);
    bib.ident_type = IdentType::Bib;
    bib.kind = ReadKind::Manual;
    bib.antenna = None;
    db.add_reads("k-bib", vec![read("100", 10, 0), bib.clone()])
        .await
        .unwrap();

    let stored = db.get_reads(account.id, "r1", 0, 100).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(
        stored
            .iter()
            .any(|r| r.ident_type == IdentType::Bib && r.antenna.is_none())
    );
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let db = test_db().await;
    assert!(db.add_reads("anything", Vec::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_for_unknown_key_is_rejected_whole() {
    let db = test_db().await;
    let err = db
        .add_reads("k-missing", vec![read("1", 1, 0), read("2", 2, 0)])
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Validation(_)));
}

#[tokio::test]
async fn failing_read_rolls_back_earlier_reads_in_the_batch() {
    let db = test_db().await;
    let account = add_account(&db, "rollback@example.com").await;
    add_key(&db, account.id, "k-rollback", "r1").await;
    sqlx::query(
        "CREATE TRIGGER reject_bad_read BEFORE INSERT ON a_read \
         WHEN NEW.identifier = 'bad' BEGIN SELECT RAISE(ABORT, 'rejected'); END",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let result = db
        .add_reads("k-rollback", vec![read("good", 1000, 0), read("bad", 1001, 0)])
        .await;
    assert!(result.is_err());

    let stored = db.get_reads(account.id, "r1", 0, 2000).await.unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn inverted_query_window_defaults_to_six_minutes() {
    let db = test_db().await;
    let account = add_account(&db, "window@example.com").await;
    add_key(&db, account.id, "k-window", "r1").await;
    db.add_reads(
        "k-window",
        vec![
            read("1", 999, 0),
            read("2", 1000, 0),
            read("3", 1200, 0),
            read("4", 1360, 999),
            read("5", 1361, 0),
        ],
    )
    .await
    .unwrap();

    let inverted = db.get_reads(account.id, "r1", 1000, 500).await.unwrap();
    let explicit = db.get_reads(account.id, "r1", 1000, 1360).await.unwrap();
    assert_eq!(inverted, explicit);
    let ids: Vec<&str> = inverted.iter().map(|r| r.identifier.as_str()).collect();
    assert_eq!(ids, vec!["2", "3", "4"]);
}

#[tokio::test]
async fn inverted_delete_range_is_rejected_without_deleting() {
    let db = test_db().await;
    let account = add_account(&db, "range@example.com").await;
    add_key(&db, account.id, "k-range", "r1").await;
    db.add_reads("k-range", vec![read("1", 700, 0), read("2", 1100, 0)])
        .await
        .unwrap();

    let err = db.delete_reads(account.id, "r1", 1000, 500).await.unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::InvalidRange { from: 1000, to: 500 }
    ));
    assert_eq!(db.get_reads(account.id, "r1", 0, 5000).await.unwrap().len(), 2);

    assert_eq!(db.delete_reads(account.id, "r1", 1000, 2000).await.unwrap(), 1);
    assert_eq!(db.get_reads(account.id, "r1", 0, 5000).await.unwrap().len(), 1);
}

#[tokio::test]
async fn reader_deletes_cover_retired_keys() {
    let db = test_db().await;
    let account = add_account(&db, "retire@example.com").await;
    add_key(&db, account.id, "k-old", "r1").await;
    db.add_reads("k-old", vec![read("1", 10, 0), read("2", 20, 0)])
        .await
        .unwrap();
    db.delete_key("k-old").await.unwrap();

    add_key(&db, account.id, "k-new", "r1").await;
    db.add_reads("k-new", vec![read("3", 30, 0), read("4", 40, 0)])
        .await
        .unwrap();

    // Queries see reads from retired keys too.
    assert_eq!(db.get_reads(account.id, "r1", 0, 100).await.unwrap().len(), 4);

    assert_eq!(db.delete_reads_before(account.id, "r1", 20).await.unwrap(), 2);
    assert_eq!(db.delete_key_reads("k-new").await.unwrap(), 2);
    assert_eq!(db.delete_key_reads("k-new").await.unwrap(), 0);

    db.add_reads("k-new", vec![read("5", 50, 0)]).await.unwrap();
    assert_eq!(db.delete_reader_reads(account.id, "r1").await.unwrap(), 1);
    assert_eq!(db.delete_reader_reads(account.id, "r1").await.unwrap(), 0);
}

#[tokio::test]
async fn reader_queries_are_scoped_to_the_account() {
    let db = test_db().await;
    let a = add_account(&db, "scope-a@example.com").await;
    let b = add_account(&db, "scope-b@example.com").await;
    add_key(&db, a.id, "k-sa", "r1").await;
    add_key(&db, b.id, "k-sb", "r1").await;
    db.add_reads("k-sa", vec![read("1", 10, 0)]).await.unwrap();
    db.add_reads("k-sb", vec![read("2", 10, 0), read("3", 11, 0)])
        .await
        .unwrap();

    assert_eq!(db.get_reads(a.id, "r1", 0, 100).await.unwrap().len(), 1);
    assert_eq!(db.delete_reader_reads(a.id, "r1").await.unwrap(), 1);
    assert_eq!(db.get_reads(b.id, "r1", 0, 100).await.unwrap().len(), 2);
}

// === Notification tests ===

#[tokio::test]
async fn duplicate_notification_is_reported_not_failed() {
    let db = test_db().await;
    let account = add_account(&db, "note@example.com").await;
    add_key(&db, account.id, "k-note", "r1").await;
    let when = unix_timestamp();

    let first = db
        .save_notification(NotificationType::UpsOnBattery, when, "k-note")
        .await
        .unwrap();
    let second = db
        .save_notification(NotificationType::UpsOnline, when, "k-note")
        .await
        .unwrap();
    assert_eq!(first, SaveOutcome::Inserted);
    assert_eq!(second, SaveOutcome::Duplicate);

    let latest = db.get_notification(account.id, "r1").await.unwrap().unwrap();
    assert_eq!(latest.kind, NotificationType::UpsOnBattery);
    assert_eq!(latest.when.timestamp(), when);
}

#[tokio::test]
async fn notification_freshness_window() {
    let db = test_db().await;
    let account = add_account(&db, "fresh@example.com").await;
    add_key(&db, account.id, "k-fresh", "r1").await;
    let now = unix_timestamp();

    db.save_notification(NotificationType::HighTemp, now - 301, "k-fresh")
        .await
        .unwrap();
    assert!(db.get_notification(account.id, "r1").await.unwrap().is_none());

    db.save_notification(NotificationType::MaxTemp, now - 299, "k-fresh")
        .await
        .unwrap();
    let latest = db.get_notification(account.id, "r1").await.unwrap().unwrap();
    assert_eq!(latest.kind, NotificationType::MaxTemp);
}

#[tokio::test]
async fn latest_notification_spans_the_readers_keys() {
    let db = test_db().await;
    let account = add_account(&db, "span@example.com").await;
    add_key(&db, account.id, "k-span-old", "r1").await;
    let now = unix_timestamp();
    db.save_notification(NotificationType::UpsDisconnected, now - 20, "k-span-old")
        .await
        .unwrap();
    db.delete_key("k-span-old").await.unwrap();

    add_key(&db, account.id, "k-span-new", "r1").await;
    db.save_notification(NotificationType::ShuttingDown, now - 5, "k-span-new")
        .await
        .unwrap();
    add_key(&db, account.id, "k-span-other", "r2").await;
    db.save_notification(NotificationType::UpsLowBattery, now, "k-span-other")
        .await
        .unwrap();

    let latest = db.get_notification(account.id, "r1").await.unwrap().unwrap();
    assert_eq!(latest.kind, NotificationType::ShuttingDown);
    assert!(db.get_notification(account.id, "r3").await.unwrap().is_none());
}

// === Backend conformance ===

/// Exercise the main flows with names unique to this run, so the scenario
/// can share a live database with earlier runs.
async fn exercise(db: &dyn Database) {
    let run = uuid::Uuid::new_v4().simple().to_string();
    let email = format!("{run}@example.com");
    let account = add_account(db, &email).await;

    let writer = format!("{run}-w");
    let reader = format!("{run}-r");
    add_key(db, account.id, &writer, "r1").await;
    db.add_key(key(account.id, &reader, "r2", Scope::Read))
        .await
        .unwrap();
    assert!(matches!(
        db.add_key(key(account.id, &format!("{run}-x"), "r1", Scope::Read))
            .await,
        Err(DatabaseError::Conflict(_))
    ));

    let batch = vec![read("1", 1000, 0), read("2", 1100, 0), read("1", 1000, 0)];
    db.add_reads(&writer, batch.clone()).await.unwrap();
    db.add_reads(&writer, batch).await.unwrap();
    let stored = db.get_reads(account.id, "r1", 1000, 500).await.unwrap();
    assert_eq!(stored.len(), 2);

    assert!(matches!(
        db.delete_reads(account.id, "r1", 10, 5).await,
        Err(DatabaseError::InvalidRange { .. })
    ));
    assert_eq!(db.delete_reads_before(account.id, "r1", 1000).await.unwrap(), 1);

    let now = unix_timestamp();
    assert_eq!(
        db.save_notification(NotificationType::UpsConnected, now, &writer)
            .await
            .unwrap(),
        SaveOutcome::Inserted
    );
    assert_eq!(
        db.save_notification(NotificationType::UpsConnected, now, &writer)
            .await
            .unwrap(),
        SaveOutcome::Duplicate
    );
    assert!(db.get_notification(account.id, "r1").await.unwrap().is_some());

    let mut locked = account.clone();
    for _ in 0..MAX_LOGIN_ATTEMPTS {
        locked = db.record_invalid_password(&account).await.unwrap();
    }
    assert!(locked.locked);
    assert!(matches!(
        db.record_valid_password(&locked).await,
        Err(DatabaseError::AccountLocked(_))
    ));
    db.unlock_account(&locked).await.unwrap();

    db.delete_account(account.id).await.unwrap();
    assert!(db.get_key(&writer).await.is_err());
    assert_eq!(db.delete_key_reads(&writer).await.unwrap(), 1);
}

async fn live_backends() -> Vec<Arc<dyn Database>> {
    let mut backends: Vec<Arc<dyn Database>> = Vec::new();
    if let Ok(url) = std::env::var("READVAULT_TEST_POSTGRES_URL") {
        let cfg = DatabaseConfig {
            url: Some(url),
            ..DatabaseConfig::default()
        };
        backends.push(Arc::new(PostgresDatabase::connect(&cfg).await.unwrap()));
    }
    if let Ok(url) = std::env::var("READVAULT_TEST_MYSQL_URL") {
        let cfg = DatabaseConfig {
            url: Some(url),
            ..DatabaseConfig::default()
        };
        backends.push(Arc::new(MySqlDatabase::connect(&cfg).await.unwrap()));
    }
    backends
}

#[tokio::test]
async fn conformance_on_every_backend() {
    let mut backends = live_backends().await;
    backends.push(Arc::new(test_db().await));

    for db in backends {
        db.ensure_schema().await.unwrap();
        assert_eq!(db.schema_version().await, CURRENT_VERSION, "{}", db.driver());
        exercise(db.as_ref()).await;
        db.close().await;
    }
}
