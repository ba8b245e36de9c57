//! Integration tests: registration, login, password checks and backup codes

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use dtxt_auth::{
    Accounts, ChangePassword, ChangeUsername, KeyService, RegistrationGate, SessionSigner,
};
use dtxt_core::DtxtError;
use dtxt_crypto::legacy::{fernet_encrypt, hash_legacy_password, legacy_key};
use dtxt_crypto::{decrypt_text, random_bytes, KdfParams, Key32};
use dtxt_migrate::{MigrationTracker, Migrator};
use dtxt_store::{JournalStore, RegistryStore};
use secrecy::SecretString;
use tempfile::TempDir;

fn fast_kdf() -> KdfParams {
    KdfParams {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}

fn pw(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

struct Fixture {
    tmp: TempDir,
    registry: Arc<RegistryStore>,
    journal: Arc<JournalStore>,
    accounts: Accounts,
}

fn fixture(allow_registration: bool) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(RegistryStore::new(tmp.path(), 0));
    let journal = Arc::new(JournalStore::new(tmp.path(), 0));
    let migrator = Arc::new(Migrator::new(
        tmp.path(),
        registry.clone(),
        journal.clone(),
        fast_kdf(),
        MigrationTracker::new(),
    ));
    let accounts = Accounts::new(
        registry.clone(),
        migrator,
        fast_kdf(),
        RegistrationGate::new(allow_registration),
    );
    Fixture {
        tmp,
        registry,
        journal,
        accounts,
    }
}

#[tokio::test]
async fn register_login_and_reach_dek() {
    let f = fixture(true);
    let id = f.accounts.register("alice", &pw("hunter2!")).await.unwrap();
    assert_eq!(id, 1);

    let outcome = f.accounts.login("alice", &pw("hunter2!")).await.unwrap();
    assert_eq!(outcome.user_id, id);
    assert_eq!(outcome.username, "alice");
    assert_eq!(outcome.unlocked.available_backup_codes(), -1);

    let signer = SessionSigner::new(b"process-secret", 30);
    let (token, _) = signer
        .issue(outcome.user_id, &outcome.username, &outcome.unlocked.derived)
        .unwrap();
    let claims = signer.validate(&token).unwrap();
    assert_eq!(claims.user_id, id);
    assert_eq!(claims.name, "alice");

    let keys = KeyService::new(f.registry.clone());
    let derived = claims.derived_key().unwrap();
    let first = keys.get_dek(id, &derived).await.unwrap();
    let second = keys.get_dek(id, &derived).await.unwrap();
    assert_eq!(first.as_bytes(), second.as_bytes());
}

#[tokio::test]
async fn wrong_password_and_unknown_user_fail_alike() {
    let f = fixture(true);
    f.accounts.register("alice", &pw("hunter2!")).await.unwrap();

    let wrong = f.accounts.login("alice", &pw("hunter3!")).await.err().unwrap();
    let missing = f.accounts.login("nobody", &pw("hunter2!")).await.err().unwrap();
    assert!(wrong.is_auth_failure());
    assert!(missing.is_auth_failure());

    // lookup is exact
    assert!(f
        .accounts
        .login("Alice", &pw("hunter2!"))
        .await
        .err()
        .unwrap()
        .is_auth_failure());
}

#[tokio::test]
async fn registration_gate_and_name_clash() {
    let f = fixture(false);
    assert!(matches!(
        f.accounts.register("alice", &pw("pw")).await,
        Err(DtxtError::RegistrationDisabled)
    ));
    assert!(f.registry.get_users().await.unwrap().users.is_empty());

    let status = f.accounts.gate().status();
    assert!(!status.registration_allowed);
    assert!(!status.temporary_allowed);

    f.accounts.gate().open_for(Some(60));
    assert!(f.accounts.gate().status().temporary_allowed);
    f.accounts.register("alice", &pw("pw")).await.unwrap();

    assert!(matches!(
        f.accounts.register("ALICE", &pw("pw")).await,
        Err(DtxtError::UsernameTaken)
    ));
}

#[test]
fn open_for_clamps_out_of_range() {
    let gate = RegistrationGate::new(false);
    for seconds in [None, Some(0), Some(901), Some(86_400)] {
        let until = gate.open_for(seconds);
        let left = (until - chrono::Utc::now()).num_seconds();
        assert!((295..=300).contains(&left), "{seconds:?} gave {left}s");
    }
    let until = gate.open_for(Some(900));
    assert!((until - chrono::Utc::now()).num_seconds() > 800);
}

#[tokio::test]
async fn backup_code_is_single_use() {
    let f = fixture(true);
    let id = f.accounts.register("alice", &pw("hunter2!")).await.unwrap();

    assert!(f
        .accounts
        .create_backup_codes(id, &pw("wrong"))
        .await
        .unwrap()
        .is_none());
    let codes = f
        .accounts
        .create_backup_codes(id, &pw("hunter2!"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(codes.len(), 6);

    let by_password = f.accounts.login("alice", &pw("hunter2!")).await.unwrap();
    let by_code = f.accounts.login("alice", &pw(&codes[2])).await.unwrap();
    assert_eq!(by_code.unlocked.available_backup_codes(), 5);
    assert_eq!(
        by_code.unlocked.derived.as_bytes(),
        by_password.unlocked.derived.as_bytes()
    );

    assert!(f.accounts.login("alice", &pw(&codes[2])).await.is_err());
}

#[tokio::test]
async fn change_password_keeps_dek() {
    let f = fixture(true);
    let id = f.accounts.register("alice", &pw("old-pw")).await.unwrap();
    f.accounts
        .create_backup_codes(id, &pw("old-pw"))
        .await
        .unwrap();

    let keys = KeyService::new(f.registry.clone());
    let before = f.accounts.login("alice", &pw("old-pw")).await.unwrap();
    let dek_before = keys.get_dek(id, &before.unlocked.derived).await.unwrap();

    assert!(matches!(
        f.accounts
            .change_password(id, &pw("nope"), &pw("new-pw"))
            .await
            .unwrap(),
        ChangePassword::PasswordIncorrect
    ));

    let ChangePassword::Changed { derived } = f
        .accounts
        .change_password(id, &pw("old-pw"), &pw("new-pw"))
        .await
        .unwrap()
    else {
        panic!("password change refused");
    };
    let dek_after = keys.get_dek(id, &derived).await.unwrap();
    assert_eq!(dek_before.as_bytes(), dek_after.as_bytes());

    assert!(f.accounts.login("alice", &pw("old-pw")).await.is_err());
    assert!(f.accounts.login("alice", &pw("new-pw")).await.is_ok());
    assert!(f.registry.require(id).await.unwrap().backup_codes.is_empty());
}

#[tokio::test]
async fn change_username_and_delete() {
    let f = fixture(true);
    let alice = f.accounts.register("alice", &pw("a-pw")).await.unwrap();
    f.accounts.register("bob", &pw("b-pw")).await.unwrap();

    assert_eq!(
        f.accounts.change_username(alice, "BOB", &pw("a-pw")).await.unwrap(),
        ChangeUsername::UsernameTaken
    );
    assert_eq!(
        f.accounts.change_username(alice, "alicia", &pw("b-pw")).await.unwrap(),
        ChangeUsername::PasswordIncorrect
    );
    assert!(matches!(
        f.accounts.change_username(alice, "   ", &pw("a-pw")).await,
        Err(DtxtError::InvalidInput(_))
    ));
    assert_eq!(
        f.accounts.change_username(alice, " alicia ", &pw("a-pw")).await.unwrap(),
        ChangeUsername::Changed
    );
    assert!(f.accounts.login("alicia", &pw("a-pw")).await.is_ok());

    std::fs::create_dir_all(f.tmp.path().join(alice.to_string())).unwrap();
    assert!(!f.accounts.delete_account(alice, &pw("b-pw")).await.unwrap());
    assert!(f.accounts.delete_account(alice, &pw("a-pw")).await.unwrap());
    assert!(!f.tmp.path().join(alice.to_string()).exists());
    assert!(f.accounts.login("alicia", &pw("a-pw")).await.is_err());
}

#[tokio::test]
async fn login_migrates_legacy_user() {
    let f = fixture(false);

    let salt = URL_SAFE.encode(random_bytes(16));
    let kek = legacy_key("carol-pw", &salt).unwrap();
    let legacy_dek = Key32::generate();
    let users = serde_json::json!({
        "id_counter": 4,
        "users": [{
            "user_id": 4,
            "username": "carol",
            "password": hash_legacy_password("carol-pw", "pepper").unwrap(),
            "salt": salt,
            "enc_enc_key": fernet_encrypt(legacy_dek.to_urlsafe_b64().as_bytes(), &kek).unwrap(),
        }]
    });
    let month = serde_json::json!({
        "days": [{"day": 14, "text": fernet_encrypt(b"abc", &legacy_dek).unwrap()}]
    });
    let old = f.tmp.path().join("old");
    std::fs::create_dir_all(old.join("4/2022")).unwrap();
    std::fs::write(old.join("users.json"), users.to_string()).unwrap();
    std::fs::write(old.join("4/2022/06.json"), month.to_string()).unwrap();

    assert!(f.accounts.login("carol", &pw("wrong")).await.is_err());
    assert!(f.registry.find_by_username("carol").await.unwrap().is_none());

    let outcome = f.accounts.login("carol", &pw("carol-pw")).await.unwrap();
    assert_eq!(outcome.user_id, 4);

    let record = f.registry.require(4).await.unwrap();
    assert_eq!(record.dailytxt_version, Some(2));

    let keys = KeyService::new(f.registry.clone());
    let dek = keys.get_dek(4, &outcome.unlocked.derived).await.unwrap();
    let month = f.journal.get_month(4, 2022, 6).await.unwrap();
    let text = month.day(14).unwrap().text.as_deref().unwrap();
    assert_eq!(decrypt_text(text, &dek).unwrap(), "abc");

    // second login takes the native path
    assert!(f.accounts.login("carol", &pw("carol-pw")).await.is_ok());
}

#[tokio::test]
async fn v1_record_in_v2_registry_is_refused() {
    let f = fixture(true);
    let id = f.accounts.register("dave", &pw("d-pw")).await.unwrap();
    f.registry
        .update(|reg| {
            let user = reg.find_by_id_mut(id).unwrap();
            user.dailytxt_version = None;
            Ok(())
        })
        .await
        .unwrap();

    let err = f.accounts.login("dave", &pw("d-pw")).await.err().unwrap();
    assert!(matches!(err, DtxtError::Unauthorized(_)));
}
