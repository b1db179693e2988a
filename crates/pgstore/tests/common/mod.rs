//! Shared contract suite for every [`TokenStore`] implementation.
//!
//! Each function exercises one behaviour of the contract against a fresh,
//! empty store. `contract_tests!` expands the whole suite into `#[tokio::test]`
//! functions for one implementation, given async `setup` and `teardown`
//! functions.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use std::time::Duration;

use passwordless_pgstore::{StoreError, TokenStore, ValidationError};

pub const MINUTE: Duration = Duration::from_secs(60);

/// A random email-like uid.
pub fn uid() -> String {
    format!("{}@example.com", uuid::Uuid::new_v4().simple())
}

/// A random token, shaped like the ones passwordless flows mail out.
pub fn token() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn origin() -> String {
    format!("http://{}.example.org/page.html", uuid::Uuid::new_v4().simple())
}

pub async fn authenticates_with_correct_token<S: TokenStore>(store: &S) {
    let (user, tok, from) = (uid(), token(), origin());
    store.store_or_update(&tok, &user, MINUTE, Some(&from)).await.unwrap();

    let auth = store.authenticate(&tok, &user).await.unwrap().unwrap();
    assert_eq!(auth.origin.as_deref(), Some(from.as_str()));
}

pub async fn authentication_can_repeat_until_invalidated<S: TokenStore>(store: &S) {
    let (user, tok) = (uid(), token());
    store.store_or_update(&tok, &user, MINUTE, None).await.unwrap();

    assert!(store.authenticate(&tok, &user).await.unwrap().is_some());
    assert!(store.authenticate(&tok, &user).await.unwrap().is_some());
    store.invalidate_user(&user).await.unwrap();
    assert!(store.authenticate(&tok, &user).await.unwrap().is_none());
}

pub async fn missing_origin_round_trips<S: TokenStore>(store: &S) {
    let (user, tok) = (uid(), token());
    store.store_or_update(&tok, &user, MINUTE, None).await.unwrap();

    let auth = store.authenticate(&tok, &user).await.unwrap().unwrap();
    assert_eq!(auth.origin, None);
}

pub async fn failures_are_indistinguishable<S: TokenStore>(store: &S) {
    let (user, tok) = (uid(), token());
    store.store_or_update(&tok, &user, Duration::from_millis(200), Some("/x")).await.unwrap();

    let wrong_token = store.authenticate(&token(), &user).await.unwrap();
    let unknown_user = store.authenticate(&tok, &uid()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    let expired = store.authenticate(&tok, &user).await.unwrap();

    assert_eq!(wrong_token, None);
    assert_eq!(unknown_user, None);
    assert_eq!(expired, None);
}

pub async fn token_is_bound_to_its_user<S: TokenStore>(store: &S) {
    let (alice, bob) = (uid(), uid());
    let (alice_token, bob_token) = (token(), token());
    store.store_or_update(&alice_token, &alice, MINUTE, Some("/a")).await.unwrap();
    store.store_or_update(&bob_token, &bob, MINUTE, Some("/b")).await.unwrap();

    assert!(store.authenticate(&alice_token, &bob).await.unwrap().is_none());
    assert!(store.authenticate(&bob_token, &alice).await.unwrap().is_none());
    let auth = store.authenticate(&bob_token, &bob).await.unwrap().unwrap();
    assert_eq!(auth.origin.as_deref(), Some("/b"));
}

pub async fn update_replaces_previous_token<S: TokenStore>(store: &S) {
    let (user, first, second) = (uid(), token(), token());
    store.store_or_update(&first, &user, MINUTE, Some("/first")).await.unwrap();
    store.store_or_update(&second, &user, MINUTE, Some("/second")).await.unwrap();

    assert!(store.authenticate(&first, &user).await.unwrap().is_none());
    let auth = store.authenticate(&second, &user).await.unwrap().unwrap();
    assert_eq!(auth.origin.as_deref(), Some("/second"));
    assert_eq!(store.length().await.unwrap(), 1);
}

pub async fn update_refreshes_expiry<S: TokenStore>(store: &S) {
    let (user, tok) = (uid(), token());
    store.store_or_update(&tok, &user, Duration::from_millis(100), None).await.unwrap();
    store.store_or_update(&tok, &user, MINUTE, None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(store.authenticate(&tok, &user).await.unwrap().is_some());
}

pub async fn concurrent_updates_leave_one_record<S: TokenStore + Clone>(store: &S) {
    let user = uid();
    let tokens: Vec<String> = (0..8).map(|_| token()).collect();

    let handles: Vec<_> = tokens
        .iter()
        .cloned()
        .map(|tok| {
            let store = store.clone();
            let user = user.clone();
            tokio::spawn(async move { store.store_or_update(&tok, &user, MINUTE, None).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.length().await.unwrap(), 1);
    let mut valid = 0;
    for tok in &tokens {
        if store.authenticate(tok, &user).await.unwrap().is_some() {
            valid += 1;
        }
    }
    assert_eq!(valid, 1, "exactly one of the racing tokens should survive");
}

pub async fn invalidate_only_affects_that_user<S: TokenStore>(store: &S) {
    let (alice, bob, tok) = (uid(), uid(), token());
    store.store_or_update(&tok, &alice, MINUTE, None).await.unwrap();
    store.store_or_update(&tok, &bob, MINUTE, None).await.unwrap();

    store.invalidate_user(&alice).await.unwrap();
    assert!(store.authenticate(&tok, &alice).await.unwrap().is_none());
    assert!(store.authenticate(&tok, &bob).await.unwrap().is_some());
    assert_eq!(store.length().await.unwrap(), 1);
}

pub async fn invalidate_unknown_user_succeeds<S: TokenStore>(store: &S) {
    store.invalidate_user(&uid()).await.unwrap();
    store.invalidate_user(&uid()).await.unwrap();
    assert_eq!(store.length().await.unwrap(), 0);
}

pub async fn clear_removes_everything<S: TokenStore>(store: &S) {
    let tok = token();
    let users: Vec<String> = (0..3).map(|_| uid()).collect();
    for user in &users {
        store.store_or_update(&tok, user, MINUTE, None).await.unwrap();
    }
    assert_eq!(store.length().await.unwrap(), 3);

    store.clear().await.unwrap();
    assert_eq!(store.length().await.unwrap(), 0);
    for user in &users {
        assert!(store.authenticate(&tok, user).await.unwrap().is_none());
    }
}

pub async fn clear_on_empty_store_succeeds<S: TokenStore>(store: &S) {
    store.clear().await.unwrap();
    store.clear().await.unwrap();
    assert_eq!(store.length().await.unwrap(), 0);
}

pub async fn length_counts_expired_records<S: TokenStore>(store: &S) {
    assert_eq!(store.length().await.unwrap(), 0);
    store.store_or_update(&token(), &uid(), Duration::from_millis(1), None).await.unwrap();
    store.store_or_update(&token(), &uid(), MINUTE, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(store.length().await.unwrap(), 2);
}

pub async fn rejects_invalid_arguments<S: TokenStore>(store: &S) {
    let user = uid();
    let cases = [
        store.store_or_update("", &user, MINUTE, None).await,
        store.store_or_update(&token(), "", MINUTE, None).await,
        store.store_or_update(&token(), &user, Duration::ZERO, None).await,
        store.store_or_update("t\0k", &user, MINUTE, None).await,
        store.store_or_update(&token(), "a\0b", MINUTE, None).await,
        store.store_or_update(&token(), &user, MINUTE, Some("/\0")).await,
        store.authenticate("t\0k", &user).await.map(|_| ()),
        store.authenticate(&token(), "a\0b").await.map(|_| ()),
        store.invalidate_user("a\0b").await,
    ];
    let expected = [
        ValidationError::EmptyToken,
        ValidationError::EmptyUid,
        ValidationError::NonPositiveTtl,
        ValidationError::NulByte { field: "token" },
        ValidationError::NulByte { field: "uid" },
        ValidationError::NulByte { field: "origin" },
        ValidationError::NulByte { field: "token" },
        ValidationError::NulByte { field: "uid" },
        ValidationError::NulByte { field: "uid" },
    ];
    for (result, want) in cases.into_iter().zip(expected) {
        match result {
            Err(StoreError::Validation(got)) => assert_eq!(got, want),
            other => panic!("expected {want:?}, got {other:?}"),
        }
    }

    assert!(matches!(
        store.authenticate("", &user).await,
        Err(StoreError::Validation(ValidationError::EmptyToken))
    ));
    assert!(matches!(
        store.authenticate(&token(), "").await,
        Err(StoreError::Validation(ValidationError::EmptyUid))
    ));
    assert_eq!(store.length().await.unwrap(), 0);
}

/// Expand the contract suite for one implementation.
///
/// `$setup` is an async fn returning `Option<Store>` (`None` skips the test);
/// `$teardown` is an async fn taking the store by value.
macro_rules! contract_tests {
    ($setup:path, $teardown:path) => {
        contract_tests!(@cases $setup, $teardown;
            authenticates_with_correct_token,
            authentication_can_repeat_until_invalidated,
            missing_origin_round_trips,
            failures_are_indistinguishable,
            token_is_bound_to_its_user,
            update_replaces_previous_token,
            update_refreshes_expiry,
            concurrent_updates_leave_one_record,
            invalidate_only_affects_that_user,
            invalidate_unknown_user_succeeds,
            clear_removes_everything,
            clear_on_empty_store_succeeds,
            length_counts_expired_records,
            rejects_invalid_arguments,
        );
    };
    (@cases $setup:path, $teardown:path; $($case:ident),+ $(,)?) => {
        $(
            #[tokio::test]
            async fn $case() {
                let Some(store) = $setup().await else {
                    return;
                };
                common::$case(&store).await;
                $teardown(store).await;
            }
        )+
    };
}

pub(crate) use contract_tests;
