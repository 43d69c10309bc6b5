//! End-to-end banking scenarios over the in-memory store.

#![allow(clippy::unwrap_used)] // Test code can use unwrap

use banking::{
    AccountCreated, AccountId, Bank, Money, MoneyDeposited, MoneyWithdrawn, account_stream,
    payload_registry,
};
use eventide_core::prelude::*;
use eventide_runtime::config::RuntimeConfig;
use eventide_runtime::wake_up::WakeUpConfig;
use eventide_testing::InMemoryEventStore;
use std::sync::Arc;
use std::time::Duration;

fn config() -> RuntimeConfig {
    RuntimeConfig::default().with_wake_up(WakeUpConfig::new(
        Duration::from_millis(1),
        Duration::from_millis(20),
    ))
}

fn store() -> Arc<InMemoryEventStore> {
    Arc::new(InMemoryEventStore::with_serializer(Arc::new(
        payload_registry().unwrap(),
    )))
}

fn outcomes(store: &InMemoryEventStore) -> Vec<CommandProcessed> {
    store
        .events()
        .iter()
        .filter_map(|event| event.payload_as::<CommandProcessed>().cloned())
        .collect()
}

async fn within<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .unwrap()
}

#[tokio::test]
async fn transfer_moves_money_between_accounts() {
    let store = store();
    let bank = Bank::start(store.clone(), &config());
    let a = AccountId::new("A");
    let b = AccountId::new("B");

    within(bank.create_account(a.clone(), "Alex", Money::ZERO)).await.unwrap();
    within(bank.create_account(b.clone(), "Mace", Money::new(1000))).await.unwrap();
    let transferred = within(bank.transfer(a.clone(), b.clone(), Money::new(123)))
        .await
        .unwrap();
    assert!(transferred.result.is_ok());

    assert_eq!(bank.balance(&a).await.unwrap(), Some(Money::new(-123)));
    assert_eq!(bank.balance(&b).await.unwrap(), Some(Money::new(1123)));

    let outcomes = outcomes(&store);
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|processed| processed.result.is_ok()));

    let a_stream = store.events_of(&account_stream(&a));
    assert!(a_stream[0].payload_as::<AccountCreated>().is_some());
    assert!(a_stream[1].payload_as::<MoneyWithdrawn>().is_some());
    let b_stream = store.events_of(&account_stream(&b));
    assert!(b_stream[1].payload_as::<MoneyDeposited>().is_some());
}

#[tokio::test]
async fn transfer_from_a_missing_account_writes_only_the_outcome() {
    let store = store();
    let bank = Bank::start(store.clone(), &config());
    within(bank.create_account(AccountId::new("B"), "Mace", Money::new(1000)))
        .await
        .unwrap();
    let before = store.len();

    let processed = within(bank.transfer(AccountId::new("nobody"), AccountId::new("B"), Money::new(5)))
        .await
        .unwrap();

    assert!(matches!(processed.result, Err(Failure::NotFound(ref m)) if m.contains("nobody")));
    let events = store.events();
    let written = &events[before..];
    assert_eq!(written.len(), 1);
    assert!(written[0].payload_as::<CommandProcessed>().is_some());
    assert_eq!(bank.balance(&AccountId::new("B")).await.unwrap(), Some(Money::new(1000)));
}

#[tokio::test]
async fn both_missing_accounts_are_reported() {
    let bank = Bank::start(store(), &config());

    let processed = within(bank.transfer(AccountId::new("X"), AccountId::new("Y"), Money::new(1)))
        .await
        .unwrap();

    match processed.result {
        Err(Failure::Multiple(failures)) => {
            assert_eq!(failures.len(), 2);
            assert!(failures.iter().all(|f| matches!(f, Failure::NotFound(_))));
        }
        other => unreachable!("expected two NotFound failures, got {other:?}"),
    }
}

#[tokio::test]
async fn opening_an_account_twice_conflicts() {
    let bank = Bank::start(store(), &config());
    let a = AccountId::new("A");

    within(bank.create_account(a.clone(), "Alex", Money::new(7))).await.unwrap();
    let again = within(bank.create_account(a.clone(), "Alex", Money::ZERO)).await.unwrap();

    assert!(matches!(again.result, Err(Failure::Conflict(_))));
    assert_eq!(bank.balance(&a).await.unwrap(), Some(Money::new(7)));
}

#[tokio::test]
async fn invalid_transfers_are_rejected_before_reading() {
    let bank = Bank::start(store(), &config());
    let a = AccountId::new("A");

    let same = within(bank.transfer(a.clone(), a.clone(), Money::new(1))).await.unwrap();
    let negative = within(bank.transfer(a, AccountId::new("B"), Money::new(-1))).await.unwrap();

    assert!(matches!(same.result, Err(Failure::InvalidInput(_))));
    assert!(matches!(negative.result, Err(Failure::InvalidInput(_))));
}

#[tokio::test]
async fn accounts_lists_every_opened_account() {
    let bank = Bank::start(store(), &config());
    within(bank.create_account(AccountId::new("B"), "Mace", Money::new(1))).await.unwrap();
    within(bank.create_account(AccountId::new("A"), "Alex", Money::new(2))).await.unwrap();

    let accounts = bank.accounts().await.unwrap();

    let owners: Vec<_> = accounts.values().map(|account| account.owner.as_str()).collect();
    assert_eq!(owners, ["Alex", "Mace"]);
}
