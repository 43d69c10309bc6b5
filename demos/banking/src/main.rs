//! CLI demo for the banking example.
//!
//! Runs accounts and transfers against the in-memory store, with payloads
//! encoded through the payload registry as a real driver would.

use banking::{AccountId, Bank, Money, payload_registry};
use eventide_runtime::config::RuntimeConfig;
use eventide_testing::InMemoryEventStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Banking Example: Money Transfers ===\n");

    let store = Arc::new(InMemoryEventStore::with_serializer(Arc::new(payload_registry()?)));
    let bank = Bank::start(Arc::clone(&store), &RuntimeConfig::default());

    let alex = AccountId::new("A");
    let mace = AccountId::new("B");

    println!("Opening accounts...");
    report(&bank.create_account(alex.clone(), "Alex", Money::ZERO).await?);
    report(&bank.create_account(mace.clone(), "Mace", Money::new(1000)).await?);

    println!("\nTransferring 123 from Alex to Mace...");
    report(&bank.transfer(alex.clone(), mace.clone(), Money::new(123)).await?);

    println!("\nTransferring from an account that does not exist...");
    report(&bank.transfer(AccountId::new("Z"), mace, Money::new(5)).await?);

    println!("\nOpening Alex's account twice...");
    report(&bank.create_account(alex, "Alex", Money::ZERO).await?);

    println!("\nBalances:");
    for account in bank.accounts().await?.values() {
        println!("  {} ({}): {}", account.owner, account.id, account.balance);
    }

    println!("\n{} events in the log", store.len());
    println!("\n=== Demo Complete ===");
    Ok(())
}

fn report(processed: &eventide_core::command::CommandProcessed) {
    match &processed.result {
        Ok(message) => println!("  ok: {message}"),
        Err(failure) => println!("  failed: {failure:?}"),
    }
}
