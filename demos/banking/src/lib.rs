//! Banking example: accounts and money transfers on the Eventide runtime.
//!
//! It demonstrates:
//!
//! - Commands validated against a [`ProjectionCache`] read model
//! - Business failures persisted as `CommandProcessed` outcomes
//! - One command appending to several streams atomically
//! - Awaiting a command's outcome with read-your-writes freshness
//!
//! # Architecture
//!
//! ```text
//! submit ──► CommandStream ──► CommandProcessor ──► EventWriter
//!                                   │                   │
//!                                   └─ wake-up ─► EventStream (polling)
//!                                                       │
//!           submit_and_await ◄── CommandProcessed ◄── Accounts cache
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use banking::{AccountId, Bank, Money};
//! use eventide_runtime::config::RuntimeConfig;
//! use eventide_testing::InMemoryEventStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let bank = Bank::start(Arc::new(InMemoryEventStore::new()), &RuntimeConfig::default());
//!
//! bank.create_account(AccountId::new("A"), "Alex", Money::ZERO).await?;
//! bank.create_account(AccountId::new("B"), "Mace", Money::new(1000)).await?;
//! bank.transfer(AccountId::new("A"), AccountId::new("B"), Money::new(123)).await?;
//!
//! assert_eq!(bank.balance(&AccountId::new("B")).await?, Some(Money::new(1123)));
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod transfer;
pub mod types;

use eventide_core::prelude::*;
use eventide_runtime::command_stream::CommandStream;
use eventide_runtime::config::RuntimeConfig;
use eventide_runtime::error::RuntimeError;
use eventide_runtime::event_stream::{EventStream, PollingSource};
use eventide_runtime::processor::{CommandProcessor, HandlerRegistry};
use eventide_runtime::projection_cache::ProjectionCache;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use account::{
    AccountCreated, AccountProjector, Accounts, CreateAccount, CreateAccountHandler,
    MoneyDeposited, MoneyWithdrawn, account_stream,
};
pub use transfer::{TransferMoney, TransferMoneyHandler};
pub use types::{Account, AccountId, Money, TransferId};

/// Registry of every banking payload, for drivers that store bytes.
///
/// # Errors
///
/// [`EventError`] if two payloads claim the same event type.
pub fn payload_registry() -> Result<PayloadRegistry, EventError> {
    let mut registry = PayloadRegistry::new();
    registry
        .register::<AccountCreated>()?
        .register::<MoneyWithdrawn>()?
        .register::<MoneyDeposited>()?;
    Ok(registry)
}

/// The banking pipeline wired over one event store.
///
/// Dropping the bank stops the processor and the event stream.
pub struct Bank {
    accounts: Arc<Accounts>,
    commands: Arc<CommandStream>,
    events: Arc<EventStream>,
    shutdown: CancelSource,
}

impl Bank {
    /// Wire the pipeline over `store` and start it.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start<S>(store: Arc<S>, config: &RuntimeConfig) -> Self
    where
        S: EventReader + EventWriter + 'static,
    {
        let events = Arc::new(EventStream::new(Arc::new(PollingSource::from_config(
            store.clone(),
            config,
        ))));
        let accounts = Arc::new(ProjectionCache::new(AccountProjector, store.clone()));
        accounts.attach(&events);
        events.start();

        let mut handlers = HandlerRegistry::new();
        handlers
            .register::<CreateAccount, _>(CreateAccountHandler::new(Arc::clone(&accounts)))
            .register::<TransferMoney, _>(TransferMoneyHandler::new(Arc::clone(&accounts)));
        let processor = Arc::new(
            CommandProcessor::new(handlers, store.clone(), config)
                .with_outcome_reader(store)
                .with_notifier(events.notifier()),
        );

        let commands = Arc::new(CommandStream::new());
        let shutdown = CancelSource::new();
        tokio::spawn(processor.run(commands.subscribe(), shutdown.token()));

        tracing::info!("Bank started");
        Self {
            accounts,
            commands,
            events,
            shutdown,
        }
    }

    /// Submit `command` and wait until the account read model reflects it.
    ///
    /// # Errors
    ///
    /// [`RuntimeError`] if the outcome feed closes first.
    pub async fn execute(&self, command: Arc<dyn Command>) -> Result<CommandProcessed, RuntimeError> {
        self.commands
            .submit_and_await(command, self.accounts.as_ref())
            .await
    }

    /// Open an account.
    ///
    /// # Errors
    ///
    /// See [`Bank::execute`].
    pub async fn create_account(
        &self,
        id: AccountId,
        owner: impl Into<String>,
        initial_balance: Money,
    ) -> Result<CommandProcessed, RuntimeError> {
        self.execute(Arc::new(CreateAccount::new(id, owner, initial_balance)))
            .await
    }

    /// Move `amount` from `from` to `to`.
    ///
    /// # Errors
    ///
    /// See [`Bank::execute`].
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Money,
    ) -> Result<CommandProcessed, RuntimeError> {
        self.execute(Arc::new(TransferMoney::new(from, to, amount)))
            .await
    }

    /// The balance of `id`, or `None` if it was never opened.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Read`] if the account stream cannot be read.
    pub async fn balance(&self, id: &AccountId) -> Result<Option<Money>, RuntimeError> {
        Ok(self
            .accounts
            .get(&account_stream(id))
            .await?
            .map(|account| account.balance))
    }

    /// Every account, ordered by id.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Read`] if the log cannot be read.
    pub async fn accounts(&self) -> Result<BTreeMap<String, Account>, RuntimeError> {
        Ok(self
            .accounts
            .get_all()
            .await?
            .into_values()
            .map(|account| (account.id.to_string(), account))
            .collect())
    }

    /// The account read model.
    #[must_use]
    pub fn read_model(&self) -> &Arc<Accounts> {
        &self.accounts
    }
}

impl Drop for Bank {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.events.stop();
    }
}
