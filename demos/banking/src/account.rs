//! Accounts: opening them and projecting their balances.
//!
//! Every account has its own `Account/<id>` stream. Transfers append a
//! withdrawal to one stream and a deposit to the other, so a balance is a
//! fold over a single stream.

use crate::types::{Account, AccountId, Money, TransferId};
use eventide_core::prelude::*;
use eventide_runtime::projection_cache::{ProjectionCache, Projector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stream type of every account stream.
pub const ACCOUNT_STREAM_TYPE: &str = "Account";

/// The stream of account `id`.
#[must_use]
pub fn account_stream(id: &AccountId) -> StreamId {
    StreamId::new(ACCOUNT_STREAM_TYPE, id.as_str())
}

// ========== Events ==========

/// Event: an account was opened
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCreated {
    /// Account identifier
    pub account_id: AccountId,
    /// Account holder name
    pub owner: String,
    /// Opening balance
    pub initial_balance: Money,
}

impl PayloadType for AccountCreated {
    const EVENT_TYPE: &'static str = "AccountCreated.v1";
}

impl EventPayload for AccountCreated {
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn stream_id(&self) -> StreamId {
        account_stream(&self.account_id)
    }
}

/// Event: money left an account as part of a transfer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyWithdrawn {
    /// Account debited
    pub account_id: AccountId,
    /// Transfer this withdrawal belongs to
    pub transfer_id: TransferId,
    /// Amount withdrawn
    pub amount: Money,
}

impl PayloadType for MoneyWithdrawn {
    const EVENT_TYPE: &'static str = "MoneyWithdrawn.v1";
}

impl EventPayload for MoneyWithdrawn {
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn stream_id(&self) -> StreamId {
        account_stream(&self.account_id)
    }
}

/// Event: money arrived in an account as part of a transfer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyDeposited {
    /// Account credited
    pub account_id: AccountId,
    /// Transfer this deposit belongs to
    pub transfer_id: TransferId,
    /// Amount deposited
    pub amount: Money,
}

impl PayloadType for MoneyDeposited {
    const EVENT_TYPE: &'static str = "MoneyDeposited.v1";
}

impl EventPayload for MoneyDeposited {
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn stream_id(&self) -> StreamId {
        account_stream(&self.account_id)
    }
}

// ========== Projection ==========

/// Folds an account stream into an [`Account`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AccountProjector;

impl Projector for AccountProjector {
    type State = Account;

    fn matches(&self, stream_id: &StreamId) -> bool {
        stream_id.is_of_type(ACCOUNT_STREAM_TYPE)
    }

    async fn apply(&self, state: Option<Account>, event: &Event) -> Option<Account> {
        if let Some(created) = event.payload_as::<AccountCreated>() {
            return Some(Account {
                id: created.account_id.clone(),
                owner: created.owner.clone(),
                balance: created.initial_balance,
            });
        }
        if let Some(withdrawn) = event.payload_as::<MoneyWithdrawn>() {
            return adjust(state, event, |balance| balance - withdrawn.amount);
        }
        if let Some(deposited) = event.payload_as::<MoneyDeposited>() {
            return adjust(state, event, |balance| balance + deposited.amount);
        }
        state
    }
}

fn adjust(state: Option<Account>, event: &Event, change: impl FnOnce(Money) -> Money) -> Option<Account> {
    let Some(account) = state else {
        tracing::warn!(
            position = %event.position(),
            stream_id = %event.stream_id(),
            event_type = event.event_type(),
            "Balance change for an account that was never opened; dropped"
        );
        return None;
    };
    Some(Account {
        balance: change(account.balance),
        ..account
    })
}

/// The read model handlers validate against.
pub type Accounts = ProjectionCache<AccountProjector>;

// ========== Commands ==========

/// Command: open a new account
#[derive(Debug)]
pub struct CreateAccount {
    id: CommandId,
    /// Account identifier
    pub account_id: AccountId,
    /// Account holder name
    pub owner: String,
    /// Opening balance
    pub initial_balance: Money,
}

impl CreateAccount {
    /// Creates the command with a fresh [`CommandId`]
    #[must_use]
    pub fn new(account_id: AccountId, owner: impl Into<String>, initial_balance: Money) -> Self {
        Self {
            id: CommandId::new(),
            account_id,
            owner: owner.into(),
            initial_balance,
        }
    }
}

impl Command for CreateAccount {
    fn command_id(&self) -> CommandId {
        self.id
    }

    fn command_type(&self) -> &'static str {
        "CreateAccount"
    }
}

/// Opens accounts that do not exist yet.
pub struct CreateAccountHandler {
    accounts: Arc<Accounts>,
}

impl CreateAccountHandler {
    /// Creates a handler validating against `accounts`
    #[must_use]
    pub const fn new(accounts: Arc<Accounts>) -> Self {
        Self { accounts }
    }
}

impl CommandHandler<CreateAccount> for CreateAccountHandler {
    async fn handle(&self, command: &CreateAccount, cancel: CancelToken) -> anyhow::Result<Handled> {
        if command.owner.trim().is_empty() {
            return Ok(Handled::failed(Failure::invalid_input(
                "Account holder name cannot be empty",
            )));
        }

        let existing = self.accounts.get(&account_stream(&command.account_id)).await?;
        if existing.is_some() {
            return Ok(Handled::failed(Failure::conflict(format!(
                "Account {} already exists",
                command.account_id
            ))));
        }
        if cancel.is_cancelled() {
            return Err(Cancelled::new("account creation cancelled").into());
        }

        Ok(Handled::ok(
            vec![Arc::new(AccountCreated {
                account_id: command.account_id.clone(),
                owner: command.owner.clone(),
                initial_balance: command.initial_balance,
            })],
            format!("Account {} opened for {}", command.account_id, command.owner),
        ))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code can use unwrap

    use super::*;
    use eventide_core::Utc;

    fn event(position: u64, payload: impl EventPayload + 'static) -> Event {
        Event::new(Position::new(position), Utc::now(), Arc::new(payload))
    }

    #[tokio::test]
    async fn projector_folds_transfers_into_the_balance() {
        let a = AccountId::new("A");
        let transfer_id = TransferId::new();

        let opened = AccountProjector
            .apply(
                None,
                &event(
                    0,
                    AccountCreated {
                        account_id: a.clone(),
                        owner: "Alex".into(),
                        initial_balance: Money::new(10),
                    },
                ),
            )
            .await;
        let withdrawn = AccountProjector
            .apply(
                opened,
                &event(
                    1,
                    MoneyWithdrawn {
                        account_id: a.clone(),
                        transfer_id,
                        amount: Money::new(25),
                    },
                ),
            )
            .await
            .unwrap();

        assert_eq!(withdrawn.owner, "Alex");
        assert_eq!(withdrawn.balance, Money::new(-15));
    }

    #[tokio::test]
    async fn movements_on_an_unopened_account_are_ignored() {
        let deposited = AccountProjector
            .apply(
                None,
                &event(
                    0,
                    MoneyDeposited {
                        account_id: AccountId::new("ghost"),
                        transfer_id: TransferId::new(),
                        amount: Money::new(5),
                    },
                ),
            )
            .await;
        assert_eq!(deposited, None);
    }

    #[test]
    fn projector_only_matches_account_streams() {
        assert!(AccountProjector.matches(&account_stream(&AccountId::new("A"))));
        assert!(!AccountProjector.matches(&StreamId::new("CommandProcessed", "x")));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn balance_change_without_an_account_is_dropped_and_logged() {
        let deposited = AccountProjector
            .apply(
                None,
                &event(
                    3,
                    MoneyDeposited {
                        account_id: AccountId::new("ghost"),
                        transfer_id: TransferId::new(),
                        amount: Money::new(5),
                    },
                ),
            )
            .await;

        assert_eq!(deposited, None);
        assert!(logs_contain("never opened"));
        assert!(logs_contain("MoneyDeposited.v1"));
    }
}
