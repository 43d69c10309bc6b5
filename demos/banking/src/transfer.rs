//! Money transfers between accounts.
//!
//! A transfer is one command that appends two events: a withdrawal on the
//! source stream and a deposit on the destination stream. Both land in the
//! same write, so there is nothing to compensate.

use crate::account::{Accounts, MoneyDeposited, MoneyWithdrawn, account_stream};
use crate::types::{AccountId, Money, TransferId};
use eventide_core::prelude::*;
use std::sync::Arc;

/// Command: move money from one account to another
#[derive(Debug)]
pub struct TransferMoney {
    id: CommandId,
    /// Transfer identifier
    pub transfer_id: TransferId,
    /// Source account
    pub from: AccountId,
    /// Destination account
    pub to: AccountId,
    /// Amount to transfer
    pub amount: Money,
}

impl TransferMoney {
    /// Creates the command with a fresh [`CommandId`] and [`TransferId`]
    #[must_use]
    pub fn new(from: AccountId, to: AccountId, amount: Money) -> Self {
        Self {
            id: CommandId::new(),
            transfer_id: TransferId::new(),
            from,
            to,
            amount,
        }
    }
}

impl Command for TransferMoney {
    fn command_id(&self) -> CommandId {
        self.id
    }

    fn command_type(&self) -> &'static str {
        "TransferMoney"
    }
}

/// Validates a transfer against the account read model.
pub struct TransferMoneyHandler {
    accounts: Arc<Accounts>,
}

impl TransferMoneyHandler {
    /// Creates a handler validating against `accounts`
    #[must_use]
    pub const fn new(accounts: Arc<Accounts>) -> Self {
        Self { accounts }
    }

    async fn require(&self, id: &AccountId, role: &str) -> anyhow::Result<Option<Failure>> {
        let account = self.accounts.get(&account_stream(id)).await?;
        Ok(account
            .is_none()
            .then(|| Failure::not_found(format!("{role} account {id} not found"))))
    }
}

impl CommandHandler<TransferMoney> for TransferMoneyHandler {
    async fn handle(&self, command: &TransferMoney, cancel: CancelToken) -> anyhow::Result<Handled> {
        if !command.amount.is_positive() {
            return Ok(Handled::failed(Failure::invalid_input(format!(
                "Transfer amount must be positive, got {}",
                command.amount
            ))));
        }
        if command.from == command.to {
            return Ok(Handled::failed(Failure::invalid_input(
                "Cannot transfer to the same account",
            )));
        }

        let missing = [
            self.require(&command.from, "Source").await?,
            self.require(&command.to, "Destination").await?,
        ];
        let failure = missing
            .into_iter()
            .flatten()
            .fold(Failure::none(), Failure::combine);
        if !failure.is_none() {
            return Ok(Handled::failed(failure));
        }
        if cancel.is_cancelled() {
            return Err(Cancelled::new("transfer cancelled").into());
        }

        tracing::debug!(
            transfer_id = %command.transfer_id,
            from = %command.from,
            to = %command.to,
            amount = %command.amount,
            "Transfer accepted"
        );

        Ok(Handled::ok(
            vec![
                Arc::new(MoneyWithdrawn {
                    account_id: command.from.clone(),
                    transfer_id: command.transfer_id,
                    amount: command.amount,
                }),
                Arc::new(MoneyDeposited {
                    account_id: command.to.clone(),
                    transfer_id: command.transfer_id,
                    amount: command.amount,
                }),
            ],
            format!(
                "Transferred {} from {} to {}",
                command.amount, command.from, command.to
            ),
        ))
    }
}
