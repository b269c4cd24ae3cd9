//! Account fixture — a small bank-account aggregate for exercising the
//! store, the rehydrators and the host.

use evolog_core::aggregate::{Aggregate, DispatchRegistry};
use evolog_core::error::DomainError;
use evolog_core::message::{CommandMessage, Envelope};
use evolog_core::payload::{Payload, Variant};
use serde::{Deserialize, Serialize};

/// Folded account state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// The stream this state was folded from.
    pub account_id: String,
    /// Set once the account is opened.
    pub owner: Option<String>,
    /// Current balance.
    pub balance: i64,
    /// Number of events folded so far.
    pub transactions: u32,
}

/// Opens the account for `owner`. Rejected if it is already open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    /// Target stream.
    pub account_id: String,
    /// Account holder.
    pub owner: String,
}

/// Adds a positive amount to an open account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Target stream.
    pub account_id: String,
    /// Amount to add.
    pub amount: i64,
}

/// Takes up to the current balance out of the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdraw {
    /// Target stream.
    pub account_id: String,
    /// Amount to take out.
    pub amount: i64,
}

/// Commands accepted by [`Account`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AccountCommand {
    /// See [`OpenAccount`].
    OpenAccount(OpenAccount),
    /// See [`Deposit`].
    Deposit(Deposit),
    /// See [`Withdraw`].
    Withdraw(Withdraw),
}

/// The account was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    /// Account holder.
    pub owner: String,
}

/// Money was paid in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposited {
    /// Amount paid in.
    pub amount: i64,
}

/// Money was taken out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawn {
    /// Amount taken out.
    pub amount: i64,
}

/// Events produced and folded by [`Account`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AccountEvent {
    /// See [`AccountOpened`].
    AccountOpened(AccountOpened),
    /// See [`Deposited`].
    Deposited(Deposited),
    /// See [`Withdrawn`].
    Withdrawn(Withdrawn),
}

impl AccountCommand {
    /// Builds an [`OpenAccount`] command.
    #[must_use]
    pub fn open(account_id: &str, owner: &str) -> Self {
        Self::OpenAccount(OpenAccount {
            account_id: account_id.to_owned(),
            owner: owner.to_owned(),
        })
    }

    /// Builds a [`Deposit`] command.
    #[must_use]
    pub fn deposit(account_id: &str, amount: i64) -> Self {
        Self::Deposit(Deposit {
            account_id: account_id.to_owned(),
            amount,
        })
    }

    /// Builds a [`Withdraw`] command.
    #[must_use]
    pub fn withdraw(account_id: &str, amount: i64) -> Self {
        Self::Withdraw(Withdraw {
            account_id: account_id.to_owned(),
            amount,
        })
    }
}

impl AccountEvent {
    /// Builds an [`AccountOpened`] event.
    #[must_use]
    pub fn opened(owner: &str) -> Self {
        Self::AccountOpened(AccountOpened {
            owner: owner.to_owned(),
        })
    }

    /// Builds a [`Deposited`] event.
    #[must_use]
    pub fn deposited(amount: i64) -> Self {
        Self::Deposited(Deposited { amount })
    }

    /// Builds a [`Withdrawn`] event.
    #[must_use]
    pub fn withdrawn(amount: i64) -> Self {
        Self::Withdrawn(Withdrawn { amount })
    }
}

impl Payload for AccountCommand {
    const NAMESPACE: &'static str = Account::STATE_KIND;
    const TYPE_NAMES: &'static [&'static str] = &["OpenAccount", "Deposit", "Withdraw"];

    fn type_name(&self) -> &'static str {
        match self {
            Self::OpenAccount(_) => "OpenAccount",
            Self::Deposit(_) => "Deposit",
            Self::Withdraw(_) => "Withdraw",
        }
    }
}

impl Payload for AccountEvent {
    const NAMESPACE: &'static str = Account::STATE_KIND;
    const TYPE_NAMES: &'static [&'static str] = &["AccountOpened", "Deposited", "Withdrawn"];

    fn type_name(&self) -> &'static str {
        match self {
            Self::AccountOpened(_) => "AccountOpened",
            Self::Deposited(_) => "Deposited",
            Self::Withdrawn(_) => "Withdrawn",
        }
    }
}

macro_rules! variant {
    ($payload:ident :: $name:ident) => {
        impl Variant<$payload> for $name {
            const TYPE_NAME: &'static str = stringify!($name);

            fn project(payload: &$payload) -> Option<&Self> {
                match payload {
                    $payload::$name(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

variant!(AccountCommand::OpenAccount);
variant!(AccountCommand::Deposit);
variant!(AccountCommand::Withdraw);
variant!(AccountEvent::AccountOpened);
variant!(AccountEvent::Deposited);
variant!(AccountEvent::Withdrawn);

fn target(command: &AccountCommand) -> String {
    match command {
        AccountCommand::OpenAccount(c) => c.account_id.clone(),
        AccountCommand::Deposit(c) => c.account_id.clone(),
        AccountCommand::Withdraw(c) => c.account_id.clone(),
    }
}

fn seed(stream_id: &str) -> AccountState {
    AccountState {
        account_id: stream_id.to_owned(),
        ..AccountState::default()
    }
}

fn open(state: &AccountState, command: &OpenAccount) -> Result<Vec<AccountEvent>, DomainError> {
    if state.owner.is_some() {
        return Err(DomainError::Rejected(format!(
            "account {} is already open",
            state.account_id
        )));
    }
    Ok(vec![AccountEvent::opened(&command.owner)])
}

fn deposit(state: &AccountState, command: &Deposit) -> Result<Vec<AccountEvent>, DomainError> {
    if state.owner.is_none() {
        return Err(DomainError::Rejected(format!(
            "account {} is not open",
            state.account_id
        )));
    }
    if command.amount <= 0 {
        return Err(DomainError::Rejected("deposit must be positive".into()));
    }
    Ok(vec![AccountEvent::deposited(command.amount)])
}

fn opened(state: AccountState, event: &AccountOpened) -> AccountState {
    AccountState {
        owner: Some(event.owner.clone()),
        transactions: state.transactions + 1,
        ..state
    }
}

fn deposited(state: AccountState, event: &Deposited) -> AccountState {
    AccountState {
        balance: state.balance + event.amount,
        transactions: state.transactions + 1,
        ..state
    }
}

/// A bank account: opened once, then deposited into and withdrawn from.
///
/// Withdrawing more than the balance is rejected. A zero-amount withdrawal
/// is accepted and produces no events.
#[derive(Debug)]
pub struct Account;

impl Aggregate for Account {
    const STATE_KIND: &'static str = "Account";
    type State = AccountState;
    type Command = AccountCommand;
    type Event = AccountEvent;

    fn seed(stream_id: &str) -> AccountState {
        seed(stream_id)
    }

    fn target_stream(command: &AccountCommand) -> String {
        target(command)
    }

    fn registry() -> DispatchRegistry<Self> {
        DispatchRegistry::new()
            .on_command::<OpenAccount, _>(open)
            .on_command::<Deposit, _>(deposit)
            .on_command::<Withdraw, _>(|state: &AccountState, command: &Withdraw| {
                if command.amount > state.balance {
                    return Err(DomainError::Rejected(format!(
                        "insufficient funds: balance {}, requested {}",
                        state.balance, command.amount
                    )));
                }
                if command.amount == 0 {
                    return Ok(Vec::new());
                }
                Ok(vec![AccountEvent::withdrawn(command.amount)])
            })
            .on_event::<AccountOpened, _>(opened)
            .on_event::<Deposited, _>(deposited)
            .on_event::<Withdrawn, _>(|state: AccountState, event: &Withdrawn| AccountState {
                balance: state.balance - event.amount,
                transactions: state.transactions + 1,
                ..state
            })
    }
}

/// The account aggregate wired up wrong: `Withdraw` has no producer and
/// `Deposited` has no folder.
#[derive(Debug)]
pub struct MisregisteredAccount;

impl Aggregate for MisregisteredAccount {
    const STATE_KIND: &'static str = "MisregisteredAccount";
    type State = AccountState;
    type Command = AccountCommand;
    type Event = AccountEvent;

    fn seed(stream_id: &str) -> AccountState {
        seed(stream_id)
    }

    fn target_stream(command: &AccountCommand) -> String {
        target(command)
    }

    fn registry() -> DispatchRegistry<Self> {
        DispatchRegistry::new()
            .on_command::<OpenAccount, _>(open)
            .on_command::<Deposit, _>(deposit)
            .on_event::<AccountOpened, _>(opened)
    }
}

/// Wraps a command in a fresh envelope, as a client would send it.
///
/// # Panics
///
/// Panics if the command does not encode.
#[must_use]
pub fn command_message(command: &AccountCommand) -> CommandMessage {
    Envelope::originate(command.encode().unwrap(), Some("test-client".to_owned()))
}
