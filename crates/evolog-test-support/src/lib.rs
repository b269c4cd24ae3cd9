//! Shared test mocks, fixtures and utilities for evolog.

mod account;
mod bus;
mod clock;
mod storage;

pub use account::{
    Account, AccountCommand, AccountEvent, AccountOpened, AccountState, Deposit, Deposited,
    MisregisteredAccount, OpenAccount, Withdraw, Withdrawn, command_message,
};
pub use bus::RecordingBus;
pub use clock::{FixedClock, ManualClock, fixed_now};
pub use storage::FailingStorageBackend;
