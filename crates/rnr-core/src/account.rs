use crate::{Address, Amount};
use serde::{Deserialize, Serialize};

/// Account state. Created lazily on first credit or validator registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub address: Address,
    pub balance: Amount,
    pub nonce: u64,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Self { address, balance: Amount::zero(), nonce: 0 }
    }

    pub fn with_balance(address: Address, balance: Amount) -> Self {
        Self { address, balance, nonce: 0 }
    }
}
