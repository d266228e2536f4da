pub mod account;
pub mod amount;
pub mod block;
pub mod constants;
pub mod error;
pub mod mempool;
pub mod poh;
pub mod transaction;
pub mod types;
pub mod validator;

pub use account::Account;
pub use amount::Amount;
pub use block::{Block, BlockHeader};
pub use error::{CoreError, Result};
pub use mempool::{Mempool, MempoolError};
pub use poh::{PohStamp, PohTicker};
pub use transaction::Transaction;
pub use types::{Address, Hash};
pub use validator::ValidatorInfo;
