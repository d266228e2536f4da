use crate::kv::{keys, BatchOp, KvStore};
use crate::{Result, StorageError};
use parking_lot::RwLock;
use rnr_core::{Account, Address, Amount, Block, Hash, ValidatorInfo};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Accounts and validators, with an in-memory cache coherent with the
/// durable store.
///
/// The state store exclusively owns the `account_*` and `validator_*` key
/// ranges and the maps that mirror them. All per-block mutations flow
/// through a [`StateTransaction`]: staged writes become durable first, and
/// only then are the cached post-images published under the exclusive lock,
/// so readers observe either the full pre-image or the full post-image of a
/// block.
pub struct StateStore {
    kv: Arc<KvStore>,
    accounts: RwLock<HashMap<Address, Account>>,
    validators: RwLock<HashMap<Address, ValidatorInfo>>,
}

/// Result of staging one block's transactions
#[derive(Debug, Clone)]
pub struct BlockApplyOutcome {
    /// Sum of tx fees net of the burned base fees; flows to the proposer
    pub fee_pool: Amount,
    pub tx_count: usize,
}

impl StateStore {
    /// Open the state store, loading the full validator set into memory.
    /// Account entries are cached lazily on first read.
    pub fn open(kv: Arc<KvStore>) -> Result<Self> {
        let mut validators = HashMap::new();
        for (_, value) in kv.prefix_iter(keys::VALIDATOR_PREFIX)? {
            let info: ValidatorInfo = bincode::deserialize(&value)?;
            validators.insert(info.id, info);
        }
        debug!(validators = validators.len(), "state store opened");
        Ok(Self {
            kv,
            accounts: RwLock::new(HashMap::new()),
            validators: RwLock::new(validators),
        })
    }

    pub fn get_account(&self, address: &Address) -> Result<Account> {
        if let Some(account) = self.accounts.read().get(address) {
            return Ok(account.clone());
        }
        match self.kv.get(&keys::account(address))? {
            Some(bytes) => {
                let account: Account = bincode::deserialize(&bytes)?;
                self.accounts.write().insert(*address, account.clone());
                Ok(account)
            }
            None => Ok(Account::new(*address)),
        }
    }

    /// Whether the address has ever been written to state. Used by the
    /// new-address spam check during block validation.
    pub fn account_exists(&self, address: &Address) -> Result<bool> {
        if self.accounts.read().contains_key(address) {
            return Ok(true);
        }
        Ok(self.kv.get(&keys::account(address))?.is_some())
    }

    pub fn get_validator(&self, id: &Address) -> Option<ValidatorInfo> {
        self.validators.read().get(id).cloned()
    }

    pub fn validators_snapshot(&self) -> Vec<ValidatorInfo> {
        self.validators.read().values().cloned().collect()
    }

    /// Active, non-suspended validators (the voting and proposing set)
    pub fn active_validators(&self) -> Vec<ValidatorInfo> {
        self.validators.read().values().filter(|v| v.can_vote()).cloned().collect()
    }

    pub fn validator_count(&self) -> usize {
        self.validators.read().len()
    }

    /// Durable single-validator update outside a block transaction
    /// (registry maintenance, PoB sample ingestion).
    pub fn put_validator(&self, info: ValidatorInfo) -> Result<()> {
        let bytes = bincode::serialize(&info)?;
        self.kv.put(&keys::validator(&info.id), &bytes)?;
        self.validators.write().insert(info.id, info);
        Ok(())
    }

    pub fn remove_validator(&self, id: &Address) -> Result<()> {
        self.kv.delete(&keys::validator(id))?;
        self.validators.write().remove(id);
        Ok(())
    }

    /// Begin a staged transaction covering account and validator writes
    pub fn begin(&self) -> StateTransaction<'_> {
        StateTransaction {
            store: self,
            ops: Vec::new(),
            accounts: HashMap::new(),
            validators: HashMap::new(),
        }
    }

    /// Stage every transaction of a block, or fail without staging effects
    /// visible anywhere. Transactions are checked against the staged view,
    /// so intra-block sends see earlier debits and nonce bumps.
    pub fn stage_block(
        &self,
        txn: &mut StateTransaction<'_>,
        block: &Block,
    ) -> Result<BlockApplyOutcome> {
        let mut fee_pool = Amount::zero();

        for tx in &block.transactions {
            let mut sender = txn.get_account(&tx.from)?;
            if tx.nonce != sender.nonce {
                return Err(StorageError::BadNonce { expected: sender.nonce, got: tx.nonce });
            }

            let total_debit = &tx.amount + &tx.fee;
            sender.balance = sender
                .balance
                .checked_sub(&total_debit)
                .ok_or(StorageError::InsufficientBalance)?;
            sender.nonce += 1;
            txn.set_account(sender)?;

            let mut recipient = txn.get_account(&tx.to)?;
            recipient.balance += &tx.amount;
            txn.set_account(recipient)?;

            // The base fee is burned: debited above, credited to no one.
            let net_fee = tx.fee.checked_sub(&tx.base_fee()).unwrap_or_else(Amount::zero);
            fee_pool += &net_fee;
        }

        Ok(BlockApplyOutcome { fee_pool, tx_count: block.transactions.len() })
    }

    /// Digest over the durable account and validator ranges, recorded in
    /// checkpoints.
    pub fn state_root(&self) -> Result<Hash> {
        use sha2::{Digest, Sha256};
        let accounts = self.kv.prefix_iter(keys::ACCOUNT_PREFIX)?;
        let validators = self.kv.prefix_iter(keys::VALIDATOR_PREFIX)?;
        let mut hasher = Sha256::new();
        for (key, value) in accounts.iter().chain(validators.iter()) {
            hasher.update(key);
            hasher.update(value);
        }
        let mut root = [0u8; 32];
        root.copy_from_slice(&hasher.finalize());
        Ok(root)
    }

    fn publish(
        &self,
        accounts: HashMap<Address, Account>,
        validators: HashMap<Address, ValidatorInfo>,
    ) {
        let mut account_map = self.accounts.write();
        for (address, account) in accounts {
            account_map.insert(address, account);
        }
        drop(account_map);

        let mut validator_map = self.validators.write();
        for (id, info) in validators {
            validator_map.insert(id, info);
        }
    }
}

/// Staged writes for a single block (or registration).
///
/// Nothing is durable and nothing is visible in memory until `commit`.
/// Dropping the transaction (or calling `rollback`) discards every staged
/// write.
pub struct StateTransaction<'a> {
    store: &'a StateStore,
    ops: Vec<BatchOp>,
    accounts: HashMap<Address, Account>,
    validators: HashMap<Address, ValidatorInfo>,
}

impl StateTransaction<'_> {
    /// Read through the staged view first, then the store
    pub fn get_account(&self, address: &Address) -> Result<Account> {
        if let Some(account) = self.accounts.get(address) {
            return Ok(account.clone());
        }
        self.store.get_account(address)
    }

    pub fn set_account(&mut self, account: Account) -> Result<()> {
        let bytes = bincode::serialize(&account)?;
        self.ops.push(BatchOp::Put(keys::account(&account.address), bytes));
        self.accounts.insert(account.address, account);
        Ok(())
    }

    pub fn get_validator(&self, id: &Address) -> Option<ValidatorInfo> {
        if let Some(info) = self.validators.get(id) {
            return Some(info.clone());
        }
        self.store.get_validator(id)
    }

    pub fn set_validator(&mut self, info: ValidatorInfo) -> Result<()> {
        let bytes = bincode::serialize(&info)?;
        self.ops.push(BatchOp::Put(keys::validator(&info.id), bytes));
        self.validators.insert(info.id, info);
        Ok(())
    }

    /// Credit an account, creating it lazily
    pub fn credit(&mut self, address: &Address, amount: &Amount) -> Result<()> {
        let mut account = self.get_account(address)?;
        account.balance += amount;
        self.set_account(account)
    }

    /// Debit an account; fails on insufficient balance
    pub fn debit(&mut self, address: &Address, amount: &Amount) -> Result<()> {
        let mut account = self.get_account(address)?;
        account.balance =
            account.balance.checked_sub(amount).ok_or(StorageError::InsufficientBalance)?;
        self.set_account(account)
    }

    /// Make the staged writes durable, then publish the post-images to the
    /// in-memory maps. A failed durable write leaves memory untouched.
    pub fn commit(self) -> Result<()> {
        self.store.kv.write_batch(self.ops)?;
        self.store.publish(self.accounts, self.validators);
        Ok(())
    }

    /// Discard every staged write
    pub fn rollback(self) {}

    pub fn staged_ops(&self) -> usize {
        self.ops.len()
    }
}
