use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex;
use thiserror::Error;

use crate::abiencode::types::{Address, U256};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("account {account:?} holds {available}, cannot move {requested}")]
    InsufficientFunds {
        account: Address,
        available: U256,
        requested: U256,
    },
    #[error("balance overflow")]
    Overflow,
    #[error("transfer involving {0:?} was refused")]
    Refused(Address),
}

/// The fungible token primitive the ledger moves deposits and payouts with.
///
/// `transfer_in` moves from a participant into custody, `transfer_out` from
/// custody to a participant. Each call either completes or changes nothing.
pub trait AssetTransfer: Send + Sync {
    fn transfer_in(&self, asset: Address, from: Address, amount: U256)
        -> Result<(), TransferError>;
    fn transfer_out(&self, asset: Address, to: Address, amount: U256)
        -> Result<(), TransferError>;
}

impl<T: AssetTransfer + ?Sized> AssetTransfer for Arc<T> {
    fn transfer_in(
        &self,
        asset: Address,
        from: Address,
        amount: U256,
    ) -> Result<(), TransferError> {
        (**self).transfer_in(asset, from, amount)
    }

    fn transfer_out(&self, asset: Address, to: Address, amount: U256) -> Result<(), TransferError> {
        (**self).transfer_out(asset, to, amount)
    }
}

#[derive(Debug, Default)]
struct Accounts {
    balances: HashMap<(Address, Address), U256>,
    custody: HashMap<Address, U256>,
    refused: HashSet<Address>,
}

impl Accounts {
    fn debit(balance: U256, account: Address, amount: U256) -> Result<U256, TransferError> {
        balance
            .checked_sub(amount)
            .ok_or(TransferError::InsufficientFunds {
                account,
                available: balance,
                requested: amount,
            })
    }
}

/// Token balances kept in memory, one ledger of accounts per asset.
#[derive(Debug, Default)]
pub struct InMemoryToken {
    accounts: Mutex<Accounts>,
}

impl InMemoryToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&self, asset: Address, account: Address, amount: U256) {
        let mut accounts = self.accounts.lock();
        let balance = accounts.balances.entry((asset, account)).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn balance_of(&self, asset: Address, account: Address) -> U256 {
        self.accounts
            .lock()
            .balances
            .get(&(asset, account))
            .copied()
            .unwrap_or_default()
    }

    /// Everything currently held in custody for `asset`, over all channels.
    pub fn custody_balance(&self, asset: Address) -> U256 {
        self.accounts
            .lock()
            .custody
            .get(&asset)
            .copied()
            .unwrap_or_default()
    }

    /// Makes every transfer from or to `account` fail, e.g. a token contract
    /// that blacklists an address.
    pub fn refuse(&self, account: Address) {
        self.accounts.lock().refused.insert(account);
    }

    pub fn unrefuse(&self, account: Address) {
        self.accounts.lock().refused.remove(&account);
    }
}

impl AssetTransfer for InMemoryToken {
    fn transfer_in(
        &self,
        asset: Address,
        from: Address,
        amount: U256,
    ) -> Result<(), TransferError> {
        let mut accounts = self.accounts.lock();
        if accounts.refused.contains(&from) {
            return Err(TransferError::Refused(from));
        }
        let balance = accounts
            .balances
            .get(&(asset, from))
            .copied()
            .unwrap_or_default();
        let debited = Accounts::debit(balance, from, amount)?;
        let custody = accounts.custody.get(&asset).copied().unwrap_or_default();
        let credited = custody
            .checked_add(amount)
            .ok_or(TransferError::Overflow)?;

        accounts.balances.insert((asset, from), debited);
        accounts.custody.insert(asset, credited);
        Ok(())
    }

    fn transfer_out(&self, asset: Address, to: Address, amount: U256) -> Result<(), TransferError> {
        let mut accounts = self.accounts.lock();
        if accounts.refused.contains(&to) {
            return Err(TransferError::Refused(to));
        }
        let custody = accounts.custody.get(&asset).copied().unwrap_or_default();
        // The custody account has no owner address, report the asset.
        let custody = Accounts::debit(custody, asset, amount)?;
        let balance = accounts
            .balances
            .get(&(asset, to))
            .copied()
            .unwrap_or_default();
        let credited = balance
            .checked_add(amount)
            .ok_or(TransferError::Overflow)?;

        accounts.custody.insert(asset, custody);
        accounts.balances.insert((asset, to), credited);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn transfers_move_between_account_and_custody() {
        let mut rng = StdRng::seed_from_u64(0);
        let (asset, alice): (Address, Address) = (rng.gen(), rng.gen());
        let token = InMemoryToken::new();
        token.mint(asset, alice, 100.into());

        token.transfer_in(asset, alice, 60.into()).unwrap();
        assert_eq!(token.balance_of(asset, alice), 40.into());
        assert_eq!(token.custody_balance(asset), 60.into());

        token.transfer_out(asset, alice, 10.into()).unwrap();
        assert_eq!(token.balance_of(asset, alice), 50.into());
        assert_eq!(token.custody_balance(asset), 50.into());
    }

    #[test]
    fn failed_transfer_changes_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        let (asset, alice): (Address, Address) = (rng.gen(), rng.gen());
        let token = InMemoryToken::new();
        token.mint(asset, alice, 5.into());

        assert_eq!(
            token.transfer_in(asset, alice, 6.into()),
            Err(TransferError::InsufficientFunds {
                account: alice,
                available: 5.into(),
                requested: 6.into(),
            })
        );
        assert_eq!(token.balance_of(asset, alice), 5.into());
        assert_eq!(token.custody_balance(asset), 0.into());

        token.refuse(alice);
        assert_eq!(
            token.transfer_in(asset, alice, 1.into()),
            Err(TransferError::Refused(alice))
        );
        token.unrefuse(alice);
        assert!(token.transfer_in(asset, alice, 1.into()).is_ok());
    }

    #[test]
    fn assets_are_separate() {
        let mut rng = StdRng::seed_from_u64(2);
        let (usdc, dai, alice): (Address, Address, Address) = (rng.gen(), rng.gen(), rng.gen());
        let token = InMemoryToken::new();
        token.mint(usdc, alice, 10.into());
        assert!(token.transfer_in(dai, alice, 1.into()).is_err());
        token.transfer_in(usdc, alice, 10.into()).unwrap();
        assert!(token.transfer_out(dai, alice, 1.into()).is_err());
    }
}
