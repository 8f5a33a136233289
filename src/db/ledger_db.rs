//! Embedded store for accounts, transactions, fixtures, pools and tickets
//!
//! Uses sled multi-tree transactions: every money movement runs inside one
//! serializable unit, and conflicting units are re-run by sled.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use sled::{Transactional, Tree};

use crate::error::{BolaoError, BolaoResult};
use crate::models::{
    Account, AccountId, ChargeIntent, Fixture, FixtureId, FixtureResult, Pool, PoolId, Ticket, TicketId,
    Transaction, TransactionId,
};

pub type UnitResult<T> = ConflictableTransactionResult<T, BolaoError>;

/// Abort the surrounding unit with a domain error
pub fn abort<T>(err: BolaoError) -> UnitResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

fn id_key(id: &uuid::Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Transactions are keyed by account first so history is one prefix scan.
fn tx_key(account_id: &AccountId, tx_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(tx_id.as_bytes());
    key
}

fn pair_key(a: &uuid::Uuid, b: &uuid::Uuid) -> Vec<u8> {
    tx_key(a, b)
}

fn encode<T: Serialize>(value: &T) -> UnitResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn decode<T: DeserializeOwned>(raw: &[u8]) -> UnitResult<T> {
    serde_json::from_slice(raw).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

/// Typed view over the trees inside one transaction
pub struct Unit<'a> {
    accounts: &'a TransactionalTree,
    transactions: &'a TransactionalTree,
    gateway_refs: &'a TransactionalTree,
    charge_intents: &'a TransactionalTree,
    fixtures: &'a TransactionalTree,
    pools: &'a TransactionalTree,
    pool_codes: &'a TransactionalTree,
    fixture_pools: &'a TransactionalTree,
    tickets: &'a TransactionalTree,
}

impl<'a> Unit<'a> {
    fn get<T: DeserializeOwned>(tree: &TransactionalTree, key: &[u8]) -> UnitResult<Option<T>> {
        match tree.get(key)? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(tree: &TransactionalTree, key: Vec<u8>, value: &T) -> UnitResult<()> {
        tree.insert(key, encode(value)?)?;
        Ok(())
    }

    pub fn account(&self, id: &AccountId) -> UnitResult<Account> {
        match Self::get(self.accounts, &id_key(id))? {
            Some(account) => Ok(account),
            None => abort(BolaoError::NotFound(format!("Account {}", id))),
        }
    }

    pub fn find_account(&self, id: &AccountId) -> UnitResult<Option<Account>> {
        Self::get(self.accounts, &id_key(id))
    }

    pub fn put_account(&self, account: &Account) -> UnitResult<()> {
        Self::put(self.accounts, id_key(&account.id), account)
    }

    pub fn transaction(&self, account_id: &AccountId, tx_id: &TransactionId) -> UnitResult<Option<Transaction>> {
        Self::get(self.transactions, &tx_key(account_id, tx_id))
    }

    pub fn put_transaction(&self, tx: &Transaction) -> UnitResult<()> {
        if let Some(info) = &tx.gateway {
            self.gateway_refs
                .insert(info.gateway_id.as_bytes(), tx_key(&tx.account_id, &tx.id))?;
        }
        Self::put(self.transactions, tx_key(&tx.account_id, &tx.id), tx)
    }

    /// Transaction carrying the given gateway charge/transfer id
    pub fn transaction_by_gateway_id(&self, gateway_id: &str) -> UnitResult<Option<Transaction>> {
        match self.gateway_refs.get(gateway_id.as_bytes())? {
            Some(key) => Self::get(self.transactions, &key),
            None => Ok(None),
        }
    }

    pub fn charge_intent(&self, reference: &TransactionId) -> UnitResult<Option<ChargeIntent>> {
        Self::get(self.charge_intents, &id_key(reference))
    }

    pub fn put_charge_intent(&self, intent: &ChargeIntent) -> UnitResult<()> {
        Self::put(self.charge_intents, id_key(&intent.reference), intent)
    }

    pub fn remove_charge_intent(&self, reference: &TransactionId) -> UnitResult<()> {
        self.charge_intents.remove(id_key(reference))?;
        Ok(())
    }

    pub fn fixture(&self, id: &FixtureId) -> UnitResult<Fixture> {
        match Self::get(self.fixtures, &id_key(id))? {
            Some(fixture) => Ok(fixture),
            None => abort(BolaoError::NotFound(format!("Fixture {}", id))),
        }
    }

    pub fn pool(&self, id: &PoolId) -> UnitResult<Pool> {
        match Self::get(self.pools, &id_key(id))? {
            Some(pool) => Ok(pool),
            None => abort(BolaoError::NotFound(format!("Pool {}", id))),
        }
    }

    pub fn put_pool(&self, pool: &Pool) -> UnitResult<()> {
        Self::put(self.pools, id_key(&pool.id), pool)
    }

    /// Register a new pool: record, entry code reservation and fixture index
    pub fn insert_pool(&self, pool: &Pool) -> UnitResult<()> {
        if self.pool_codes.get(pool.entry_code.as_bytes())?.is_some() {
            return abort(BolaoError::InvalidPool(format!(
                "entry code {} is already in use",
                pool.entry_code
            )));
        }
        self.pool_codes.insert(pool.entry_code.as_bytes(), id_key(&pool.id))?;
        for fixture_id in &pool.fixture_ids {
            self.fixture_pools.insert(pair_key(fixture_id, &pool.id), id_key(&pool.id))?;
        }
        self.put_pool(pool)
    }

    /// Free the entry code of a cancelled pool
    pub fn release_code(&self, pool: &Pool) -> UnitResult<()> {
        self.pool_codes.remove(pool.entry_code.as_bytes())?;
        Ok(())
    }

    pub fn ticket(&self, id: &TicketId) -> UnitResult<Ticket> {
        match Self::get(self.tickets, &id_key(id))? {
            Some(ticket) => Ok(ticket),
            None => abort(BolaoError::NotFound(format!("Ticket {}", id))),
        }
    }

    pub fn put_ticket(&self, ticket: &Ticket) -> UnitResult<()> {
        Self::put(self.tickets, id_key(&ticket.id), ticket)
    }
}

/// Store handle shared by the ledger and the settlement engine
pub struct LedgerDb {
    db: sled::Db,
    accounts: Tree,
    transactions: Tree,
    gateway_refs: Tree,
    charge_intents: Tree,
    fixtures: Tree,
    fixture_refs: Tree,
    pools: Tree,
    pool_codes: Tree,
    fixture_pools: Tree,
    tickets: Tree,
}

impl LedgerDb {
    pub fn open(path: &str) -> BolaoResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Throw-away store, removed on drop
    pub fn temporary() -> BolaoResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> BolaoResult<Self> {
        let store = Self {
            accounts: db.open_tree("accounts")?,
            transactions: db.open_tree("transactions")?,
            gateway_refs: db.open_tree("gateway_refs")?,
            charge_intents: db.open_tree("charge_intents")?,
            fixtures: db.open_tree("fixtures")?,
            fixture_refs: db.open_tree("fixture_refs")?,
            pools: db.open_tree("pools")?,
            pool_codes: db.open_tree("pool_codes")?,
            fixture_pools: db.open_tree("fixture_pools")?,
            tickets: db.open_tree("tickets")?,
            db,
        };
        store.index_fixtures()?;
        Ok(store)
    }

    /// Build the external id index for stores written before it existed
    fn index_fixtures(&self) -> BolaoResult<()> {
        if !self.fixture_refs.is_empty() {
            return Ok(());
        }
        for entry in self.fixtures.iter() {
            let (key, raw) = entry?;
            let fixture: Fixture = serde_json::from_slice(&raw)?;
            self.fixture_refs.insert(fixture.external_id.as_bytes(), key)?;
        }
        Ok(())
    }

    /// Run `f` as one atomic unit over every tree.
    ///
    /// `f` may be invoked several times when sled detects a conflict, so it
    /// must not have side effects outside the unit.
    pub fn atomic<T, F>(&self, f: F) -> BolaoResult<T>
    where
        F: Fn(&Unit) -> UnitResult<T>,
    {
        let result = (
            &self.accounts,
            &self.transactions,
            &self.gateway_refs,
            &self.charge_intents,
            &self.fixtures,
            &self.pools,
            &self.pool_codes,
            &self.fixture_pools,
            &self.tickets,
        )
            .transaction(|(accounts, transactions, gateway_refs, charge_intents, fixtures, pools, pool_codes, fixture_pools, tickets)| {
                let unit = Unit {
                    accounts,
                    transactions,
                    gateway_refs,
                    charge_intents,
                    fixtures,
                    pools,
                    pool_codes,
                    fixture_pools,
                    tickets,
                };
                f(&unit)
            });
        result.map_err(BolaoError::from)
    }

    pub fn flush(&self) -> BolaoResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> BolaoResult<Option<T>> {
        match tree.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(tree: &Tree, prefix: &[u8]) -> BolaoResult<Vec<T>> {
        let mut out = Vec::new();
        for entry in tree.scan_prefix(prefix) {
            let (_, raw) = entry?;
            out.push(serde_json::from_slice(&raw)?);
        }
        Ok(out)
    }

    pub fn account(&self, id: &AccountId) -> BolaoResult<Option<Account>> {
        Self::read(&self.accounts, &id_key(id))
    }

    /// All transactions of an account, in insertion-independent key order
    pub fn transactions_for(&self, account_id: &AccountId) -> BolaoResult<Vec<Transaction>> {
        let mut txs: Vec<Transaction> = Self::scan(&self.transactions, account_id.as_bytes())?;
        txs.sort_by_key(|tx| tx.created_at);
        Ok(txs)
    }

    pub fn transaction(&self, account_id: &AccountId, tx_id: &TransactionId) -> BolaoResult<Option<Transaction>> {
        Self::read(&self.transactions, &tx_key(account_id, tx_id))
    }

    pub fn transaction_by_gateway_id(&self, gateway_id: &str) -> BolaoResult<Option<Transaction>> {
        match self.gateway_refs.get(gateway_id.as_bytes())? {
            Some(key) => Self::read(&self.transactions, &key),
            None => Ok(None),
        }
    }

    pub fn fixture(&self, id: &FixtureId) -> BolaoResult<Option<Fixture>> {
        Self::read(&self.fixtures, &id_key(id))
    }

    pub fn fixture_by_external_id(&self, external_id: &str) -> BolaoResult<Option<Fixture>> {
        match self.fixture_refs.get(external_id.as_bytes())? {
            Some(key) => Self::read(&self.fixtures, &key),
            None => Ok(None),
        }
    }

    /// Insert or replace a fixture, keeping the id of an existing record with
    /// the same external id.
    pub fn upsert_fixture(&self, fixture: Fixture) -> BolaoResult<Fixture> {
        let stored = (&self.fixtures, &self.fixture_refs).transaction(|(fixtures, refs)| {
            let mut fixture = fixture.clone();
            if let Some(key) = refs.get(fixture.external_id.as_bytes())? {
                fixture.id = uuid::Uuid::from_slice(&key).or_else(|e| {
                    abort(BolaoError::Storage(format!("bad fixture key: {}", e)))
                })?;
            }
            refs.insert(fixture.external_id.as_bytes(), id_key(&fixture.id))?;
            fixtures.insert(id_key(&fixture.id), encode(&fixture)?)?;
            Ok(fixture)
        })?;
        Ok(stored)
    }

    /// Store a fetched result; `None` when the fixture is unknown locally.
    pub fn apply_fixture_result(&self, result: &FixtureResult) -> BolaoResult<Option<Fixture>> {
        let Some(mut fixture) = self.fixture_by_external_id(&result.external_id)? else {
            return Ok(None);
        };
        fixture.apply_result(result);
        self.fixtures.insert(id_key(&fixture.id), serde_json::to_vec(&fixture)?)?;
        Ok(Some(fixture))
    }

    /// Charges requested from the provider that were never booked
    pub fn charge_intents(&self) -> BolaoResult<Vec<ChargeIntent>> {
        Self::scan(&self.charge_intents, &[])
    }

    pub fn pool(&self, id: &PoolId) -> BolaoResult<Option<Pool>> {
        Self::read(&self.pools, &id_key(id))
    }

    pub fn pool_by_code(&self, code: &str) -> BolaoResult<Option<Pool>> {
        match self.pool_codes.get(code.as_bytes())? {
            Some(pool_key) => Self::read(&self.pools, &pool_key),
            None => Ok(None),
        }
    }

    pub fn pools_for_fixture(&self, fixture_id: &FixtureId) -> BolaoResult<Vec<PoolId>> {
        let mut ids = Vec::new();
        for entry in self.fixture_pools.scan_prefix(fixture_id.as_bytes()) {
            let (_, raw) = entry?;
            let id = uuid::Uuid::from_slice(&raw)
                .map_err(|e| BolaoError::Storage(format!("bad pool key: {}", e)))?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Pools that are neither finalized nor cancelled
    pub fn open_pools(&self) -> BolaoResult<Vec<Pool>> {
        let pools: Vec<Pool> = Self::scan(&self.pools, &[])?;
        Ok(pools.into_iter().filter(|p| !p.status.is_terminal()).collect())
    }

    pub fn ticket(&self, id: &TicketId) -> BolaoResult<Option<Ticket>> {
        Self::read(&self.tickets, &id_key(id))
    }

    pub fn tickets_for_pool(&self, pool: &Pool) -> BolaoResult<Vec<Ticket>> {
        let mut tickets = Vec::with_capacity(pool.ticket_ids.len());
        for id in &pool.ticket_ids {
            if let Some(ticket) = self.ticket(id)? {
                tickets.push(ticket);
            }
        }
        Ok(tickets)
    }
}
