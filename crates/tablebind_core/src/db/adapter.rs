//! The adapter: sole owner of one store connection.
//!
//! # Responsibility
//! - Open and close the connection.
//! - Expose blocking and non-blocking forms of every operation on top of
//!   one serialized dispatcher.
//! - Provide scoped transactions that always release on exit.
//!
//! # Invariants
//! - Operations on a closed adapter fail with `OrmError::Closed` and never
//!   reach a store.
//! - Blocking forms are "submit and wait" over the same queue as the
//!   non-blocking forms, so both observe one submission order.

use super::config::AdapterConfig;
use super::dispatcher::{Dispatcher, PendingOp, StoreSlot};
use super::sqlite::SqliteStore;
use super::{StatementOutcome, Store};
use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Factory producing a store for a location.
pub type Opener = Arc<dyn Fn(&str, &AdapterConfig) -> OrmResult<Box<dyn Store>> + Send + Sync>;

static NEXT_ADAPTER_ID: AtomicUsize = AtomicUsize::new(1);

/// Cheaply clonable handle; clones share the connection and its queue.
#[derive(Clone)]
pub struct Adapter {
    shared: Arc<AdapterShared>,
}

struct AdapterShared {
    dispatcher: Dispatcher,
    config: AdapterConfig,
    opener: Opener,
    open: Arc<AtomicBool>,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("open", &self.is_open())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Adapter {
    /// Creates a closed adapter backed by SQLite.
    pub fn new(config: AdapterConfig) -> OrmResult<Self> {
        Self::with_opener(
            config,
            Arc::new(|location: &str, config: &AdapterConfig| {
                SqliteStore::open(location, config).map(|store| Box::new(store) as Box<dyn Store>)
            }),
        )
    }

    /// Creates a closed adapter whose store comes from `opener`.
    pub fn with_opener(config: AdapterConfig, opener: Opener) -> OrmResult<Self> {
        let id = NEXT_ADAPTER_ID.fetch_add(1, Ordering::Relaxed);
        let dispatcher = Dispatcher::spawn(&format!("tablebind-adapter-{id}"))?;
        Ok(Self {
            shared: Arc::new(AdapterShared {
                dispatcher,
                config,
                opener,
                open: Arc::new(AtomicBool::new(false)),
            }),
        })
    }

    /// Creates a SQLite adapter with default settings and opens `location`.
    pub fn connect(location: &str) -> OrmResult<Self> {
        let adapter = Self::new(AdapterConfig::default())?;
        adapter.open(location)?;
        Ok(adapter)
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.shared.config
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    pub fn open(&self, location: &str) -> OrmResult<()> {
        self.open_async(location).wait()
    }

    /// Opens the store on the dispatcher thread.
    ///
    /// # Errors
    /// - `Connection` when the location cannot be opened or the adapter is
    ///   already open.
    pub fn open_async(&self, location: &str) -> PendingOp<()> {
        let location = location.to_string();
        let opener = Arc::clone(&self.shared.opener);
        let config = self.shared.config.clone();
        let open = Arc::clone(&self.shared.open);
        self.shared.dispatcher.submit(move |slot: &mut StoreSlot| {
            if slot.is_some() {
                return Err(OrmError::Connection("adapter is already open".into()));
            }
            let store = opener(&location, &config)?;
            *slot = Some(store);
            open.store(true, Ordering::Release);
            Ok(())
        })
    }

    /// Closes the connection; closing a closed adapter is a no-op.
    pub fn close(&self) -> OrmResult<()> {
        self.close_async().wait()
    }

    pub fn close_async(&self) -> PendingOp<()> {
        let open = Arc::clone(&self.shared.open);
        self.shared.dispatcher.submit(move |slot: &mut StoreSlot| {
            if let Some(store) = slot.take() {
                info!("event=adapter_close module=db status=ok mode=explicit");
                drop(store);
            }
            open.store(false, Ordering::Release);
            Ok(())
        })
    }

    /// Runs one parameterized statement.
    pub fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<StatementOutcome> {
        self.execute_async(sql, params.to_vec()).wait()
    }

    pub fn execute_async(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
    ) -> PendingOp<StatementOutcome> {
        let sql = sql.into();
        self.run(move |store| store.execute(&sql, &params))
    }

    /// Runs `body` inside one transaction.
    ///
    /// Commits when `body` returns `Ok` without calling
    /// [`Transaction::abort`]; rolls back on error, abort, or panic.
    ///
    /// `body` runs on the dispatcher thread. It must reach the store only
    /// through `tx`: a blocking [`Adapter`] or `Repository` call made from
    /// inside it waits on a job queued behind the transaction itself and
    /// never returns.
    pub fn with_transaction<T, F>(&self, body: F) -> OrmResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Transaction<'_>) -> OrmResult<T> + Send + 'static,
    {
        self.with_transaction_async(body).wait()
    }

    pub fn with_transaction_async<T, F>(&self, body: F) -> PendingOp<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Transaction<'_>) -> OrmResult<T> + Send + 'static,
    {
        self.run(move |store| run_in_transaction(store, body))
    }

    /// Queues `work` against the open store.
    pub(crate) fn run<T, F>(&self, work: F) -> PendingOp<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Store) -> OrmResult<T> + Send + 'static,
    {
        if !self.is_open() {
            return PendingOp::ready(Err(OrmError::Closed));
        }
        self.shared
            .dispatcher
            .submit(move |slot: &mut StoreSlot| match slot.as_deref_mut() {
                Some(store) => work(store),
                None => Err(OrmError::Closed),
            })
    }
}

/// Statement handle scoped to one open transaction.
pub struct Transaction<'a> {
    store: &'a mut dyn Store,
    aborted: bool,
    finished: bool,
}

impl Transaction<'_> {
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> OrmResult<StatementOutcome> {
        self.store.execute(sql, params)
    }

    /// Requests a rollback once the body returns.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub(crate) fn store(&mut self) -> &mut dyn Store {
        &mut *self.store
    }

    fn commit(&mut self) -> OrmResult<()> {
        self.store.commit()?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.store.rollback() {
            Ok(()) => debug!("event=transaction module=db status=ok outcome=rollback"),
            Err(err) => warn!(
                "event=transaction module=db status=error outcome=rollback error_code={} error={err}",
                err.code()
            ),
        }
    }
}

/// Begins a transaction, runs `body`, and commits or rolls back.
pub(crate) fn run_in_transaction<T, F>(store: &mut dyn Store, body: F) -> OrmResult<T>
where
    F: FnOnce(&mut Transaction<'_>) -> OrmResult<T>,
{
    store.begin()?;
    let mut transaction = Transaction {
        store,
        aborted: false,
        finished: false,
    };
    let value = body(&mut transaction)?;
    if !transaction.aborted {
        transaction.commit()?;
    }
    Ok(value)
}
