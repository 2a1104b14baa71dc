//! In-memory backend for exercising the migration engine without PostgreSQL.
//!
//! `MemoryPool` understands just enough SQL to model what migrations do to a
//! database: tables are created and dropped, ledger rows are inserted, deleted
//! and selected, and every other statement is accepted as a no-op. Each
//! transaction works on a copy of the state taken at `begin`; only `commit`
//! publishes it, so a failed step is observably all-or-nothing.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};

use crate::backends::{AdvisoryLock, DatabasePool, DatabaseRow, DatabaseTransaction, DatabaseValue};
use crate::error::{DbError, DbResult};

#[derive(Debug, Clone)]
struct LedgerRow {
    migration_id: i64,
    name: String,
    applied_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default)]
struct State {
    tables: BTreeSet<String>,
    ledger: Vec<LedgerRow>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    statements: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
    fail_ledger_reads: AtomicBool,
    held_locks: Mutex<HashSet<i64>>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory `DatabasePool` with failure injection and lock simulation
#[derive(Clone)]
pub struct MemoryPool {
    ledger_table: String,
    shared: Arc<Shared>,
}

impl MemoryPool {
    /// An empty database whose ledger lives in `ledger_table`
    pub fn new(ledger_table: impl Into<String>) -> Self {
        Self {
            ledger_table: ledger_table.into().to_lowercase(),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Create the ledger table (if needed) and record the given migrations as applied
    pub fn seed_applied(&self, entries: &[(i64, &str)]) {
        let mut state = guard(&self.shared.state);
        state.tables.insert(self.ledger_table.clone());
        for (id, name) in entries {
            state.ledger.push(LedgerRow {
                migration_id: *id,
                name: name.to_string(),
                applied_at: Utc::now().naive_utc(),
            });
        }
    }

    /// Make every statement containing `fragment` fail
    pub fn fail_on(&self, fragment: impl Into<String>) {
        guard(&self.shared.failures).push(fragment.into());
    }

    pub fn clear_failures(&self) {
        guard(&self.shared.failures).clear();
    }

    /// Make selects against the ledger fail while the table still exists
    pub fn fail_ledger_reads(&self, fail: bool) {
        self.shared.fail_ledger_reads.store(fail, Ordering::SeqCst);
    }

    /// Take `key` on behalf of some other session
    pub fn hold_lock(&self, key: i64) {
        guard(&self.shared.held_locks).insert(key);
    }

    pub fn release_lock(&self, key: i64) {
        guard(&self.shared.held_locks).remove(&key);
    }

    pub fn is_locked(&self) -> bool {
        !guard(&self.shared.held_locks).is_empty()
    }

    /// Committed tables, lowercased
    pub fn tables(&self) -> BTreeSet<String> {
        guard(&self.shared.state).tables.clone()
    }

    /// Committed ledger ids, ascending
    pub fn ledger_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = guard(&self.shared.state)
            .ledger
            .iter()
            .map(|row| row.migration_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Every statement attempted, in order, including failed ones
    pub fn statement_log(&self) -> Vec<String> {
        guard(&self.shared.statements).clone()
    }

    pub fn commits(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    fn engine(&self) -> Engine<'_> {
        Engine {
            ledger_table: &self.ledger_table,
            shared: &self.shared,
        }
    }
}

#[async_trait]
impl DatabasePool for MemoryPool {
    async fn begin_transaction(&self) -> DbResult<Box<dyn DatabaseTransaction>> {
        let working = guard(&self.shared.state).clone();
        Ok(Box::new(MemoryTransaction {
            ledger_table: self.ledger_table.clone(),
            shared: self.shared.clone(),
            working,
        }))
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<Box<dyn DatabaseRow>>> {
        let state = guard(&self.shared.state);
        self.engine().fetch_all(&state, sql, params)
    }

    async fn table_exists(&self, table: &str) -> DbResult<bool> {
        Ok(guard(&self.shared.state).tables.contains(&table.to_lowercase()))
    }

    async fn try_lock(&self, key: i64) -> DbResult<Option<Box<dyn AdvisoryLock>>> {
        if !guard(&self.shared.held_locks).insert(key) {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryLock {
            shared: self.shared.clone(),
            key,
        })))
    }

    async fn close(&self) {}
}

/// Transaction over a private copy of the database state
pub struct MemoryTransaction {
    ledger_table: String,
    shared: Arc<Shared>,
    working: State,
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        let engine = Engine {
            ledger_table: &self.ledger_table,
            shared: &self.shared,
        };
        engine.execute(&mut self.working, sql, params)
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        let MemoryTransaction { shared, working, .. } = *self;
        *guard(&shared.state) = working;
        shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Lock taken through `MemoryPool::try_lock`; freed on release or drop
pub struct MemoryLock {
    shared: Arc<Shared>,
    key: i64,
}

#[async_trait]
impl AdvisoryLock for MemoryLock {
    async fn release(self: Box<Self>) -> DbResult<()> {
        // Drop does the work.
        Ok(())
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        guard(&self.shared.held_locks).remove(&self.key);
    }
}

/// Row produced by `MemoryPool` queries
#[derive(Debug, Clone)]
pub struct MemoryRow {
    values: Vec<(String, DatabaseValue)>,
}

impl DatabaseRow for MemoryRow {
    fn get_by_name(&self, name: &str) -> DbResult<DatabaseValue> {
        self.values
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| DbError::Decode(format!("Column '{}' not found", name)))
    }
}

/// The tiny SQL interpreter behind pool reads and transactions
struct Engine<'a> {
    ledger_table: &'a str,
    shared: &'a Shared,
}

impl Engine<'_> {
    fn check(&self, sql: &str) -> DbResult<()> {
        guard(&self.shared.statements).push(sql.to_string());

        if let Some(fragment) = guard(&self.shared.failures)
            .iter()
            .find(|fragment| sql.contains(fragment.as_str()))
        {
            return Err(DbError::Query(format!("injected failure on '{}'", fragment)));
        }
        Ok(())
    }

    fn execute(&self, state: &mut State, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        self.check(sql)?;

        let lowered = sql.to_lowercase();
        let words: Vec<&str> = lowered.split_whitespace().collect();

        match words.as_slice() {
            ["create", "table", rest @ ..] => {
                let (conditional, name) = conditional_name(rest, &["if", "not", "exists"])?;
                if !state.tables.insert(name.clone()) && !conditional {
                    return Err(DbError::Query(format!("relation \"{}\" already exists", name)));
                }
                Ok(0)
            }
            ["drop", "table", rest @ ..] => {
                let (conditional, name) = conditional_name(rest, &["if", "exists"])?;
                if !state.tables.remove(&name) && !conditional {
                    return Err(DbError::Query(format!("table \"{}\" does not exist", name)));
                }
                if name == self.ledger_table {
                    state.ledger.clear();
                }
                Ok(0)
            }
            ["insert", "into", table, ..] if table_name(table) == self.ledger_table => {
                self.require_ledger(state)?;
                state.ledger.push(LedgerRow {
                    migration_id: param(params, 0)?.as_i64()?,
                    name: param(params, 1)?.as_str()?.to_string(),
                    applied_at: param(params, 2)?.as_timestamp()?,
                });
                Ok(1)
            }
            ["delete", "from", table, ..] if table_name(table) == self.ledger_table => {
                self.require_ledger(state)?;
                let id = param(params, 0)?.as_i64()?;
                let before = state.ledger.len();
                state.ledger.retain(|row| row.migration_id != id);
                Ok((before - state.ledger.len()) as u64)
            }
            _ => Ok(0),
        }
    }

    fn fetch_all(&self, state: &State, sql: &str, _params: &[DatabaseValue]) -> DbResult<Vec<Box<dyn DatabaseRow>>> {
        self.check(sql)?;

        let lowered = sql.to_lowercase();
        let words: Vec<&str> = lowered.split_whitespace().collect();
        let reads_ledger = words
            .windows(2)
            .any(|pair| pair[0] == "from" && table_name(pair[1]) == self.ledger_table);

        if !reads_ledger {
            return Ok(Vec::new());
        }
        if self.shared.fail_ledger_reads.load(Ordering::SeqCst) {
            return Err(DbError::Query(format!(
                "permission denied for table {}",
                self.ledger_table
            )));
        }
        self.require_ledger(state)?;

        let mut rows = state.ledger.clone();
        rows.sort_by_key(|row| row.migration_id);

        Ok(rows
            .into_iter()
            .map(|row| {
                Box::new(MemoryRow {
                    values: vec![
                        ("migration_id".to_string(), DatabaseValue::Int64(row.migration_id)),
                        ("name".to_string(), DatabaseValue::String(row.name)),
                        ("applied_at".to_string(), DatabaseValue::Timestamp(row.applied_at)),
                    ],
                }) as Box<dyn DatabaseRow>
            })
            .collect())
    }

    fn require_ledger(&self, state: &State) -> DbResult<()> {
        if state.tables.contains(self.ledger_table) {
            Ok(())
        } else {
            Err(DbError::Query(format!(
                "relation \"{}\" does not exist",
                self.ledger_table
            )))
        }
    }
}

fn table_name(word: &str) -> &str {
    word.split(|c| c == '(' || c == ';').next().unwrap_or(word)
}

fn conditional_name(words: &[&str], guard_words: &[&str]) -> DbResult<(bool, String)> {
    let conditional = words.starts_with(guard_words);
    let rest = if conditional { &words[guard_words.len()..] } else { words };
    rest.first()
        .map(|word| (conditional, table_name(word).to_string()))
        .ok_or_else(|| DbError::Query("syntax error: missing table name".to_string()))
}

fn param(params: &[DatabaseValue], index: usize) -> DbResult<&DatabaseValue> {
    params
        .get(index)
        .ok_or_else(|| DbError::Query(format!("missing parameter ${}", index + 1)))
}
