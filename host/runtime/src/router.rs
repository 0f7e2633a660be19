//! Command routing with request/response correlation.
//!
//! The Router is responsible for:
//! - Assigning correlation ids and tracking pending sends
//! - Resolving destinations (explicit or through the graph)
//! - Gating dispatch on the target's lifecycle state and schema
//! - Matching results back to exactly one waiter
//!
//! The pending table is the only process-wide mutable state. Every insert,
//! resolve and removal happens under one lock, so a correlation id is
//! resolved at most once. The lock is never held across an await, which
//! lets a dropped `send` remove its own entry.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use exthost_core::Schema;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::Instant;

use crate::command::{Command, CommandId, CommandResult, Source};
use crate::error::{Result, RuntimeError};
use crate::lifecycle::LifecycleState;

/// Inbound side of one registered instance, as seen by the router.
pub(crate) struct Mailbox {
    pub(crate) tx: mpsc::Sender<Command>,
    pub(crate) state: watch::Receiver<LifecycleState>,
    pub(crate) schema: Option<Arc<Schema>>,
}

struct PendingEntry {
    owner: Option<String>,
    issued_at: Instant,
    waiter: oneshot::Sender<Result<CommandResult>>,
}

/// Pending entries plus a bounded memory of ids that were already settled,
/// used to tell duplicate results apart from unknown ones.
struct PendingTable {
    pending: HashMap<CommandId, PendingEntry>,
    settled: VecDeque<CommandId>,
    settled_set: HashSet<CommandId>,
    history: usize,
}

impl PendingTable {
    fn new(history: usize) -> Self {
        Self {
            pending: HashMap::new(),
            settled: VecDeque::new(),
            settled_set: HashSet::new(),
            history,
        }
    }

    fn settle(&mut self, id: &CommandId) -> Option<PendingEntry> {
        let entry = self.pending.remove(id)?;
        if self.history > 0 {
            if self.settled.len() == self.history {
                if let Some(oldest) = self.settled.pop_front() {
                    self.settled_set.remove(&oldest);
                }
            }
            self.settled.push_back(id.clone());
            self.settled_set.insert(id.clone());
        }
        Some(entry)
    }
}

/// Removes a send's entry when the send finishes or its future is dropped.
struct PendingGuard<'a> {
    router: &'a Router,
    id: CommandId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.router.lock_table().pending.remove(&self.id).is_some() {
            tracing::debug!(id = %self.id, "pending send abandoned");
        }
    }
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    duplicates: AtomicU64,
    unknown: AtomicU64,
    timeouts: AtomicU64,
    cancelled: AtomicU64,
}

/// Snapshot of router diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    /// Results matched to a waiter.
    pub delivered: u64,
    /// Results dropped because their id was already settled.
    pub duplicates: u64,
    /// Results dropped because their id was never pending.
    pub unknown: u64,
    pub timeouts: u64,
    pub cancelled: u64,
}

/// Routes commands between instances and correlates their results.
pub struct Router {
    table: Mutex<PendingTable>,
    mailboxes: RwLock<HashMap<String, Mailbox>>,
    graph: RwLock<BTreeMap<(String, String), String>>,
    counters: Counters,
}

impl Router {
    /// Create a router remembering up to `history` settled ids.
    pub fn new(history: usize) -> Self {
        Self {
            table: Mutex::new(PendingTable::new(history)),
            mailboxes: RwLock::new(HashMap::new()),
            graph: RwLock::new(BTreeMap::new()),
            counters: Counters::default(),
        }
    }

    // A panic while holding the lock leaves the table consistent.
    fn lock_table(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) async fn attach(&self, name: &str, mailbox: Mailbox) -> Result<()> {
        let mut mailboxes = self.mailboxes.write().await;
        if mailboxes.contains_key(name) {
            return Err(RuntimeError::ExtensionAlreadyRegistered(name.to_string()));
        }
        mailboxes.insert(name.to_string(), mailbox);
        Ok(())
    }

    pub(crate) async fn detach(&self, name: &str) {
        self.mailboxes.write().await.remove(name);
    }

    /// Route commands named `command` issued by `from` to `to`.
    pub async fn connect(
        &self,
        from: impl Into<String>,
        command: impl Into<String>,
        to: impl Into<String>,
    ) {
        self.graph
            .write()
            .await
            .insert((from.into(), command.into()), to.into());
    }

    /// Every graph edge as `(from, to)`.
    pub(crate) async fn edges(&self) -> Vec<(String, String)> {
        self.graph
            .read()
            .await
            .iter()
            .map(|((from, _), to)| (from.clone(), to.clone()))
            .collect()
    }

    /// Send a command and wait for its result.
    ///
    /// The id is assigned here unless the caller supplied one. The entry is
    /// owned by the issuing extension (if any) so that tearing the extension
    /// down cancels the wait.
    ///
    /// # Errors
    ///
    /// `DuplicateId` if the supplied id is already pending, any dispatch
    /// error, `Timeout` if no result arrives within `timeout`, `Cancelled`
    /// if the owner is torn down first.
    pub async fn send(&self, mut cmd: Command, timeout: Duration) -> Result<CommandResult> {
        let id = cmd.id.get_or_insert_with(CommandId::new).clone();
        let (tx, mut rx) = oneshot::channel();

        {
            let mut table = self.lock_table();
            if table.pending.contains_key(&id) {
                return Err(RuntimeError::DuplicateId { id });
            }
            table.pending.insert(
                id.clone(),
                PendingEntry {
                    owner: cmd.source.extension().map(str::to_string),
                    issued_at: Instant::now(),
                    waiter: tx,
                },
            );
        }
        let _guard = PendingGuard {
            router: self,
            id: id.clone(),
        };

        // One deadline covers waiting for mailbox space and for the result.
        let deadline = Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, self.dispatch(cmd)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return self.expire(id, timeout, &mut rx),
        }

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RuntimeError::ChannelClosed),
            Err(_) => self.expire(id, timeout, &mut rx),
        }
    }

    fn expire(
        &self,
        id: CommandId,
        timeout: Duration,
        rx: &mut oneshot::Receiver<Result<CommandResult>>,
    ) -> Result<CommandResult> {
        let expired = self.lock_table().settle(&id);
        if expired.is_some() {
            self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%id, ?timeout, "command timed out");
            return Err(RuntimeError::Timeout { id, after: timeout });
        }
        // Resolved between the timer firing and the lock.
        match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(RuntimeError::Timeout { id, after: timeout }),
        }
    }

    /// Deliver a result to its waiter.
    ///
    /// Results whose id is not pending are dropped and counted. This is a
    /// diagnostic, never a failure of the runtime.
    ///
    /// # Errors
    ///
    /// `DuplicateResult` if the id was recently settled, otherwise
    /// `UnknownCorrelation`.
    pub async fn deliver(&self, result: CommandResult) -> Result<()> {
        let id = result.correlation_id.clone();
        let entry = {
            let mut table = self.lock_table();
            match table.settle(&id) {
                Some(entry) => Ok(entry),
                None if table.settled_set.contains(&id) => {
                    Err(RuntimeError::DuplicateResult { id: id.clone() })
                }
                None => Err(RuntimeError::UnknownCorrelation { id: id.clone() }),
            }
        };

        match entry {
            Ok(entry) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%id, latency = ?entry.issued_at.elapsed(), "result delivered");
                // The waiter may have given up already; the id is settled either way.
                let _ = entry.waiter.send(Ok(result));
                Ok(())
            }
            Err(err) => {
                let counter = match &err {
                    RuntimeError::DuplicateResult { .. } => &self.counters.duplicates,
                    _ => &self.counters.unknown,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%id, error = %err, "dropping result");
                Err(err)
            }
        }
    }

    /// Hand a command to its destination's mailbox.
    ///
    /// # Errors
    ///
    /// `NoRoute` or `ExtensionNotFound` if no destination resolves,
    /// `LifecycleViolation` unless the target is started, `SchemaViolation`
    /// if the target's schema rejects the command.
    pub async fn dispatch(&self, mut cmd: Command) -> Result<()> {
        if cmd.id.is_none() {
            cmd.id = Some(CommandId::new());
        }
        let dest = self.resolve(&cmd).await?;

        let tx = {
            let mailboxes = self.mailboxes.read().await;
            let mailbox = mailboxes
                .get(&dest)
                .ok_or_else(|| RuntimeError::ExtensionNotFound(dest.clone()))?;

            let state = *mailbox.state.borrow();
            if !state.accepts_commands() {
                return Err(RuntimeError::LifecycleViolation {
                    extension: dest,
                    state,
                    operation: "dispatch",
                });
            }
            if let Some(schema) = &mailbox.schema {
                schema.validate_command_payload(&cmd.name, &cmd.payload)?;
            }
            mailbox.tx.clone()
        };

        tracing::debug!(command = %cmd.name, source = %cmd.source, %dest, "dispatching");
        tx.send(cmd).await.map_err(|_| RuntimeError::ChannelClosed)
    }

    async fn resolve(&self, cmd: &Command) -> Result<String> {
        if let Some(dest) = &cmd.dest {
            return Ok(dest.clone());
        }
        let no_route = || RuntimeError::NoRoute {
            from: cmd.source.to_string(),
            command: cmd.name.clone(),
        };
        let Source::Extension(from) = &cmd.source else {
            return Err(no_route());
        };
        self.graph
            .read()
            .await
            .get(&(from.clone(), cmd.name.clone()))
            .cloned()
            .ok_or_else(no_route)
    }

    /// Cancel every pending send owned by `owner`. Returns how many were
    /// cancelled.
    pub async fn cancel_owner(&self, owner: &str) -> usize {
        let cancelled: Vec<(CommandId, PendingEntry)> = {
            let mut table = self.lock_table();
            let ids: Vec<CommandId> = table
                .pending
                .iter()
                .filter(|(_, entry)| entry.owner.as_deref() == Some(owner))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| table.settle(&id).map(|entry| (id, entry)))
                .collect()
        };

        let count = cancelled.len();
        for (id, entry) in cancelled {
            let _ = entry.waiter.send(Err(RuntimeError::Cancelled { id }));
        }
        if count > 0 {
            self.counters
                .cancelled
                .fetch_add(count as u64, Ordering::Relaxed);
            tracing::debug!(extension = owner, count, "cancelled pending commands");
        }
        count
    }

    /// Whether a result for `id` would currently be accepted.
    pub async fn is_pending(&self, id: &CommandId) -> bool {
        self.lock_table().pending.contains_key(id)
    }

    pub async fn pending_count(&self) -> usize {
        self.lock_table().pending.len()
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            unknown: self.counters.unknown.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }
}
