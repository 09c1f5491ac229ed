//! Document session: local content, revision, and the operation history
//! needed to integrate concurrent remote edits.
//!
//! Every operation carries the [`Context`] it was built on. The log keeps
//! operations in one canonical order, the same at every site: by the size
//! of the history they extend, then author, then sequence number. An
//! operation always sorts after everything it had seen.
//!
//! The document is the pruned snapshot followed by each logged operation,
//! rebased onto everything in front of it:
//!
//! ```text
//!   snapshot ── o1 ── o2' ── o3'' ── ...     oN' = form(oN, {o1 .. oN-1})
//!
//!   form(x, S) = x                            S is what x was built on
//!              = T(form(x, S-y), form(y, S-y))
//!                                             y: last op of S x had not seen
//! ```
//!
//! `form` depends only on the operations involved, so two sites holding the
//! same operations hold the same text whatever order they arrived in. A
//! remote operation that sorts in front of applied ones is integrated by
//! replaying the log from the snapshot.
//!
//! Leading entries that every present peer has acknowledged are folded into
//! the snapshot. Whatever local operations remain are the session's pending
//! operations.
//!
//! Reference: Sun et al., "Achieving Convergence, Causality Preservation,
//! and Intention Preservation in Real-Time Cooperative Editing Systems"

use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use quill_core::{transform, Component, Operation, OtError, Priority};

use crate::error::CollabError;
use crate::protocol::{AckMessage, Context, OperationMessage};

/// Upper bound on remote operations parked while waiting for their dependencies.
pub const MAX_DEFERRED: usize = 1024;

/// Cached forms are dropped once there are more than this many.
const FORM_CACHE_LIMIT: usize = 1 << 16;

/// Whether `context` includes operation `seq` of `author`.
fn covers(context: &Context, author: &Uuid, seq: u64) -> bool {
    context.get(author).is_some_and(|count| *count >= seq)
}

/// `context` without zero counts, so equal histories compare equal.
fn normalized(context: &Context) -> Context {
    context
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(author, count)| (*author, *count))
        .collect()
}

fn merge(into: &mut Context, other: &Context) {
    for (author, count) in other {
        let slot = into.entry(*author).or_insert(0);
        *slot = (*slot).max(*count);
    }
}

/// What the sender had integrated before building `msg`.
fn remote_base(msg: &OperationMessage) -> Context {
    let mut base = normalized(&msg.context);
    if msg.seq > 1 {
        base.insert(msg.user_id, msg.seq - 1);
    } else {
        base.remove(&msg.user_id);
    }
    base
}

/// Insert ties go to the participant with the smaller id.
fn priority(author: Uuid, other: Uuid) -> Priority {
    if author < other {
        Priority::Left
    } else {
        Priority::Right
    }
}

/// Stretch or cut `op` so it spans exactly `len` chars.
fn fit(op: Operation, len: usize) -> Operation {
    if op.base_len() == len {
        return op;
    }
    log::debug!("Fitting op spanning {} chars to {len}", op.base_len());

    let mut fitted = Operation::new();
    let mut left = len;
    for component in op.components() {
        match component {
            Component::Insert(text) => fitted.push(Component::Insert(text.clone())),
            Component::Retain(n) => {
                let n = (*n).min(left);
                fitted.push(Component::Retain(n));
                left -= n;
            }
            Component::Delete(n) => {
                let n = (*n).min(left);
                fitted.push(Component::Delete(n));
                left -= n;
            }
        }
    }
    fitted.push(Component::Retain(left));
    fitted
}

/// Single edit turning `old` into `new`.
fn diff(old: &str, new: &str) -> Operation {
    let old: Vec<char> = old.chars().collect();
    let new: Vec<char> = new.chars().collect();
    let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    Operation::new()
        .retain(prefix)
        .delete(old.len() - prefix - suffix)
        .insert(new[prefix..new.len() - suffix].iter().collect::<String>())
        .retain(suffix)
}

/// One integrated operation.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub author: Uuid,
    /// Author-local sequence number.
    pub seq: u64,
    /// The operation, expressed on the text produced by `base`.
    pub op: Operation,
    /// History the operation is built on.
    pub base: Context,
    /// Size of the sender's history including this operation.
    stamp: u64,
}

impl LogEntry {
    fn new(author: Uuid, seq: u64, op: Operation, base: Context) -> Self {
        let stamp = base.values().sum::<u64>() + 1;
        Self {
            author,
            seq,
            op,
            base,
            stamp,
        }
    }

    fn key(&self) -> (u64, Uuid, u64) {
        (self.stamp, self.author, self.seq)
    }

    fn is_in(&self, context: &Context) -> bool {
        covers(context, &self.author, self.seq)
    }
}

/// Operation history in canonical order, with a pruned prefix.
#[derive(Debug, Default)]
pub struct OperationLog {
    entries: VecDeque<LogEntry>,
    pruned: u64,
    pruned_through: Context,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log whose history up to `context` is already folded into the content.
    fn from_snapshot(context: &Context) -> Self {
        Self {
            entries: VecDeque::new(),
            pruned: 0,
            pruned_through: normalized(context),
        }
    }

    /// Insert `entry` at its place in the order, returning its index.
    fn insert(&mut self, entry: LogEntry) -> usize {
        let key = entry.key();
        let at = self
            .entries
            .iter()
            .rposition(|e| e.key() < key)
            .map_or(0, |i| i + 1);
        self.entries.insert(at, entry);
        at
    }

    fn remove(&mut self, index: usize) -> Option<LogEntry> {
        self.entries.remove(index)
    }

    fn entry(&self, index: usize) -> &LogEntry {
        &self.entries[index]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Number of entries folded into the snapshot so far.
    pub fn pruned_count(&self) -> u64 {
        self.pruned
    }

    /// Highest pruned sequence number of `author`.
    pub fn pruned_through(&self, author: &Uuid) -> u64 {
        self.pruned_through.get(author).copied().unwrap_or(0)
    }

    fn pruned_context(&self) -> &Context {
        &self.pruned_through
    }

    /// Drop the first `count` entries, now covered by `through`, and give
    /// the rest the forms they take on top of it.
    fn fold_front(&mut self, count: usize, through: Context, rebased: Vec<(Operation, Context)>) {
        self.entries.drain(..count);
        for (entry, (op, base)) in self.entries.iter_mut().zip(rebased) {
            entry.op = op;
            entry.base = base;
        }
        self.pruned += count as u64;
        self.pruned_through = through;
    }
}

/// A form under construction: entry `index` rebased over `over[..next]`
/// on its way to `target`.
struct Frame {
    index: usize,
    target: Context,
    over: Vec<usize>,
    next: usize,
    reached: Context,
    op: Operation,
}

/// Memoized forms, keyed by entry and the history they are expressed on.
#[derive(Debug, Default)]
struct FormCache {
    forms: HashMap<(Uuid, u64, Context), Operation>,
}

impl FormCache {
    fn len(&self) -> usize {
        self.forms.len()
    }

    fn clear(&mut self) {
        self.forms.clear();
    }

    /// Entry `index` rebased onto the text produced by `target`.
    ///
    /// `target` must contain the entry's base and not the entry itself.
    fn form(
        &mut self,
        log: &OperationLog,
        index: usize,
        target: &Context,
    ) -> Result<Operation, CollabError> {
        let entry = log.entry(index);
        if let Some(op) = self.forms.get(&(entry.author, entry.seq, target.clone())) {
            return Ok(op.clone());
        }

        let mut stack = vec![self.frame(log, index, target)];
        let mut result = None;
        while let Some(frame) = stack.last_mut() {
            let Some(other_index) = frame.over.get(frame.next).copied() else {
                if let Some(done) = stack.pop() {
                    let entry = log.entry(done.index);
                    self.forms
                        .insert((entry.author, entry.seq, done.target), done.op.clone());
                    result = Some(done.op);
                }
                continue;
            };
            let entry = log.entry(frame.index);
            let other = log.entry(other_index);

            let cached = self
                .forms
                .get(&(other.author, other.seq, frame.reached.clone()))
                .cloned();
            match cached {
                Some(other_op) => {
                    let op = fit(frame.op.clone(), other_op.base_len());
                    frame.op = transform(&op, &other_op, priority(entry.author, other.author))?;
                    frame.reached.insert(other.author, other.seq);
                    frame.next += 1;
                    self.forms.insert(
                        (entry.author, entry.seq, frame.reached.clone()),
                        frame.op.clone(),
                    );
                }
                None => {
                    let reached = frame.reached.clone();
                    let child = self.frame(log, other_index, &reached);
                    stack.push(child);
                }
            }
        }
        Ok(result.unwrap_or_else(|| entry.op.clone()))
    }

    /// Start rebasing entry `index` towards `target`, resuming from the
    /// longest form already cached.
    fn frame(&mut self, log: &OperationLog, index: usize, target: &Context) -> Frame {
        let entry = log.entry(index);
        let over: Vec<usize> = log
            .iter()
            .enumerate()
            .filter(|(i, e)| *i != index && e.is_in(target) && !e.is_in(&entry.base))
            .map(|(i, _)| i)
            .collect();

        let mut reached = entry.base.clone();
        let mut resume = None;
        for (n, i) in over.iter().enumerate() {
            let other = log.entry(*i);
            reached.insert(other.author, other.seq);
            if self.forms.contains_key(&(entry.author, entry.seq, reached.clone())) {
                resume = Some((n + 1, reached.clone()));
            }
        }

        let resumed = resume.and_then(|(next, reached)| {
            self.forms
                .get(&(entry.author, entry.seq, reached.clone()))
                .map(|op| (next, reached, op.clone()))
        });
        let (next, reached, op) = match resumed {
            Some(found) => found,
            None => {
                self.forms.insert(
                    (entry.author, entry.seq, entry.base.clone()),
                    entry.op.clone(),
                );
                (0, entry.base.clone(), entry.op.clone())
            }
        };

        Frame {
            index,
            target: target.clone(),
            over,
            next,
            reached,
            op,
        }
    }
}

/// What happened to an incoming remote operation.
#[derive(Debug, Default)]
pub struct RemoteOutcome {
    /// Edits applied to local content, in application order. More than one
    /// when parked operations became ready.
    pub applied: Vec<Operation>,
    /// Operations that were refused. Content is untouched by these.
    pub rejected: Vec<CollabError>,
}

impl RemoteOutcome {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.rejected.is_empty()
    }
}

enum Admission {
    Duplicate,
    Deferred,
    Ready,
}

/// Per-document collaboration state.
pub struct DocumentSession {
    document_id: String,
    user_id: Uuid,
    /// Text of the pruned history.
    snapshot: String,
    content: String,
    revision: u64,
    local_seq: u64,
    /// Operations integrated per author, this session included.
    integrated: Context,
    log: OperationLog,
    forms: FormCache,
    /// Latest context each peer reported as integrated.
    peer_acks: HashMap<Uuid, Context>,
    /// Remote operations waiting on edits not yet received.
    deferred: Vec<OperationMessage>,
}

impl DocumentSession {
    /// Start a session on `content` with no shared history.
    pub fn new(document_id: impl Into<String>, user_id: Uuid, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            document_id: document_id.into(),
            user_id,
            snapshot: content.clone(),
            content,
            revision: 0,
            local_seq: 0,
            integrated: Context::new(),
            log: OperationLog::new(),
            forms: FormCache::default(),
            peer_acks: HashMap::new(),
            deferred: Vec::new(),
        }
    }

    /// Start from a snapshot that already includes the operations in `context`.
    pub fn from_snapshot(
        document_id: impl Into<String>,
        user_id: Uuid,
        content: impl Into<String>,
        revision: u64,
        context: Context,
    ) -> Self {
        let content = content.into();
        let context = normalized(&context);
        let local_seq = context.get(&user_id).copied().unwrap_or(0);
        Self {
            document_id: document_id.into(),
            user_id,
            snapshot: content.clone(),
            content,
            revision,
            local_seq,
            log: OperationLog::from_snapshot(&context),
            forms: FormCache::default(),
            integrated: context,
            peer_acks: HashMap::new(),
            deferred: Vec::new(),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// What this session has integrated, per author.
    pub fn context(&self) -> &Context {
        &self.integrated
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    /// Local operations not yet acknowledged by every peer, oldest first.
    pub fn pending_operations(&self) -> Vec<Operation> {
        self.log
            .iter()
            .filter(|entry| entry.author == self.user_id)
            .map(|entry| entry.op.clone())
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        self.log.iter().filter(|entry| entry.author == self.user_id).count()
    }

    /// Number of remote operations parked until their dependencies arrive.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Apply a local edit and produce the message to broadcast.
    ///
    /// On error nothing changes.
    pub fn apply_local(&mut self, op: Operation) -> Result<OperationMessage, CollabError> {
        let content = op.apply(&self.content)?;
        let base = self.integrated.clone();

        self.content = content;
        self.revision += 1;
        self.local_seq += 1;
        self.integrated.insert(self.user_id, self.local_seq);
        // Sorts after everything integrated so far, so it lands last.
        self.log
            .insert(LogEntry::new(self.user_id, self.local_seq, op.clone(), base));

        log::trace!(
            "local op seq={} on {} -> revision {}",
            self.local_seq,
            self.document_id,
            self.revision
        );

        Ok(OperationMessage {
            operation: op,
            user_id: self.user_id,
            revision: self.revision,
            seq: self.local_seq,
            context: self.integrated.clone(),
        })
    }

    /// Integrate an operation broadcast by a peer.
    ///
    /// Own echoes and duplicates are ignored. An operation that depends on
    /// edits not yet received is parked and applied once they arrive.
    pub fn handle_remote(&mut self, msg: &OperationMessage) -> RemoteOutcome {
        let mut outcome = RemoteOutcome::default();
        if msg.user_id == self.user_id {
            return outcome;
        }

        match self.admit(msg) {
            Ok(Admission::Duplicate) => {
                log::debug!("Ignoring duplicate op {}#{}", msg.user_id, msg.seq);
            }
            Ok(Admission::Deferred) => {
                if self.deferred.len() >= MAX_DEFERRED {
                    outcome.rejected.push(CollabError::MissingDependencies {
                        user_id: msg.user_id,
                    });
                } else {
                    log::debug!("Parking op {}#{} until its context arrives", msg.user_id, msg.seq);
                    self.deferred.push(msg.clone());
                }
            }
            Ok(Admission::Ready) => match self.integrate(msg) {
                Ok(op) => {
                    outcome.applied.push(op);
                    self.drain_deferred(&mut outcome);
                }
                Err(e) => outcome.rejected.push(e),
            },
            Err(e) => outcome.rejected.push(e),
        }

        for e in &outcome.rejected {
            log::warn!("Rejected remote operation on {}: {e}", self.document_id);
        }
        outcome
    }

    /// Record what `user_id` reports as integrated.
    pub fn record_ack(&mut self, user_id: Uuid, context: &Context) {
        if user_id == self.user_id {
            return;
        }
        merge(self.peer_acks.entry(user_id).or_default(), context);
    }

    /// Forget what a departed peer acknowledged.
    pub fn forget_peer(&mut self, user_id: &Uuid) {
        self.peer_acks.remove(user_id);
    }

    /// The acknowledgement to broadcast after integrating remote edits.
    pub fn ack_message(&self) -> AckMessage {
        AckMessage {
            user_id: self.user_id,
            context: self.integrated.clone(),
        }
    }

    /// Fold leading log entries that every peer in `peers` has integrated
    /// into the snapshot.
    ///
    /// With no peers present nothing can still be concurrent, so the whole
    /// log goes. Returns the number of entries dropped.
    pub fn prune(&mut self, peers: &[Uuid]) -> usize {
        let own = self.user_id;
        let acks = &self.peer_acks;
        // Parked operations are integrated later and need what they were built on.
        let waiting: Vec<Context> = self.deferred.iter().map(remote_base).collect();
        let count = self
            .log
            .iter()
            .take_while(|entry| {
                waiting.iter().all(|base| entry.is_in(base))
                    && peers.iter().filter(|p| **p != own).all(|peer| {
                        *peer == entry.author
                            || acks
                                .get(peer)
                                .is_some_and(|ctx| covers(ctx, &entry.author, entry.seq))
                    })
            })
            .count();
        if count == 0 {
            return 0;
        }

        match self.fold_front(count) {
            Ok(()) => {
                log::trace!("Pruned {count} log entries on {}", self.document_id);
                count
            }
            Err(e) => {
                log::warn!("Keeping history of {}: {e}", self.document_id);
                0
            }
        }
    }

    fn fold_front(&mut self, count: usize) -> Result<(), CollabError> {
        let mut through = self.log.pruned_context().clone();
        for entry in self.log.iter().take(count) {
            through.insert(entry.author, entry.seq);
        }
        let snapshot = self.text_at(&through)?;

        let mut rebased = Vec::with_capacity(self.log.len() - count);
        for index in count..self.log.len() {
            let mut base = self.log.entry(index).base.clone();
            merge(&mut base, &through);
            let op = self.forms.form(&self.log, index, &base)?;
            rebased.push((op, base));
        }

        self.log.fold_front(count, through, rebased);
        self.snapshot = snapshot;
        self.forms.clear();
        Ok(())
    }

    /// Text produced by the logged operations included in `context`.
    fn text_at(&mut self, context: &Context) -> Result<String, CollabError> {
        let mut text = self.snapshot.clone();
        let mut reached = self.log.pruned_context().clone();
        for index in 0..self.log.len() {
            let entry = self.log.entry(index);
            if !entry.is_in(context) {
                continue;
            }
            let (author, seq) = (entry.author, entry.seq);
            let op = self.forms.form(&self.log, index, &reached)?;
            text = fit(op, text.chars().count()).apply(&text)?;
            reached.insert(author, seq);
        }
        Ok(text)
    }

    fn integrated_count(&self, author: &Uuid) -> u64 {
        self.integrated.get(author).copied().unwrap_or(0)
    }

    fn admit(&self, msg: &OperationMessage) -> Result<Admission, CollabError> {
        let seen = self.integrated_count(&msg.user_id);
        let queued = self
            .deferred
            .iter()
            .filter(|d| d.user_id == msg.user_id)
            .map(|d| d.seq)
            .max();
        let last = queued.unwrap_or(seen);

        if msg.seq <= last {
            return Ok(Admission::Duplicate);
        }
        if msg.seq != last + 1 {
            return Err(CollabError::OutOfOrder {
                user_id: msg.user_id,
                expected: last + 1,
                got: msg.seq,
            });
        }
        if queued.is_some() {
            return Ok(Admission::Deferred);
        }
        if self.context_ready(msg)? {
            Ok(Admission::Ready)
        } else {
            Ok(Admission::Deferred)
        }
    }

    /// `Ok(false)` when the sender had seen edits this session has not.
    fn context_ready(&self, msg: &OperationMessage) -> Result<bool, CollabError> {
        for (author, through) in self.log.pruned_context() {
            if *author == msg.user_id {
                continue;
            }
            let seen_by_sender = msg.context.get(author).copied().unwrap_or(0);
            if seen_by_sender < *through {
                return Err(CollabError::ContextUnavailable {
                    user_id: msg.user_id,
                });
            }
        }

        for (author, count) in &msg.context {
            if *author == msg.user_id || *count <= self.integrated_count(author) {
                continue;
            }
            if *author == self.user_id {
                // Claims local edits that were never made.
                return Err(CollabError::DivergentHistory {
                    user_id: msg.user_id,
                });
            }
            return Ok(false);
        }
        Ok(true)
    }

    fn integrate(&mut self, msg: &OperationMessage) -> Result<Operation, CollabError> {
        let base = remote_base(msg);
        let seen_len = if base == self.integrated {
            self.content.chars().count()
        } else {
            self.text_at(&base)?.chars().count()
        };
        if msg.operation.base_len() != seen_len {
            return Err(OtError::LengthMismatch {
                expected: msg.operation.base_len(),
                actual: seen_len,
            }
            .into());
        }

        if self.forms.len() > FORM_CACHE_LIMIT {
            self.forms.clear();
        }
        let previous = self.integrated.clone();
        let mut next = previous.clone();
        next.insert(msg.user_id, msg.seq);

        let at = self.log.insert(LogEntry::new(
            msg.user_id,
            msg.seq,
            msg.operation.clone(),
            base,
        ));
        let last = at + 1 == self.log.len();
        let result = if last {
            self.forms.form(&self.log, at, &previous).and_then(|op| {
                let op = fit(op, self.content.chars().count());
                let content = op.apply(&self.content)?;
                Ok((content, op))
            })
        } else {
            self.text_at(&next)
                .map(|content| (content.clone(), diff(&self.content, &content)))
        };
        let (content, applied) = match result {
            Ok(done) => done,
            Err(e) => {
                self.log.remove(at);
                self.forms.clear();
                return Err(e);
            }
        };

        self.content = content;
        self.revision = (self.revision + 1).max(msg.revision);
        self.integrated = next;
        self.record_ack(msg.user_id, &msg.context);

        log::trace!(
            "integrated {}#{} at {} of {}{} -> revision {}",
            msg.user_id,
            msg.seq,
            at,
            self.log.len(),
            if last { "" } else { " (replayed)" },
            self.revision
        );
        Ok(applied)
    }

    fn drain_deferred(&mut self, outcome: &mut RemoteOutcome) {
        loop {
            let mut progressed = false;
            let mut i = 0;
            while i < self.deferred.len() {
                let msg = &self.deferred[i];
                if msg.seq != self.integrated_count(&msg.user_id) + 1 {
                    i += 1;
                    continue;
                }
                match self.context_ready(msg) {
                    Ok(false) => i += 1,
                    Ok(true) => {
                        let msg = self.deferred.remove(i);
                        match self.integrate(&msg) {
                            Ok(op) => outcome.applied.push(op),
                            Err(e) => {
                                self.deferred.retain(|d| d.user_id != msg.user_id);
                                outcome.rejected.push(e);
                            }
                        }
                        progressed = true;
                    }
                    Err(e) => {
                        let msg = self.deferred.remove(i);
                        self.deferred.retain(|d| d.user_id != msg.user_id);
                        outcome.rejected.push(e);
                        progressed = true;
                    }
                }
            }
            if !progressed {
                break;
            }
        }
    }
}
