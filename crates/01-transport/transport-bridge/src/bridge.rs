use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread;

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use transport::{Direction, PointToPoint, Rank, RequestId, Tag, TransportResult};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Completed, Handle, PendingRequest};
use crate::metrics::{BridgeMetrics, BridgeMetricsSnapshot};
use crate::thread::BridgeThread;

/// Lifecycle of the poll loop. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeState {
    /// Constructed; nothing may be posted yet.
    Idle,
    /// Accepting posts and polling.
    Running,
    /// Refusing new posts; polling until the outstanding set is empty.
    Draining,
    /// Poll loop has exited.
    Stopped,
}

/// Identity of one conversation. At most one request per key is outstanding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub direction: Direction,
    pub peer: Rank,
    pub tag: Tag,
}

struct Registered {
    key: ConversationKey,
    request: Arc<PendingRequest>,
}

struct RequestTable {
    state: BridgeState,
    polling: bool,
    pending: HashMap<RequestId, Registered>,
    /// Poll order; rotated so every request is tested even when the table
    /// outgrows one batch.
    order: VecDeque<RequestId>,
    /// Keys of registered requests plus posts still in flight to the transport.
    conversations: HashSet<ConversationKey>,
}

impl RequestTable {
    fn new() -> Self {
        Self {
            state: BridgeState::Idle,
            polling: false,
            pending: HashMap::new(),
            order: VecDeque::new(),
            conversations: HashSet::new(),
        }
    }

    fn fill_batch(&mut self, batch: &mut Vec<RequestId>, max: usize) {
        for _ in 0..max.min(self.order.len()) {
            if let Some(id) = self.order.pop_front() {
                batch.push(id);
                self.order.push_back(id);
            }
        }
    }

    fn finish(&mut self, id: RequestId) -> Option<Arc<PendingRequest>> {
        let registered = self.pending.remove(&id)?;
        self.conversations.remove(&registered.key);
        Some(registered.request)
    }

    fn abort_all(&mut self, reason: &str) -> usize {
        let aborted = self.pending.len();
        for (_, registered) in self.pending.drain() {
            registered.request.complete(Err(BridgeError::aborted(reason)));
        }
        self.order.clear();
        self.conversations.clear();
        aborted
    }
}

/// Serialises access to a non-thread-safe transport and dispatches completions.
///
/// Two locks with a fixed order of use: `table` guards bookkeeping and is held
/// briefly by posters and the poller; `transport` is held only for the
/// duration of one post or one `test_some`. Neither is held while acquiring
/// the other, and neither is held while a caller blocks in [`Handle::wait`].
pub struct TransportBridge<T: PointToPoint> {
    transport: Mutex<T>,
    table: Mutex<RequestTable>,
    request_added: Condvar,
    config: BridgeConfig,
    metrics: BridgeMetrics,
    rank: Rank,
    size: usize,
}

impl<T: PointToPoint> TransportBridge<T> {
    pub fn new(transport: T, config: BridgeConfig) -> Self {
        let rank = transport.rank();
        let size = transport.size();
        Self {
            transport: Mutex::new(transport),
            table: Mutex::new(RequestTable::new()),
            request_added: Condvar::new(),
            config,
            metrics: BridgeMetrics::default(),
            rank,
            size,
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> BridgeState {
        self.table.lock().state
    }

    /// Number of registered requests not yet completed.
    pub fn outstanding(&self) -> usize {
        self.table.lock().pending.len()
    }

    pub fn metrics(&self) -> BridgeMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Posts a send of `payload` to `dest`. Never blocks on completion.
    pub fn post_send(&self, payload: Bytes, dest: Rank, tag: Tag) -> BridgeResult<Handle> {
        let key = ConversationKey {
            direction: Direction::Send,
            peer: dest,
            tag,
        };
        self.post(key, move |transport| transport.post_send(payload, dest, tag))
    }

    /// Posts a receive from `src` into `buffer`. Never blocks on completion.
    pub fn post_receive(&self, buffer: BytesMut, src: Rank, tag: Tag) -> BridgeResult<Handle> {
        let key = ConversationKey {
            direction: Direction::Receive,
            peer: src,
            tag,
        };
        self.post(key, move |transport| transport.post_receive(buffer, src, tag))
    }

    /// Blocks until `handle` completes.
    pub fn wait(&self, handle: Handle) -> BridgeResult<Completed> {
        handle.wait()
    }

    pub fn send_blocking(&self, payload: Bytes, dest: Rank, tag: Tag) -> BridgeResult<()> {
        self.post_send(payload, dest, tag)?.wait().map(|_| ())
    }

    /// Posts a receive and waits for it, returning the filled buffer.
    pub fn recv_blocking(&self, buffer: BytesMut, src: Rank, tag: Tag) -> BridgeResult<BytesMut> {
        match self.post_receive(buffer, src, tag)?.wait()? {
            Completed::Received(buffer) => Ok(buffer),
            Completed::Sent => Err(BridgeError::aborted("receive completed as a send")),
        }
    }

    fn post<F>(&self, key: ConversationKey, submit: F) -> BridgeResult<Handle>
    where
        F: FnOnce(&mut T) -> TransportResult<RequestId>,
    {
        {
            let mut table = self.table.lock();
            if table.state != BridgeState::Running {
                return Err(BridgeError::NotRunning { state: table.state });
            }
            if !table.conversations.insert(key) {
                return Err(BridgeError::DuplicateConversation {
                    direction: key.direction,
                    peer: key.peer,
                    tag: key.tag,
                });
            }
        }

        let posted = {
            let mut transport = self.transport.lock();
            submit(&mut transport)
        };

        let id = match posted {
            Ok(id) => id,
            Err(err) => {
                self.table.lock().conversations.remove(&key);
                // A draining poller may be waiting for this reservation to clear.
                self.request_added.notify_all();
                return Err(err.into());
            }
        };

        let request = Arc::new(PendingRequest::new());
        {
            let mut table = self.table.lock();
            if table.state == BridgeState::Stopped {
                // Poll loop died between reservation and registration.
                table.conversations.remove(&key);
                request.complete(Err(BridgeError::aborted("poll loop stopped")));
            } else {
                table.pending.insert(
                    id,
                    Registered {
                        key,
                        request: Arc::clone(&request),
                    },
                );
                table.order.push_back(id);
            }
        }
        self.request_added.notify_one();
        self.metrics.record_post(key.direction);

        tracing::trace!(
            rank = self.rank.0,
            direction = %key.direction,
            peer = key.peer.0,
            tag = key.tag.0,
            request = id.0,
            "posted"
        );

        Ok(Handle::new(id, key, request))
    }

    /// Runs the poll loop on the calling thread until [`TransportBridge::stop`]
    /// has been called and every outstanding request has completed.
    ///
    /// A transport failure on a poll call aborts every outstanding request and
    /// is returned here. Either way the bridge ends in [`BridgeState::Stopped`].
    pub fn run(&self) -> BridgeResult<()> {
        {
            let mut table = self.table.lock();
            if table.polling {
                return Err(BridgeError::AlreadyPolling);
            }
            match table.state {
                BridgeState::Idle => {
                    table.state = BridgeState::Running;
                    tracing::debug!(rank = self.rank.0, "bridge running");
                }
                BridgeState::Running | BridgeState::Draining => {}
                BridgeState::Stopped => {
                    return Err(BridgeError::NotRunning {
                        state: BridgeState::Stopped,
                    })
                }
            }
            table.polling = true;
        }

        let result = self.poll_loop();

        let mut table = self.table.lock();
        table.polling = false;
        table.state = BridgeState::Stopped;
        match &result {
            Ok(()) => tracing::debug!(rank = self.rank.0, "bridge stopped"),
            Err(err) => {
                let aborted = table.abort_all(&err.to_string());
                tracing::error!(rank = self.rank.0, %err, aborted, "poll failed; bridge stopped");
            }
        }
        drop(table);
        self.request_added.notify_all();
        result
    }

    /// Stops accepting posts. The poll loop keeps running until the requests
    /// already posted have completed, then exits.
    pub fn stop(&self) {
        {
            let mut table = self.table.lock();
            if matches!(table.state, BridgeState::Idle | BridgeState::Running) {
                table.state = BridgeState::Draining;
                tracing::debug!(
                    rank = self.rank.0,
                    outstanding = table.pending.len(),
                    "bridge draining"
                );
            }
        }
        self.request_added.notify_all();
    }

    /// Marks the bridge running and starts the poll loop on a named thread.
    pub fn spawn(self: &Arc<Self>) -> BridgeResult<BridgeThread<T>>
    where
        T: 'static,
    {
        {
            let mut table = self.table.lock();
            match table.state {
                BridgeState::Idle => table.state = BridgeState::Running,
                BridgeState::Running => {}
                state => return Err(BridgeError::NotRunning { state }),
            }
        }
        let bridge = Arc::clone(self);
        let join = thread::Builder::new()
            .name(format!("transport-bridge-{}", self.rank.0))
            .spawn(move || bridge.run())
            .map_err(|err| BridgeError::aborted(format!("failed to start poll thread: {err}")))?;
        Ok(BridgeThread::new(Arc::clone(self), join))
    }

    fn poll_loop(&self) -> BridgeResult<()> {
        let batch_size = self.config.batch();
        let mut batch = Vec::with_capacity(batch_size);
        let mut completed = Vec::with_capacity(batch_size);

        loop {
            batch.clear();
            {
                let mut table = self.table.lock();
                while table.order.is_empty() {
                    if table.state == BridgeState::Draining && table.conversations.is_empty() {
                        return Ok(());
                    }
                    self.request_added
                        .wait_for(&mut table, self.config.idle_wait);
                }
                table.fill_batch(&mut batch, batch_size);
            }

            completed.clear();
            {
                let mut transport = self.transport.lock();
                transport.test_some(&batch, &mut completed)?;
            }

            let failed = completed.iter().filter(|(_, result)| result.is_err()).count();
            self.metrics.record_poll(completed.len(), failed);

            if completed.is_empty() {
                if self.config.idle_backoff.is_zero() {
                    thread::yield_now();
                } else {
                    thread::sleep(self.config.idle_backoff);
                }
                continue;
            }

            let mut table = self.table.lock();
            for (id, result) in completed.drain(..) {
                match table.finish(id) {
                    Some(request) => {
                        if let Err(err) = &result {
                            tracing::warn!(rank = self.rank.0, request = id.0, %err, "request failed");
                        }
                        request.complete(result.map(Completed::from).map_err(BridgeError::from));
                    }
                    None => tracing::warn!(
                        rank = self.rank.0,
                        request = id.0,
                        "completion for unregistered request"
                    ),
                }
            }
            let RequestTable { order, pending, .. } = &mut *table;
            order.retain(|id| pending.contains_key(id));
        }
    }
}
