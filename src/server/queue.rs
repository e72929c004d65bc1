//! Bounded request queue between the receiver and the worker.
//!
//! ```text
//! receiver ──push──► [ ring of PendingQuery ] ──pop──► worker
//!                    (Mutex + Condvar, halt flag)
//! ```
//!
//! `push` never blocks: a full or halted queue rejects the request. `pop`
//! blocks until a request arrives or the queue is halted.

use std::net::SocketAddrV4;

use parking_lot::{Condvar, Mutex};

/// Size of the datagram receive buffer, and so the largest payload a
/// queued request can carry.
pub const INCOMING_BUFFER_SIZE: usize = 256;

/// An authenticated request waiting for the worker.
#[derive(Clone, Copy)]
pub struct PendingQuery {
    data: [u8; INCOMING_BUFFER_SIZE],
    len: u16,
    /// Sender of the datagram
    pub peer: SocketAddrV4,
    /// Whether the request used the legacy `\xff\xff\xff\xff` framing
    pub legacy: bool,
}

impl PendingQuery {
    /// Copy `payload` into a new request. Payloads longer than the receive
    /// buffer are cut.
    pub fn new(payload: &[u8], peer: SocketAddrV4, legacy: bool) -> Self {
        let len = payload.len().min(INCOMING_BUFFER_SIZE);
        let mut data = [0u8; INCOMING_BUFFER_SIZE];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            data,
            len: len as u16,
            peer,
            legacy,
        }
    }

    /// Bytes following the password line.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl std::fmt::Debug for PendingQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingQuery")
            .field("payload", &String::from_utf8_lossy(self.payload()))
            .field("peer", &self.peer)
            .field("legacy", &self.legacy)
            .finish()
    }
}

struct QueueState {
    slots: Vec<Option<PendingQuery>>,
    head: usize,
    len: usize,
    halted: bool,
}

/// Fixed-capacity FIFO of [`PendingQuery`] with a halt flag.
pub struct RequestQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl RequestQueue {
    /// Create an empty queue holding at most `capacity` requests.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                slots: vec![None; capacity],
                head: 0,
                len: 0,
                halted: false,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Number of requests waiting.
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue a request and wake the worker.
    ///
    /// Returns `false` without blocking if the queue is full or halted.
    pub fn push(&self, query: PendingQuery) -> bool {
        let mut state = self.state.lock();
        let capacity = state.slots.len();
        if state.halted || state.len == capacity {
            return false;
        }

        let tail = (state.head + state.len) % capacity;
        state.slots[tail] = Some(query);
        state.len += 1;
        drop(state);

        self.ready.notify_one();
        true
    }

    /// Wait for the next request.
    ///
    /// Returns `None` once the queue is halted, even if requests are still
    /// waiting.
    pub fn pop(&self) -> Option<PendingQuery> {
        let mut state = self.state.lock();
        while state.len == 0 && !state.halted {
            self.ready.wait(&mut state);
        }
        if state.halted {
            return None;
        }

        let head = state.head;
        let query = state.slots[head].take();
        state.head = (head + 1) % state.slots.len();
        state.len -= 1;
        query
    }

    /// Set the halt flag and wake every waiter.
    pub fn halt(&self) {
        self.state.lock().halted = true;
        self.ready.notify_all();
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().halted
    }
}
