//! Per-operation bookkeeping: put/get/relay contexts and the process-wide
//! context id counter used to correlate them in logs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::EngineError;
use crate::protocol::{Hash20, PublicKey, SegHash, Uri};

pub type ContextId = u32;

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate a fresh, process-unique context id.
pub fn next_context_id() -> ContextId {
    NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Per-put bookkeeping: one instance per blob being published.
#[derive(Debug)]
pub struct PutContext {
    pub id: ContextId,
    pub owner: PublicKey,
    pub uri: Uri,
    pub seg_count: usize,
    pub root_index: Vec<SegHash>,
    invocation_counts: HashMap<Hash20, u8>,
    pub last_response_counts: HashMap<Hash20, usize>,
    pub in_flight: HashSet<Hash20>,
    pub error: Option<EngineError>,
}

impl PutContext {
    pub fn new(owner: PublicKey, uri: Uri, seg_count: usize) -> Self {
        Self {
            id: next_context_id(),
            owner,
            uri,
            seg_count,
            root_index: Vec::with_capacity(seg_count),
            invocation_counts: HashMap::new(),
            last_response_counts: HashMap::new(),
            in_flight: HashSet::new(),
            error: None,
        }
    }

    /// Record one more enqueue attempt for `hash` and mark it in-flight.
    pub fn mark_enqueued(&mut self, hash: Hash20) {
        *self.invocation_counts.entry(hash).or_insert(0) += 1;
        self.in_flight.insert(hash);
    }

    pub fn invocation_count(&self, hash: &Hash20) -> u8 {
        self.invocation_counts.get(hash).copied().unwrap_or(0)
    }

    pub fn is_done(&self) -> bool {
        self.in_flight.is_empty()
    }
}

/// Per-get bookkeeping: one instance per blob being fetched.
#[derive(Debug)]
pub struct GetContext {
    pub id: ContextId,
    pub sender: PublicKey,
    pub uri: Uri,
    pub timestamp: i64,
    pub uri_hash: Hash20,
    fetch_counts: HashMap<Hash20, u8>,
    pub in_flight: HashSet<Hash20>,
    pub root_index: Option<Vec<SegHash>>,
    pub payloads: HashMap<SegHash, Vec<u8>>,
    pub error: Option<EngineError>,
}

impl GetContext {
    pub fn new(sender: PublicKey, uri: Uri, timestamp: i64) -> Self {
        Self {
            id: next_context_id(),
            sender,
            uri,
            timestamp,
            uri_hash: uri,
            fetch_counts: HashMap::new(),
            in_flight: HashSet::new(),
            root_index: None,
            payloads: HashMap::new(),
            error: None,
        }
    }

    pub fn mark_enqueued(&mut self, hash: Hash20) {
        *self.fetch_counts.entry(hash).or_insert(0) += 1;
        self.in_flight.insert(hash);
    }

    pub fn fetch_count(&self, hash: &Hash20) -> u8 {
        self.fetch_counts.get(hash).copied().unwrap_or(0)
    }

    pub fn is_done(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Reassemble the blob from the root index and arrived segment payloads.
    /// `None` if the index hasn't arrived yet or the set is incomplete.
    pub fn reassemble(&self) -> Option<Vec<u8>> {
        let root_index = self.root_index.as_ref()?;
        if root_index.len() != self.payloads.len() {
            return None;
        }
        let mut out = Vec::new();
        for hash in root_index {
            out.extend_from_slice(self.payloads.get(hash)?);
        }
        Some(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayVariant {
    Message,
    Uri { uri: Uri, timestamp: i64 },
}

/// Per-relay bookkeeping: one instance per `relay_message`/`relay_uri` call.
#[derive(Debug)]
pub struct RelayContext {
    pub id: ContextId,
    pub receiver: PublicKey,
    pub msg_id: Hash20,
    pub variant: RelayVariant,
    pub error: Option<EngineError>,
}

impl RelayContext {
    pub fn new(receiver: PublicKey, msg_id: Hash20, variant: RelayVariant) -> Self {
        Self { id: next_context_id(), receiver, msg_id, variant, error: None }
    }
}
