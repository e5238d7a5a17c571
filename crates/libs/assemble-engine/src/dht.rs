//! The kademlia layer, modeled as an async trait.
//!
//! Everything in this module is the external collaborator the rest of the
//! engine is generic over: routing table, RPC wire format, and network
//! transport all live on the other side of [`DhtLayer`].

use async_trait::async_trait;

use crate::protocol::PublicKey;

/// One value observed in the DHT — either a peer's put or the response to a
/// lookup.
#[derive(Debug, Clone, Default)]
pub struct DhtItem {
    pub payload: Vec<u8>,
}

impl DhtItem {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }
}

/// A node observed while servicing a `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEntry {
    pub id: PublicKey,
}

/// The upstream interface the Transporter drives. A production implementation
/// wraps the real routing table and RPC codec; tests use [`mock::MockDht`].
#[async_trait]
pub trait DhtLayer: Send + Sync {
    /// Admission gate: number of live nodes currently known.
    async fn live_node_count(&self) -> usize;

    /// `(response_count)` — number of peers that accepted the write.
    async fn put(
        &self,
        entry: Vec<u8>,
        salt: Vec<u8>,
        branch: i8,
        window: i8,
        limit: i8,
    ) -> usize;

    /// `(item, authoritative)` — the kademlia layer's final (or preliminary)
    /// answer for this lookup.
    async fn get(
        &self,
        key: PublicKey,
        salt: Vec<u8>,
        timestamp: i64,
        branch: i8,
        window: i8,
        limit: i8,
    ) -> (DhtItem, bool);

    /// `success_nodes` — nodes that accepted the direct delivery. Empty means
    /// no delivery.
    async fn send(
        &self,
        receiver: PublicKey,
        payload: Vec<u8>,
        branch: i8,
        window: i8,
        limit: i8,
        hit_limit: i8,
    ) -> Vec<NodeEntry>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    //! A hand-rolled fake behind [`DhtLayer`] for unit tests, driven by
    //! scripted responses so callers can exercise retry and fan-out paths
    //! without a live network.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{DhtItem, DhtLayer, NodeEntry};
    use crate::protocol::PublicKey;

    /// What the mock should hand back for a `put`/`get`/`send` call.
    #[derive(Debug, Clone)]
    pub enum Scripted {
        PutResponses(usize),
        GetItem { payload: Vec<u8>, authoritative: bool },
        SendSuccess(Vec<PublicKey>),
    }

    #[derive(Default)]
    struct State {
        live_nodes: usize,
        stored: HashMap<Vec<u8>, Vec<u8>>,
        put_script: Vec<Scripted>,
        get_script: Vec<Scripted>,
        send_script: Vec<Scripted>,
        invocations: Vec<String>,
    }

    /// An in-memory DHT good enough to drive round-trip and retry-bound
    /// tests without a real network. Scripts are consumed front-to-back;
    /// once exhausted, the most recent real stored value (for `get`) or a
    /// default success (for `put`/`send`) is used.
    pub struct MockDht {
        state: Mutex<State>,
    }

    impl MockDht {
        pub fn new(live_nodes: usize) -> Self {
            Self { state: Mutex::new(State { live_nodes, ..Default::default() }) }
        }

        pub fn push_put_response(&self, responses: usize) {
            self.state.lock().unwrap().put_script.push(Scripted::PutResponses(responses));
        }

        pub fn push_get_undecodable(&self) {
            self.state.lock().unwrap().get_script.push(Scripted::GetItem {
                payload: b"not a valid frame".to_vec(),
                authoritative: true,
            });
        }

        pub fn push_get_payload(&self, payload: Vec<u8>) {
            self.state.lock().unwrap().get_script.push(Scripted::GetItem { payload, authoritative: true });
        }

        pub fn push_get_non_authoritative(&self) {
            self.state.lock().unwrap().get_script.push(Scripted::GetItem {
                payload: Vec::new(),
                authoritative: false,
            });
        }

        pub fn push_send_empty(&self) {
            self.state.lock().unwrap().send_script.push(Scripted::SendSuccess(Vec::new()));
        }

        pub fn invocation_log(&self) -> Vec<String> {
            self.state.lock().unwrap().invocations.clone()
        }
    }

    #[async_trait]
    impl DhtLayer for MockDht {
        async fn live_node_count(&self) -> usize {
            self.state.lock().unwrap().live_nodes
        }

        async fn put(&self, entry: Vec<u8>, salt: Vec<u8>, _b: i8, _w: i8, _l: i8) -> usize {
            let mut state = self.state.lock().unwrap();
            state.invocations.push(format!("put(salt={})", hex::encode(&salt)));
            state.stored.insert(salt, entry);
            if let Some(Scripted::PutResponses(n)) = pop_matching(&mut state.put_script) {
                n
            } else {
                1
            }
        }

        async fn get(
            &self,
            _key: PublicKey,
            salt: Vec<u8>,
            _ts: i64,
            _b: i8,
            _w: i8,
            _l: i8,
        ) -> (DhtItem, bool) {
            let mut state = self.state.lock().unwrap();
            state.invocations.push(format!("get(salt={})", hex::encode(&salt)));
            match pop_matching(&mut state.get_script) {
                Some(Scripted::GetItem { payload, authoritative }) => {
                    (DhtItem::new(payload), authoritative)
                }
                None => {
                    let payload = state.stored.get(&salt).cloned().unwrap_or_default();
                    (DhtItem::new(payload), true)
                }
                _ => (DhtItem::default(), true),
            }
        }

        async fn send(
            &self,
            receiver: PublicKey,
            _payload: Vec<u8>,
            _b: i8,
            _w: i8,
            _l: i8,
            _hl: i8,
        ) -> Vec<NodeEntry> {
            let mut state = self.state.lock().unwrap();
            state.invocations.push(format!("send(to={})", hex::encode(receiver)));
            match pop_matching(&mut state.send_script) {
                Some(Scripted::SendSuccess(nodes)) => {
                    nodes.into_iter().map(|id| NodeEntry { id }).collect()
                }
                _ => vec![NodeEntry { id: receiver }],
            }
        }
    }

    fn pop_matching(script: &mut Vec<Scripted>) -> Option<Scripted> {
        if script.is_empty() {
            None
        } else {
            Some(script.remove(0))
        }
    }
}
