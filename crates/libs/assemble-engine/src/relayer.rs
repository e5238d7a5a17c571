//! Relayer: best-effort one-hop delivery of an opaque message or a URI
//! announcement to a receiver key, via the kademlia layer's direct-send
//! primitive. Unlike puts and gets, a relay has no retry budget: it is a
//! single `send` invocation per call, completing with success or
//! `RELAY_RESPONSE_ZERO`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as TokioMutex;

use crate::context::{ContextId, RelayContext, RelayVariant};
use crate::dht::NodeEntry;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSink};
use crate::protocol::{hash20, Frame, PublicKey, Uri, RELAY_MSG_MTU};
use crate::rpc_params::DhtRpcKind;
use crate::transporter::Transporter;

type SharedRelayContext = Arc<TokioMutex<RelayContext>>;
type RunningRelays = Arc<TokioMutex<HashMap<ContextId, SharedRelayContext>>>;

#[derive(Clone)]
pub struct Relayer {
    transporter: Transporter,
    events: EventSink,
    running: RunningRelays,
}

impl Relayer {
    pub fn new(transporter: Transporter, events: EventSink) -> Self {
        Self { transporter, events, running: Arc::new(TokioMutex::new(HashMap::new())) }
    }

    /// Send an opaque message to `receiver`. Rejected with `BLOB_TOO_LARGE`
    /// if it exceeds `relay_msg_mtu`.
    pub async fn relay_message(&self, receiver: PublicKey, message: Vec<u8>) -> Result<(), EngineError> {
        if message.len() > RELAY_MSG_MTU {
            return Err(EngineError::BlobTooLarge);
        }
        self.admit().await?;

        let msg_id = hash20(&[message.as_slice(), receiver.as_slice()].concat());
        let ctx = RelayContext::new(receiver, msg_id, RelayVariant::Message);
        let payload = Frame::RelayMsg { payload: message }.encode();
        self.enqueue_send(ctx, receiver, payload).await
    }

    /// Announce that a blob is available under `(self_key, uri, timestamp)`
    /// so `receiver` may later `get` it. `self_key` is the local public key,
    /// supplied by the Assembler facade at the call site.
    pub async fn relay_uri(
        &self,
        self_key: PublicKey,
        receiver: PublicKey,
        uri: Uri,
        timestamp: i64,
    ) -> Result<(), EngineError> {
        self.admit().await?;

        let msg_id = hash20(&[receiver.as_slice(), uri.as_slice()].concat());
        let ctx = RelayContext::new(receiver, msg_id, RelayVariant::Uri { uri, timestamp });
        let payload = Frame::RelayUri { sender: self_key, uri, timestamp }.encode();
        self.enqueue_send(ctx, receiver, payload).await
    }

    /// Emit an `incoming_relay_message` event for a decoded relay-msg frame.
    /// Invoked by the relay dispatcher, never by the application directly.
    pub fn handle_incoming_message(&self, from: PublicKey, payload: Vec<u8>) {
        let _ = self.events.send(EngineEvent::IncomingRelayMessage { from, payload });
    }

    async fn admit(&self) -> Result<(), EngineError> {
        if self.transporter.live_node_count().await == 0 {
            return Err(EngineError::DhtLiveNodesZero);
        }
        if !self.transporter.has_enough_buffer(1).await {
            return Err(EngineError::TransportBufferFull);
        }
        Ok(())
    }

    async fn enqueue_send(
        &self,
        ctx: RelayContext,
        receiver: PublicKey,
        payload: Vec<u8>,
    ) -> Result<(), EngineError> {
        let params = DhtRpcKind::Relay.params();
        let id = ctx.id;
        let shared: SharedRelayContext = Arc::new(TokioMutex::new(ctx));
        self.running.lock().await.insert(id, shared.clone());

        let events = self.events.clone();
        let running = self.running.clone();
        let result = self
            .transporter
            .send(
                receiver,
                payload,
                params.invoke_branch,
                params.invoke_window,
                params.invoke_limit,
                params.hit_limit,
                move |_payload, success_nodes| {
                    handle_relay_response(events, shared, running, success_nodes)
                },
            )
            .await;

        if let Err(err) = result {
            let shared = self.running.lock().await.remove(&id);
            if let Some(shared) = shared {
                let mut guard = shared.lock().await;
                guard.error = Some(err);
            }
            return Err(err);
        }
        Ok(())
    }
}

async fn handle_relay_response(
    events: EventSink,
    ctx: SharedRelayContext,
    running: RunningRelays,
    success_nodes: Vec<NodeEntry>,
) {
    let (id, receiver, variant, error) = {
        let mut guard = ctx.lock().await;
        if success_nodes.is_empty() {
            guard.error = Some(EngineError::RelayResponseZero);
        }
        (guard.id, guard.receiver, guard.variant, guard.error)
    };
    running.lock().await.remove(&id);

    let event = match variant {
        RelayVariant::Message => EngineEvent::RelayMessageDone { receiver, error },
        RelayVariant::Uri { uri, timestamp } => EngineEvent::RelayUriDone { receiver, uri, timestamp, error },
    };
    let _ = events.send(event);
}
