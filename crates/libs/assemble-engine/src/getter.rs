//! Getter: fetch an index record, fan out segment fetches, and reassemble
//! the blob once every segment has arrived. Retries non-authoritative
//! answers up to `reget_times_limit`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex as TokioMutex;

use crate::context::{ContextId, GetContext};
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSink};
use crate::protocol::{Frame, Hash20, PublicKey, Uri};
use crate::rpc_params::DhtRpcKind;
use crate::transporter::Transporter;

type SharedGetContext = Arc<TokioMutex<GetContext>>;
type RunningGets = Arc<TokioMutex<HashMap<ContextId, SharedGetContext>>>;

/// What a pending fetch resolves into once its answer decodes.
#[derive(Clone, Copy)]
enum FetchKind {
    Index,
    Segment,
}

#[derive(Clone)]
pub struct Getter {
    transporter: Transporter,
    events: EventSink,
    reget_times_limit: u8,
    running: RunningGets,
}

impl Getter {
    pub fn new(transporter: Transporter, events: EventSink, reget_times_limit: u8) -> Self {
        Self { transporter, events, reget_times_limit, running: Arc::new(TokioMutex::new(HashMap::new())) }
    }

    pub async fn get(&self, sender: PublicKey, uri: Uri, timestamp: i64) -> Result<(), EngineError> {
        if self.transporter.live_node_count().await == 0 {
            return Err(EngineError::DhtLiveNodesZero);
        }
        if !self.transporter.has_enough_buffer(1).await {
            return Err(EngineError::TransportBufferFull);
        }

        let ctx: SharedGetContext = Arc::new(TokioMutex::new(GetContext::new(sender, uri, timestamp)));
        let id = ctx.lock().await.id;
        self.running.lock().await.insert(id, ctx.clone());

        enqueue_fetch(
            self.transporter.clone(),
            self.events.clone(),
            ctx,
            self.running.clone(),
            self.reget_times_limit,
            sender,
            uri,
            timestamp,
            FetchKind::Index,
        )
        .await;
        Ok(())
    }

    /// Post an `incoming_relay_uri` event for a decoded relay-URI frame.
    /// Invoked by the relay dispatcher; does not start a fetch itself — the
    /// application decides whether to follow up with `get`.
    pub fn handle_incoming_uri(&self, sender: PublicKey, uri: Uri, timestamp: i64) {
        let _ = self.events.send(EngineEvent::IncomingRelayUri { sender, uri, timestamp });
    }
}

fn enqueue_fetch(
    transporter: Transporter,
    events: EventSink,
    ctx: SharedGetContext,
    running: RunningGets,
    reget_times_limit: u8,
    key: PublicKey,
    hash: Hash20,
    timestamp: i64,
    kind: FetchKind,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        {
            let mut guard = ctx.lock().await;
            guard.mark_enqueued(hash);
        }
        let params = DhtRpcKind::Get.params();
        let result = transporter
            .get(key, hash.to_vec(), timestamp, params.invoke_branch, params.invoke_window, params.invoke_limit, {
                let transporter = transporter.clone();
                let events = events.clone();
                let ctx = ctx.clone();
                let running = running.clone();
                move |payload, authoritative| {
                    handle_get_response(
                        transporter,
                        events,
                        ctx,
                        running,
                        reget_times_limit,
                        key,
                        hash,
                        timestamp,
                        kind,
                        payload,
                        authoritative,
                    )
                }
            })
            .await;
        if let Err(err) = result {
            let mut guard = ctx.lock().await;
            guard.error = Some(err);
            guard.in_flight.remove(&hash);
            drop(guard);
            maybe_finish(&events, &ctx, &running).await;
        }
    })
}

#[allow(clippy::too_many_arguments)]
async fn handle_get_response(
    transporter: Transporter,
    events: EventSink,
    ctx: SharedGetContext,
    running: RunningGets,
    reget_times_limit: u8,
    key: PublicKey,
    hash: Hash20,
    timestamp: i64,
    kind: FetchKind,
    payload: Vec<u8>,
    authoritative: bool,
) {
    if !authoritative {
        let retry = {
            let guard = ctx.lock().await;
            guard.fetch_count(&hash) < reget_times_limit
        };
        if retry {
            log::debug!("getter: non-authoritative answer, retrying {}", hex::encode(hash));
            enqueue_fetch(transporter, events, ctx, running, reget_times_limit, key, hash, timestamp, kind).await;
        } else {
            let mut guard = ctx.lock().await;
            guard.error = Some(EngineError::GetTooManyTimes);
            guard.in_flight.remove(&hash);
            drop(guard);
            maybe_finish(&events, &ctx, &running).await;
        }
        return;
    }

    let outcome = match kind {
        FetchKind::Index => decode_index(&payload),
        FetchKind::Segment => decode_segment(&payload),
    };

    // A parse failure is retried like a non-authoritative answer, bounded by
    // the same per-hash fetch count: the hash stays in-flight until either a
    // decodable answer arrives or the budget is exhausted.
    let frame = match outcome {
        Err(err) => {
            let retry = {
                let guard = ctx.lock().await;
                guard.fetch_count(&hash) < reget_times_limit
            };
            if retry {
                log::debug!("getter: parse failure, retrying {}", hex::encode(hash));
                enqueue_fetch(transporter, events, ctx, running, reget_times_limit, key, hash, timestamp, kind).await;
            } else {
                let mut guard = ctx.lock().await;
                guard.error = Some(err);
                guard.in_flight.remove(&hash);
                drop(guard);
                maybe_finish(&events, &ctx, &running).await;
            }
            return;
        }
        Ok(frame) => frame,
    };

    let mut to_fetch: Vec<Hash20> = Vec::new();
    {
        let mut guard = ctx.lock().await;
        guard.in_flight.remove(&hash);
        match frame {
            FetchedFrame::Index(hashes) if hashes.is_empty() => {
                guard.error = Some(EngineError::EmptyBlobIndex);
            }
            FetchedFrame::Index(hashes) => {
                guard.root_index = Some(hashes.clone());
                let mut seen = std::collections::HashSet::new();
                for seg_hash in hashes {
                    if seen.insert(seg_hash) {
                        to_fetch.push(seg_hash);
                    }
                }
            }
            FetchedFrame::Segment(bytes) => {
                guard.payloads.insert(hash, bytes);
            }
        }
    }

    for seg_hash in to_fetch {
        enqueue_fetch(
            transporter.clone(),
            events.clone(),
            ctx.clone(),
            running.clone(),
            reget_times_limit,
            key,
            seg_hash,
            timestamp,
            FetchKind::Segment,
        )
        .await;
    }

    maybe_finish(&events, &ctx, &running).await;
}

enum FetchedFrame {
    Index(Vec<Hash20>),
    Segment(Vec<u8>),
}

fn decode_index(payload: &[u8]) -> Result<FetchedFrame, EngineError> {
    match Frame::decode(payload)? {
        Frame::Index { hashes } => Ok(FetchedFrame::Index(hashes)),
        _ => Err(EngineError::AssembleNameError),
    }
}

fn decode_segment(payload: &[u8]) -> Result<FetchedFrame, EngineError> {
    match Frame::decode(payload)? {
        Frame::Segment { payload } => Ok(FetchedFrame::Segment(payload)),
        _ => Err(EngineError::AssembleNameError),
    }
}

async fn maybe_finish(events: &EventSink, ctx: &SharedGetContext, running: &RunningGets) {
    let (done, id, sender, uri, timestamp, error, reassembled) = {
        let guard = ctx.lock().await;
        let done = guard.is_done();
        (done, guard.id, guard.sender, guard.uri, guard.timestamp, guard.error, guard.reassemble())
    };
    if !done {
        return;
    }
    running.lock().await.remove(&id);
    let (payload, error) = match (reassembled, error) {
        (_, Some(err)) => (Vec::new(), Some(err)),
        (Some(blob), None) => (blob, None),
        (None, None) => (Vec::new(), Some(EngineError::AssembleProtocolFormatError)),
    };
    let _ = events.send(EngineEvent::GetDone { sender, uri, timestamp, payload, error });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::mock::MockDht;
    use crate::protocol::{hash20, BLOB_SEG_MTU};
    use crate::putter::Putter;

    fn new_transporter(live_nodes: usize) -> (Transporter, Arc<MockDht>) {
        let dht = Arc::new(MockDht::new(live_nodes));
        let transporter = Transporter::new(dht.clone(), crate::congestion::CongestionController::new(1), 64);
        transporter.start();
        (transporter, dht)
    }

    #[tokio::test]
    async fn round_trips_a_blob_written_by_the_putter() {
        let (transporter, _dht) = new_transporter(1);
        let (put_tx, mut put_rx) = tokio::sync::mpsc::unbounded_channel();
        let (get_tx, mut get_rx) = tokio::sync::mpsc::unbounded_channel();
        let putter = Putter::new(transporter.clone(), put_tx, 1);
        let getter = Getter::new(transporter, get_tx, 3);

        let owner = [1u8; 32];
        let uri = [2u8; 20];
        let blob = vec![9u8; BLOB_SEG_MTU + 10];
        putter.put(owner, uri, blob.clone()).await.unwrap();
        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), put_rx.recv()).await.unwrap();

        getter.get(owner, uri, 0).await.unwrap();
        let event = tokio::time::timeout(std::time::Duration::from_secs(2), get_rx.recv()).await.unwrap().unwrap();
        match event {
            EngineEvent::GetDone { payload, error, .. } => {
                assert_eq!(error, None);
                assert_eq!(payload, blob);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_index_is_reported_as_empty_blob_index() {
        let (transporter, dht) = new_transporter(1);
        let frame = Frame::Index { hashes: Vec::new() };
        dht.push_get_payload(frame.encode());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let getter = Getter::new(transporter, tx, 3);
        getter.get([0u8; 32], [1u8; 20], 0).await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        match event {
            EngineEvent::GetDone { error, .. } => assert_eq!(error, Some(EngineError::EmptyBlobIndex)),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_authoritative_answers_retry_until_the_limit() {
        let (transporter, dht) = new_transporter(1);
        dht.push_get_non_authoritative();
        dht.push_get_non_authoritative();
        dht.push_get_non_authoritative();
        dht.push_get_non_authoritative();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let getter = Getter::new(transporter, tx, 3);
        getter.get([0u8; 32], [1u8; 20], 0).await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        match event {
            EngineEvent::GetDone { error, .. } => assert_eq!(error, Some(EngineError::GetTooManyTimes)),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_index_is_retried_exactly_reget_times_limit_times() {
        let (transporter, dht) = new_transporter(1);
        for _ in 0..5 {
            dht.push_get_undecodable();
        }
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let getter = Getter::new(transporter, tx, 3);
        getter.get([0u8; 32], [1u8; 20], 0).await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        match event {
            EngineEvent::GetDone { error, .. } => {
                assert!(matches!(error, Some(EngineError::AssembleProtocolFormatError)))
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(dht.invocation_log().len(), 3, "exactly reget_times_limit index fetches");
    }

    #[test]
    fn index_and_segment_decoders_reject_the_wrong_frame_kind() {
        let segment = Frame::Segment { payload: b"x".to_vec() }.encode();
        assert!(matches!(decode_index(&segment), Err(EngineError::AssembleNameError)));
        let index = Frame::Index { hashes: vec![hash20(b"a")] }.encode();
        assert!(matches!(decode_segment(&index), Err(EngineError::AssembleNameError)));
    }
}
