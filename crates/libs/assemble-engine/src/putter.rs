//! Putter: split a blob into segments, publish them plus an index record,
//! and retry zero-response writes up to `reput_times_limit`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex as TokioMutex;

use crate::context::{ContextId, PutContext};
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSink};
use crate::protocol::{hash20, Frame, Hash20, PublicKey, Uri, BLOB_MTU, BLOB_SEG_MTU};
use crate::rpc_params::DhtRpcKind;
use crate::transporter::Transporter;

type SharedPutContext = Arc<TokioMutex<PutContext>>;
type RunningPuts = Arc<TokioMutex<HashMap<ContextId, SharedPutContext>>>;

#[derive(Clone)]
pub struct Putter {
    transporter: Transporter,
    events: EventSink,
    reput_times_limit: u8,
    running: RunningPuts,
}

impl Putter {
    pub fn new(transporter: Transporter, events: EventSink, reput_times_limit: u8) -> Self {
        Self { transporter, events, reput_times_limit, running: Arc::new(TokioMutex::new(HashMap::new())) }
    }

    pub async fn put(&self, owner: PublicKey, uri: Uri, blob: Vec<u8>) -> Result<(), EngineError> {
        if blob.len() > BLOB_MTU {
            return Err(EngineError::BlobTooLarge);
        }
        if self.transporter.live_node_count().await == 0 {
            return Err(EngineError::DhtLiveNodesZero);
        }
        let seg_count = blob.len().div_ceil(BLOB_SEG_MTU);
        if !self.transporter.has_enough_buffer(seg_count + 1).await {
            return Err(EngineError::TransportBufferFull);
        }

        let ctx: SharedPutContext = Arc::new(TokioMutex::new(PutContext::new(owner, uri, seg_count)));
        let id = ctx.lock().await.id;
        self.running.lock().await.insert(id, ctx.clone());

        let segments: Vec<Vec<u8>> = blob.chunks(BLOB_SEG_MTU).map(<[u8]>::to_vec).collect();

        let root_index = if segments.is_empty() {
            Vec::new()
        } else {
            let last = segments.len() - 1;
            let last_hash = hash20(&segments[last]);
            self.enqueue_record(&ctx, last_hash, segments[last].clone()).await;

            // "Prepend each published segment hash to a local vector" then
            // reverse it — walks out to the order the file was split in.
            let mut remaining = Vec::with_capacity(last);
            for segment in &segments[..last] {
                let hash = hash20(segment);
                remaining.insert(0, hash);
                self.enqueue_record(&ctx, hash, segment.clone()).await;
            }
            remaining.reverse();
            remaining.push(last_hash);
            remaining
        };

        {
            let mut guard = ctx.lock().await;
            guard.root_index = root_index;
        }

        self.enqueue_index(&ctx).await;
        Ok(())
    }

    async fn enqueue_record(&self, ctx: &SharedPutContext, hash: Hash20, payload: Vec<u8>) {
        let entry = Frame::Segment { payload }.encode();
        enqueue_put_record(
            self.transporter.clone(),
            self.events.clone(),
            ctx.clone(),
            self.running.clone(),
            self.reput_times_limit,
            hash,
            entry,
        )
        .await;
    }

    async fn enqueue_index(&self, ctx: &SharedPutContext) {
        let (uri, hashes) = {
            let guard = ctx.lock().await;
            (guard.uri, guard.root_index.clone())
        };
        let entry = Frame::Index { hashes }.encode();
        enqueue_put_record(
            self.transporter.clone(),
            self.events.clone(),
            ctx.clone(),
            self.running.clone(),
            self.reput_times_limit,
            uri,
            entry,
        )
        .await;
    }
}

fn enqueue_put_record(
    transporter: Transporter,
    events: EventSink,
    ctx: SharedPutContext,
    running: RunningPuts,
    reput_times_limit: u8,
    hash: Hash20,
    entry: Vec<u8>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        {
            let mut guard = ctx.lock().await;
            guard.mark_enqueued(hash);
        }
        let params = DhtRpcKind::Put.params();
        let result = transporter
            .put(entry.clone(), hash.to_vec(), params.invoke_branch, params.invoke_window, params.invoke_limit, {
                let transporter = transporter.clone();
                let events = events.clone();
                let ctx = ctx.clone();
                let running = running.clone();
                let entry = entry.clone();
                move |responses| {
                    handle_put_response(transporter, events, ctx, running, reput_times_limit, hash, entry, responses)
                }
            })
            .await;
        if let Err(err) = result {
            log::warn!("putter: enqueue failed mid-stream, context {} hash {}", ctx.lock().await.id, hex::encode(hash));
            let mut guard = ctx.lock().await;
            guard.error = Some(err);
            guard.in_flight.remove(&hash);
            drop(guard);
            maybe_finish(&events, &ctx, &running).await;
        }
    })
}

async fn handle_put_response(
    transporter: Transporter,
    events: EventSink,
    ctx: SharedPutContext,
    running: RunningPuts,
    reput_times_limit: u8,
    hash: Hash20,
    entry: Vec<u8>,
    responses: usize,
) {
    let retry = {
        let mut guard = ctx.lock().await;
        guard.last_response_counts.insert(hash, responses);
        if responses == 0 {
            if guard.invocation_count(&hash) < reput_times_limit {
                true
            } else {
                guard.error = Some(EngineError::PutResponseZero);
                guard.in_flight.remove(&hash);
                false
            }
        } else {
            guard.in_flight.remove(&hash);
            false
        }
    };

    if retry {
        log::debug!("putter: retrying zero-response record {}", hex::encode(hash));
        enqueue_put_record(transporter, events, ctx, running, reput_times_limit, hash, entry).await;
    } else {
        maybe_finish(&events, &ctx, &running).await;
    }
}

async fn maybe_finish(events: &EventSink, ctx: &SharedPutContext, running: &RunningPuts) {
    let (done, id, uri, error) = {
        let guard = ctx.lock().await;
        (guard.is_done(), guard.id, guard.uri, guard.error)
    };
    if done {
        running.lock().await.remove(&id);
        let _ = events.send(EngineEvent::PutDone { uri, error });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::mock::MockDht;
    use crate::protocol::Frame;

    fn new_transporter(live_nodes: usize) -> (Transporter, Arc<MockDht>) {
        let dht = Arc::new(MockDht::new(live_nodes));
        let transporter = Transporter::new(dht.clone(), crate::congestion::CongestionController::new(1), 64);
        transporter.start();
        (transporter, dht)
    }

    #[tokio::test]
    async fn rejects_oversized_blob_without_enqueuing() {
        let (transporter, dht) = new_transporter(1);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let putter = Putter::new(transporter, tx, 1);
        let blob = vec![0u8; BLOB_MTU + 1];
        let err = putter.put([0u8; 32], [1u8; 20], blob).await;
        assert_eq!(err, Err(EngineError::BlobTooLarge));
        assert!(dht.invocation_log().is_empty());
    }

    #[tokio::test]
    async fn rejects_when_no_live_nodes() {
        let (transporter, dht) = new_transporter(0);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let putter = Putter::new(transporter, tx, 1);
        let err = putter.put([0u8; 32], [1u8; 20], b"hi".to_vec()).await;
        assert_eq!(err, Err(EngineError::DhtLiveNodesZero));
        assert!(dht.invocation_log().is_empty());
    }

    #[tokio::test]
    async fn single_segment_blob_round_trips() {
        let (transporter, _dht) = new_transporter(1);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let putter = Putter::new(transporter, tx, 1);
        let uri = [2u8; 20];
        let blob = b"hello world".to_vec();
        putter.put([3u8; 32], uri, blob.clone()).await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("put_done never arrived")
            .unwrap();
        match event {
            EngineEvent::PutDone { uri: got_uri, error } => {
                assert_eq!(got_uri, uri);
                assert_eq!(error, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn two_segment_exact_blob_publishes_last_segment_first() {
        let (transporter, dht) = new_transporter(1);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let putter = Putter::new(transporter, tx, 1);
        let uri = [4u8; 20];
        let blob = vec![7u8; BLOB_SEG_MTU * 2];
        putter.put([5u8; 32], uri, blob.clone()).await.unwrap();

        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await.unwrap();

        let log = dht.invocation_log();
        assert_eq!(log.len(), 3, "two segments plus one index");
        let seg1 = hash20(&blob[..BLOB_SEG_MTU]);
        let seg2 = hash20(&blob[BLOB_SEG_MTU..]);
        assert!(log[0].contains(&hex::encode(seg2)), "segment2 (last in file) published first: {log:?}");
        assert!(log[1].contains(&hex::encode(seg1)), "segment1 published second: {log:?}");
        assert!(log[2].contains(&hex::encode(uri)), "index published last, salted with the uri: {log:?}");
    }

    #[tokio::test]
    async fn a_single_zero_response_is_terminal_when_limit_is_one() {
        // reput_times_limit=1 means at most one total attempt per record: no retry.
        let (transporter, dht) = new_transporter(1);
        dht.push_put_response(0);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let putter = Putter::new(transporter, tx, 1);
        putter.put([0u8; 32], [9u8; 20], b"x".to_vec()).await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        match event {
            EngineEvent::PutDone { error, .. } => {
                assert_eq!(error, Some(EngineError::PutResponseZero));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let log = dht.invocation_log();
        let segment_attempts = log.iter().filter(|e| !e.contains(&hex::encode([9u8; 20]))).count();
        assert_eq!(segment_attempts, 1, "limit of 1 allows no retry: {log:?}");
    }

    #[tokio::test]
    async fn retries_up_to_reput_times_limit_before_giving_up() {
        // An empty blob has no segments, so `put` enqueues only the index
        // record — isolating the retry loop to a single hash/record pair.
        let (transporter, dht) = new_transporter(1);
        dht.push_put_response(0); // index's first attempt
        dht.push_put_response(0); // index's retried attempt, still zero
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let putter = Putter::new(transporter, tx, 2);
        putter.put([0u8; 32], [9u8; 20], Vec::new()).await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        match event {
            EngineEvent::PutDone { error, .. } => {
                assert_eq!(error, Some(EngineError::PutResponseZero));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let log = dht.invocation_log();
        assert_eq!(log.len(), 2, "limit of 2 allows exactly one retry of the single index record: {log:?}");
    }

    #[tokio::test]
    async fn index_frame_decodes_after_publish() {
        let (transporter, dht) = new_transporter(1);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let putter = Putter::new(transporter, tx, 1);
        let uri = [6u8; 20];
        putter.put([0u8; 32], uri, b"short".to_vec()).await.unwrap();
        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await.unwrap();

        let stored = dht.invocation_log();
        assert!(stored.iter().any(|e| e.contains(&hex::encode(uri))));
        let hash = hash20(b"short");
        let frame = Frame::Index { hashes: vec![hash] };
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }
}
