//! Transporter: the single queue of pending DHT invocations, dispatched one
//! per tick at a rate the congestion controller picks.
//!
//! The dispatch task is a `tokio::select!` loop gated by a `CancellationToken`
//! and a `time::sleep`, so `stop` cancels promptly instead of waiting for the
//! current tick to elapse.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::congestion::CongestionController;
use crate::dht::{DhtLayer, NodeEntry};
use crate::error::EngineError;
use crate::protocol::PublicKey;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// One pending DHT call. Held by the queue until dispatched, then by the
/// kademlia layer until its own callback runs.
pub struct Invocation {
    run: Box<dyn FnOnce(Arc<dyn DhtLayer>) -> BoxFuture + Send>,
}

impl Invocation {
    fn new<F, Fut>(run: F) -> Self
    where
        F: FnOnce(Arc<dyn DhtLayer>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self { run: Box::new(move |dht| Box::pin(run(dht))) }
    }
}

/// Registered to receive every incoming relay frame, in registration order.
#[async_trait]
pub trait RelayListener: Send + Sync {
    async fn on_incoming_relay(&self, from: PublicKey, payload: Vec<u8>);
}

struct Inner {
    queue: Mutex<VecDeque<Invocation>>,
    listeners: Mutex<Vec<Arc<dyn RelayListener>>>,
    congestion: Mutex<CongestionController>,
    running: AtomicBool,
    capacity: usize,
    dht: Arc<dyn DhtLayer>,
    cancel: CancellationToken,
}

/// Cheap to clone: every clone shares the same queue, listener set, and
/// dispatch task via `Arc`.
#[derive(Clone)]
pub struct Transporter {
    inner: Arc<Inner>,
}

impl Transporter {
    pub fn new(dht: Arc<dyn DhtLayer>, congestion: CongestionController, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                listeners: Mutex::new(Vec::new()),
                congestion: Mutex::new(congestion),
                running: AtomicBool::new(false),
                capacity,
                dht,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            log::debug!("transporter: dispatch loop starting");
            loop {
                let delay_ms = inner.congestion.lock().await.current_delay_ms().max(1);
                tokio::select! {
                    _ = inner.cancel.cancelled() => {
                        log::debug!("transporter: dispatch loop stopped");
                        break;
                    }
                    _ = time::sleep(Duration::from_millis(delay_ms)) => {
                        Self::dispatch_one(&inner).await;
                    }
                }
            }
        });
    }

    /// Cancel the dispatch task and drop every queued invocation. Already
    /// in-flight kademlia-layer calls are not interrupted; their callbacks
    /// still fire, but no context observes a further queue dispatch.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.cancel.cancel();
        self.inner.queue.lock().await.clear();
    }

    async fn dispatch_one(inner: &Arc<Inner>) {
        if !inner.running.load(Ordering::SeqCst) {
            return;
        }
        if inner.dht.live_node_count().await == 0 {
            return;
        }
        let invocation = inner.queue.lock().await.pop_front();
        if let Some(invocation) = invocation {
            let dht = inner.dht.clone();
            (invocation.run)(dht).await;
            inner.congestion.lock().await.tick();
        }
    }

    pub async fn has_enough_buffer(&self, n: usize) -> bool {
        self.inner.queue.lock().await.len() + n <= self.inner.capacity
    }

    /// Admission gate: forwards to the kademlia layer's live-node count.
    pub async fn live_node_count(&self) -> usize {
        self.inner.dht.live_node_count().await
    }

    async fn enqueue(&self, invocation: Invocation) -> Result<(), EngineError> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(EngineError::TransportStopped);
        }
        let mut queue = self.inner.queue.lock().await;
        if queue.len() >= self.inner.capacity {
            return Err(EngineError::TransportBufferFull);
        }
        queue.push_back(invocation);
        Ok(())
    }

    pub async fn get<F, Fut>(
        &self,
        key: PublicKey,
        salt: Vec<u8>,
        timestamp: i64,
        branch: i8,
        window: i8,
        limit: i8,
        on_complete: F,
    ) -> Result<(), EngineError>
    where
        F: FnOnce(Vec<u8>, bool) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let invocation = Invocation::new(move |dht| async move {
            let (item, authoritative) = dht.get(key, salt, timestamp, branch, window, limit).await;
            on_complete(item.payload, authoritative).await;
        });
        self.enqueue(invocation).await
    }

    pub async fn put<F, Fut>(
        &self,
        entry: Vec<u8>,
        salt: Vec<u8>,
        branch: i8,
        window: i8,
        limit: i8,
        on_complete: F,
    ) -> Result<(), EngineError>
    where
        F: FnOnce(usize) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let invocation = Invocation::new(move |dht| async move {
            let responses = dht.put(entry, salt, branch, window, limit).await;
            on_complete(responses).await;
        });
        self.enqueue(invocation).await
    }

    pub async fn send<F, Fut>(
        &self,
        receiver: PublicKey,
        payload: Vec<u8>,
        branch: i8,
        window: i8,
        limit: i8,
        hit_limit: i8,
        on_complete: F,
    ) -> Result<(), EngineError>
    where
        F: FnOnce(Vec<u8>, Vec<NodeEntry>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let dht_payload = payload.clone();
        let invocation = Invocation::new(move |dht| async move {
            let success_nodes =
                dht.send(receiver, dht_payload, branch, window, limit, hit_limit).await;
            on_complete(payload, success_nodes).await;
        });
        self.enqueue(invocation).await
    }

    pub async fn register_relay_listener(&self, listener: Arc<dyn RelayListener>) {
        let mut listeners = self.inner.listeners.lock().await;
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub async fn unregister_relay_listener(&self, listener: &Arc<dyn RelayListener>) {
        self.inner.listeners.lock().await.retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Invoked by the kademlia layer when an incoming relay frame arrives.
    /// Fans out to every registered listener in registration order.
    pub async fn on_incoming_relay(&self, from: PublicKey, payload: Vec<u8>) {
        let listeners = self.inner.listeners.lock().await.clone();
        for listener in listeners {
            listener.on_incoming_relay(from, payload.clone()).await;
        }
    }
}
