//! Assembler: the façade the embedding application talks to. Aggregates the
//! Getter, Putter, Relayer, and relay dispatcher; exposes `start`/`stop`,
//! `update_node_id`, and the four user verbs, each forwarding to the
//! matching sub-component after acquiring the current self public key.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::{ConfigError, EngineConfig};
use crate::congestion::CongestionController;
use crate::dht::DhtLayer;
use crate::dispatcher::RelayDispatcher;
use crate::error::EngineError;
use crate::events::EventSink;
use crate::getter::Getter;
use crate::protocol::{PublicKey, Uri};
use crate::putter::Putter;
use crate::relayer::Relayer;
use crate::transporter::Transporter;

pub struct Assembler {
    transporter: Transporter,
    putter: Putter,
    getter: Getter,
    relayer: Relayer,
    dispatcher: Arc<RelayDispatcher>,
    self_key: RwLock<Option<PublicKey>>,
}

impl Assembler {
    pub fn new(dht: Arc<dyn DhtLayer>, config: &EngineConfig, events: EventSink) -> Self {
        let congestion = CongestionController::new(config.transport_invoking_interval_ms);
        let transporter = Transporter::new(dht, congestion, config.transport_queue_capacity);
        let putter = Putter::new(transporter.clone(), events.clone(), config.reput_times_limit);
        let getter = Getter::new(transporter.clone(), events.clone(), config.reget_times_limit);
        let relayer = Relayer::new(transporter.clone(), events);
        let dispatcher = Arc::new(RelayDispatcher::new(getter.clone(), relayer.clone()));
        Self { transporter, putter, getter, relayer, dispatcher, self_key: RwLock::new(None) }
    }

    /// Derive the local public key from `config.account_seed`, register the
    /// relay dispatcher, and start the Transporter's dispatch loop.
    pub async fn start(&self, config: &EngineConfig) -> Result<(), ConfigError> {
        let key = config.self_public_key()?;
        *self.self_key.write().await = Some(key);
        self.transporter.register_relay_listener(self.dispatcher.clone()).await;
        self.transporter.start();
        log::info!("assembler: started, self key {}", hex::encode(key));
        Ok(())
    }

    /// Stop the Transporter's dispatch loop and drop its queue. Any contexts
    /// already running will never observe further dispatches (§4.4).
    pub async fn stop(&self) {
        self.transporter.stop().await;
        *self.self_key.write().await = None;
    }

    /// Update the locally held public key, e.g. after a key rotation. Does
    /// not affect contexts already in flight.
    pub async fn update_node_id(&self, key: PublicKey) {
        *self.self_key.write().await = Some(key);
    }

    async fn current_self_key(&self) -> Result<PublicKey, EngineError> {
        self.self_key.read().await.ok_or(EngineError::TransportStopped)
    }

    pub async fn put(&self, blob: Vec<u8>, uri: Uri) -> Result<(), EngineError> {
        let owner = self.current_self_key().await?;
        self.putter.put(owner, uri, blob).await
    }

    pub async fn get(&self, sender: PublicKey, uri: Uri, timestamp: i64) -> Result<(), EngineError> {
        self.getter.get(sender, uri, timestamp).await
    }

    pub async fn relay_message(&self, receiver: PublicKey, message: Vec<u8>) -> Result<(), EngineError> {
        self.relayer.relay_message(receiver, message).await
    }

    pub async fn relay_uri(&self, receiver: PublicKey, uri: Uri, timestamp: i64) -> Result<(), EngineError> {
        let self_key = self.current_self_key().await?;
        self.relayer.relay_uri(self_key, receiver, uri, timestamp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::mock::MockDht;
    use crate::events::EngineEvent;

    fn config(seed_byte: u8) -> EngineConfig {
        EngineConfig {
            transport_invoking_interval_ms: 1,
            account_seed: hex::encode([seed_byte; 32]),
            transport_queue_capacity: 64,
            reget_times_limit: 3,
            reput_times_limit: 1,
        }
    }

    #[tokio::test]
    async fn verbs_reject_before_start() {
        let dht = Arc::new(MockDht::new(1));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let assembler = Assembler::new(dht, &config(1), tx);
        let err = assembler.put(b"hi".to_vec(), [0u8; 20]).await;
        assert_eq!(err, Err(EngineError::TransportStopped));
    }

    #[tokio::test]
    async fn put_after_start_uses_derived_self_key() {
        let dht = Arc::new(MockDht::new(1));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let cfg = config(7);
        let assembler = Assembler::new(dht, &cfg, tx);
        assembler.start(&cfg).await.unwrap();

        assembler.put(b"hello".to_vec(), [2u8; 20]).await.unwrap();
        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, EngineEvent::PutDone { error: None, .. }));
        assembler.stop().await;
    }

    #[tokio::test]
    async fn relay_uri_after_start_uses_derived_self_key_as_sender() {
        let dht = Arc::new(MockDht::new(1));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let cfg = config(9);
        let assembler = Assembler::new(dht, &cfg, tx);
        assembler.start(&cfg).await.unwrap();

        assembler.relay_uri([3u8; 32], [4u8; 20], 99).await.unwrap();
        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, EngineEvent::RelayUriDone { error: None, .. }));
        assembler.stop().await;
    }

    #[tokio::test]
    async fn update_node_id_changes_the_put_owner() {
        let dht = Arc::new(MockDht::new(1));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let cfg = config(1);
        let assembler = Assembler::new(dht, &cfg, tx);
        assembler.start(&cfg).await.unwrap();
        assembler.update_node_id([42u8; 32]).await;
        assert_eq!(assembler.current_self_key().await.unwrap(), [42u8; 32]);
        assembler.stop().await;
    }

    #[tokio::test]
    async fn stop_clears_self_key_and_blocks_further_verbs() {
        let dht = Arc::new(MockDht::new(1));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let cfg = config(1);
        let assembler = Assembler::new(dht, &cfg, tx);
        assembler.start(&cfg).await.unwrap();
        assembler.stop().await;
        let err = assembler.put(b"x".to_vec(), [0u8; 20]).await;
        assert_eq!(err, Err(EngineError::TransportStopped));
    }
}
