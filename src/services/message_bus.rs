//! In-process directed message bus with typed envelopes.
//!
//! Outbound envelopes enter a bounded FIFO; a drain task delivers up to a
//! fixed number per tick, each after a small random delay to avoid
//! synchronized fan-out. When the buffer is full the oldest envelope is
//! dropped and a `message:dropped` event fires. Direct sends resolve on ack
//! or reject on timeout; gossip floods with a bounded fanout and hop cap;
//! heartbeats mark silent agents offline.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::error::MessageError;
use crate::domain::models::{MessageEnvelope, MessageType, MessagingConfig, Protocol};

use super::events::{EventBus, HiveEvent};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Hard cap on gossip hops.
const GOSSIP_HOP_CAP: u32 = 3;
/// Drain cadence.
const TICK: std::time::Duration = std::time::Duration::from_millis(50);
/// Upper bound of the per-delivery jitter.
const MAX_DISPATCH_JITTER_MS: u64 = 10;

/// Symmetric payload encryption with a per-construction key and per-message
/// random IV, carried base64-encoded as `iv || ciphertext`.
struct CryptoBox {
    key: [u8; 32],
}

impl CryptoBox {
    fn new() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    fn encrypt(&self, payload: &serde_json::Value) -> Result<serde_json::Value, MessageError> {
        let plaintext = payload.to_string();
        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut wire = Vec::with_capacity(16 + ciphertext.len());
        wire.extend_from_slice(&iv);
        wire.extend_from_slice(&ciphertext);
        Ok(serde_json::Value::String(BASE64.encode(wire)))
    }

    fn decrypt(
        &self,
        envelope_id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, MessageError> {
        let encoded = payload
            .as_str()
            .ok_or(MessageError::DecryptFailed(envelope_id))?;
        let wire = BASE64
            .decode(encoded)
            .map_err(|_| MessageError::DecryptFailed(envelope_id))?;
        if wire.len() < 16 {
            return Err(MessageError::DecryptFailed(envelope_id));
        }
        let (iv, ciphertext) = wire.split_at(16);
        let iv: [u8; 16] = iv.try_into().map_err(|_| MessageError::DecryptFailed(envelope_id))?;

        let plaintext = Aes256CbcDec::new(&self.key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| MessageError::DecryptFailed(envelope_id))?;
        serde_json::from_slice(&plaintext).map_err(|_| MessageError::DecryptFailed(envelope_id))
    }
}

/// Where an ack for an envelope id should land.
enum AckTarget {
    Single(oneshot::Sender<bool>),
    Group(String),
}

struct Endpoint {
    sender: mpsc::UnboundedSender<MessageEnvelope>,
    last_seen: DateTime<Utc>,
    online: bool,
}

#[derive(Default)]
struct BusState {
    agents: HashMap<String, Endpoint>,
    outbound: VecDeque<MessageEnvelope>,
    acks: HashMap<Uuid, AckTarget>,
    group_acks: HashMap<String, oneshot::Sender<bool>>,
}

/// Handle to the bus background tasks; aborting stops delivery.
pub struct BusHandle {
    drain_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
}

impl BusHandle {
    pub fn stop(&self) {
        self.drain_task.abort();
        self.heartbeat_task.abort();
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The in-process message bus.
pub struct MessageBus {
    config: MessagingConfig,
    events: Arc<EventBus>,
    crypto: Option<CryptoBox>,
    state: Mutex<BusState>,
}

impl MessageBus {
    pub fn new(config: MessagingConfig, events: Arc<EventBus>) -> Self {
        let crypto = config.encryption.then(CryptoBox::new);
        Self {
            config,
            events,
            crypto,
            state: Mutex::new(BusState::default()),
        }
    }

    // ------------------------------------------------------------------
    // Registration and liveness
    // ------------------------------------------------------------------

    /// Register an agent and get its inbox.
    pub async fn register(&self, agent_id: &str) -> mpsc::UnboundedReceiver<MessageEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        state.agents.insert(
            agent_id.to_string(),
            Endpoint {
                sender: tx,
                last_seen: Utc::now(),
                online: true,
            },
        );
        rx
    }

    pub async fn unregister(&self, agent_id: &str) {
        self.state.lock().await.agents.remove(agent_id);
    }

    /// Record liveness for an agent (e.g. on heartbeat response).
    pub async fn beat(&self, agent_id: &str) {
        if let Some(endpoint) = self.state.lock().await.agents.get_mut(agent_id) {
            endpoint.last_seen = Utc::now();
            endpoint.online = true;
        }
    }

    pub async fn is_online(&self, agent_id: &str) -> bool {
        self.state
            .lock()
            .await
            .agents
            .get(agent_id)
            .is_some_and(|e| e.online)
    }

    pub async fn online_agents(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .agents
            .iter()
            .filter(|(_, e)| e.online)
            .map(|(id, _)| id.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Send paths
    // ------------------------------------------------------------------

    /// Fire-and-forget enqueue. Applies payload encryption, bounds the
    /// buffer, and drops the oldest envelope on overflow.
    pub async fn enqueue(&self, mut envelope: MessageEnvelope) -> Result<(), MessageError> {
        if let Some(crypto) = &self.crypto {
            if envelope.message_type.encrypted() && !envelope.encrypted {
                envelope.payload = crypto.encrypt(&envelope.payload)?;
                envelope.encrypted = true;
            }
        }

        let mut state = self.state.lock().await;
        if state.outbound.len() >= self.config.buffer_capacity {
            if let Some(dropped) = state.outbound.pop_front() {
                tracing::warn!(envelope_id = %dropped.id, "message buffer full, oldest dropped");
                self.events
                    .publish(HiveEvent::MessageDropped { envelope_id: dropped.id });
            }
        }
        state.outbound.push_back(envelope);
        Ok(())
    }

    /// Direct ack-required send: resolves when the recipient acks, rejects
    /// on nack or timeout.
    pub async fn send_direct(&self, envelope: MessageEnvelope) -> Result<(), MessageError> {
        let envelope_id = envelope.id;
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            if !state.agents.contains_key(&envelope.to) {
                return Err(MessageError::UnknownRecipient(envelope.to));
            }
            state.acks.insert(envelope_id, AckTarget::Single(tx));
        }
        self.enqueue(envelope).await?;

        let timeout = std::time::Duration::from_millis(self.config.ack_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(MessageError::Rejected(envelope_id)),
            Ok(Err(_)) | Err(_) => {
                self.state.lock().await.acks.remove(&envelope_id);
                Err(MessageError::Undeliverable(envelope_id))
            }
        }
    }

    /// Broadcast to every known agent; no acks.
    pub async fn broadcast(
        &self,
        from: &str,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Result<Uuid, MessageError> {
        let envelope = MessageEnvelope::broadcast(from, message_type, payload);
        let id = envelope.id;
        self.enqueue(envelope).await?;
        Ok(id)
    }

    /// Multicast to an explicit group; any single ack satisfies the send.
    pub async fn multicast(
        &self,
        from: &str,
        recipients: &[String],
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Result<(), MessageError> {
        let group_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.group_acks.insert(group_id.clone(), tx);
        }

        for recipient in recipients {
            let mut envelope =
                MessageEnvelope::direct(from, recipient, message_type, payload.clone());
            envelope.protocol = Protocol::Multicast;
            envelope.group_id = Some(group_id.clone());
            {
                let mut state = self.state.lock().await;
                state
                    .acks
                    .insert(envelope.id, AckTarget::Group(group_id.clone()));
            }
            self.enqueue(envelope).await?;
        }

        let timeout = std::time::Duration::from_millis(self.config.ack_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(true)) => Ok(()),
            _ => {
                self.state.lock().await.group_acks.remove(&group_id);
                Err(MessageError::Undeliverable(Uuid::nil()))
            }
        }
    }

    /// Seed a gossip flood.
    pub async fn gossip(
        &self,
        from: &str,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Result<Uuid, MessageError> {
        let mut envelope = MessageEnvelope::gossip(from, message_type, payload);
        if let Some(state) = envelope.gossip.as_mut() {
            state.seen.insert(from.to_string());
        }
        let id = envelope.id;
        self.enqueue(envelope).await?;
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Ack path (recipient side)
    // ------------------------------------------------------------------

    /// Acknowledge an envelope. For multicast, the first group member to ack
    /// satisfies the whole group.
    pub async fn ack(&self, envelope_id: Uuid) {
        self.resolve_ack(envelope_id, true).await;
    }

    pub async fn nack(&self, envelope_id: Uuid) {
        self.resolve_ack(envelope_id, false).await;
    }

    async fn resolve_ack(&self, envelope_id: Uuid, ok: bool) {
        let mut state = self.state.lock().await;
        match state.acks.remove(&envelope_id) {
            Some(AckTarget::Single(tx)) => {
                let _ = tx.send(ok);
            }
            Some(AckTarget::Group(group_id)) => {
                if let Some(tx) = state.group_acks.remove(&group_id) {
                    let _ = tx.send(ok);
                }
            }
            None => {}
        }
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    /// Drain one tick's worth of envelopes. Exposed for deterministic tests;
    /// the background task calls this on a timer.
    pub async fn drain_tick(&self) -> usize {
        let batch: Vec<MessageEnvelope> = {
            let mut state = self.state.lock().await;
            let n = self.config.deliveries_per_tick.min(state.outbound.len());
            state.outbound.drain(..n).collect()
        };
        let count = batch.len();
        for envelope in batch {
            // Small random delay decorrelates simultaneous fan-out.
            let jitter = rand::thread_rng().gen_range(0..=MAX_DISPATCH_JITTER_MS);
            if jitter > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(jitter)).await;
            }
            self.deliver(envelope).await;
        }
        count
    }

    async fn deliver(&self, envelope: MessageEnvelope) {
        match envelope.protocol {
            Protocol::Gossip => self.deliver_gossip(envelope).await,
            Protocol::Broadcast => self.deliver_broadcast(envelope).await,
            _ => self.deliver_to(envelope.to.clone(), envelope).await,
        }
    }

    async fn deliver_broadcast(&self, envelope: MessageEnvelope) {
        let recipients: Vec<String> = {
            let state = self.state.lock().await;
            state
                .agents
                .keys()
                .filter(|id| **id != envelope.from)
                .cloned()
                .collect()
        };
        for recipient in recipients {
            let mut copy = envelope.clone();
            copy.to = recipient.clone();
            self.deliver_to(recipient, copy).await;
        }
    }

    /// One gossip hop: forward to up to `fanout` agents that have not seen
    /// the envelope, then re-enqueue for the next hop while under the cap.
    async fn deliver_gossip(&self, envelope: MessageEnvelope) {
        let Some(gossip) = envelope.gossip.clone() else {
            self.deliver_broadcast(envelope).await;
            return;
        };
        if gossip.hops >= GOSSIP_HOP_CAP {
            return;
        }

        let unseen: Vec<String> = {
            let state = self.state.lock().await;
            let mut unseen: Vec<String> = state
                .agents
                .keys()
                .filter(|id| **id != envelope.from && !gossip.seen.contains(*id))
                .cloned()
                .collect();
            unseen.shuffle(&mut rand::thread_rng());
            unseen.truncate(self.config.gossip_fanout);
            unseen
        };
        if unseen.is_empty() {
            return;
        }

        let mut next = envelope.clone();
        if let Some(state) = next.gossip.as_mut() {
            state.hops += 1;
            for recipient in &unseen {
                state.seen.insert(recipient.clone());
            }
        }
        let hops = next.gossip.as_ref().map_or(GOSSIP_HOP_CAP, |g| g.hops);

        for recipient in unseen {
            let mut copy = next.clone();
            copy.to = recipient.clone();
            self.deliver_to(recipient, copy).await;
        }

        // Keep flooding from the recipients' vantage point.
        if hops < GOSSIP_HOP_CAP {
            let mut state = self.state.lock().await;
            if state.outbound.len() < self.config.buffer_capacity {
                state.outbound.push_back(next);
            }
        }
    }

    async fn deliver_to(&self, recipient: String, mut envelope: MessageEnvelope) {
        if envelope.encrypted {
            match self.crypto.as_ref() {
                Some(crypto) => match crypto.decrypt(envelope.id, &envelope.payload) {
                    Ok(payload) => {
                        envelope.payload = payload;
                        envelope.encrypted = false;
                    }
                    Err(e) => {
                        tracing::warn!(
                            envelope_id = %envelope.id,
                            kind = e.kind(),
                            "payload decryption failed, envelope dropped"
                        );
                        self.events
                            .publish(HiveEvent::MessageDropped { envelope_id: envelope.id });
                        return;
                    }
                },
                None => {
                    tracing::warn!(envelope_id = %envelope.id, "encrypted envelope without key, dropped");
                    self.events
                        .publish(HiveEvent::MessageDropped { envelope_id: envelope.id });
                    return;
                }
            }
        }

        let mut state = self.state.lock().await;
        match state.agents.get_mut(&recipient) {
            Some(endpoint) => {
                endpoint.last_seen = Utc::now();
                if endpoint.sender.send(envelope).is_err() {
                    endpoint.online = false;
                }
            }
            None => {
                tracing::debug!(recipient, envelope_id = %envelope.id, "recipient unknown, dropped");
                self.events
                    .publish(HiveEvent::MessageDropped { envelope_id: envelope.id });
            }
        }
    }

    /// One heartbeat round: ping every agent and mark the silent ones
    /// offline. Exposed for deterministic tests.
    pub async fn heartbeat_tick(&self) {
        let offline_after = chrono::Duration::seconds(self.config.offline_after_secs as i64);
        let now = Utc::now();
        let mut went_offline = Vec::new();
        {
            let mut state = self.state.lock().await;
            let ids: Vec<String> = state.agents.keys().cloned().collect();
            for id in ids {
                let Some(endpoint) = state.agents.get_mut(&id) else {
                    continue;
                };
                if endpoint.online && now - endpoint.last_seen > offline_after {
                    endpoint.online = false;
                    went_offline.push(id.clone());
                }
                let heartbeat = MessageEnvelope::direct(
                    "bus",
                    &id,
                    MessageType::Heartbeat,
                    serde_json::json!({ "at": now.timestamp_millis() }),
                );
                let _ = endpoint.sender.send(heartbeat);
            }
        }
        for agent_id in went_offline {
            tracing::warn!(agent_id, "agent heartbeat silence, marked offline");
            self.events.publish(HiveEvent::WorkerOffline { agent_id });
        }
    }

    /// Start the drain and heartbeat background tasks.
    pub fn start(self: Arc<Self>) -> BusHandle {
        let bus = Arc::clone(&self);
        let drain_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                bus.drain_tick().await;
            }
        });

        let heartbeat_interval =
            std::time::Duration::from_secs(self.config.heartbeat_interval_secs);
        let bus = self;
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                bus.heartbeat_tick().await;
            }
        });

        BusHandle {
            drain_task,
            heartbeat_task,
        }
    }

    /// Buffered envelope count (diagnostics).
    pub async fn backlog(&self) -> usize {
        self.state.lock().await.outbound.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> MessagingConfig {
        MessagingConfig {
            ack_timeout_ms: 200,
            ..MessagingConfig::default()
        }
    }

    fn bus_with(config: MessagingConfig) -> Arc<MessageBus> {
        Arc::new(MessageBus::new(config, Arc::new(EventBus::default())))
    }

    #[tokio::test]
    async fn test_direct_send_resolves_on_ack() {
        let bus = bus_with(test_config());
        let mut inbox = bus.register("worker-1").await;

        let envelope =
            MessageEnvelope::direct("queen", "worker-1", MessageType::Command, json!({"op": 1}));
        let envelope_id = envelope.id;

        let bus_clone = Arc::clone(&bus);
        let recipient = tokio::spawn(async move {
            let received = inbox.recv().await.unwrap();
            assert_eq!(received.id, envelope_id);
            bus_clone.ack(received.id).await;
        });

        let bus_clone = Arc::clone(&bus);
        let drainer = tokio::spawn(async move {
            for _ in 0..10 {
                bus_clone.drain_tick().await;
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        });

        bus.send_direct(envelope).await.expect("ack should arrive");
        recipient.await.unwrap();
        drainer.abort();
    }

    #[tokio::test]
    async fn test_direct_send_times_out_without_ack() {
        let bus = bus_with(test_config());
        let _inbox = bus.register("worker-1").await;

        let envelope =
            MessageEnvelope::direct("queen", "worker-1", MessageType::Command, json!({}));
        let id = envelope.id;

        // Nobody drains, nobody acks.
        let err = bus.send_direct(envelope).await.unwrap_err();
        assert_eq!(err, MessageError::Undeliverable(id));
    }

    #[tokio::test]
    async fn test_direct_send_rejects_on_nack() {
        let bus = bus_with(test_config());
        let mut inbox = bus.register("worker-1").await;

        let envelope =
            MessageEnvelope::direct("queen", "worker-1", MessageType::Command, json!({}));

        let bus_clone = Arc::clone(&bus);
        tokio::spawn(async move {
            let received = inbox.recv().await.unwrap();
            bus_clone.nack(received.id).await;
        });
        let bus_clone = Arc::clone(&bus);
        tokio::spawn(async move {
            for _ in 0..10 {
                bus_clone.drain_tick().await;
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        });

        let err = bus.send_direct(envelope).await.unwrap_err();
        assert!(matches!(err, MessageError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_unknown_recipient_rejected_immediately() {
        let bus = bus_with(test_config());
        let envelope = MessageEnvelope::direct("queen", "ghost", MessageType::Command, json!({}));
        let err = bus.send_direct(envelope).await.unwrap_err();
        assert!(matches!(err, MessageError::UnknownRecipient(_)));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone_but_sender() {
        let bus = bus_with(test_config());
        let mut a = bus.register("a").await;
        let mut b = bus.register("b").await;
        let mut c = bus.register("c").await;

        bus.broadcast("a", MessageType::Sync, json!({"v": 1})).await.unwrap();
        bus.drain_tick().await;

        assert!(b.try_recv().is_ok());
        assert!(c.try_recv().is_ok());
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_buffer_overflow_drops_oldest_with_event() {
        let config = MessagingConfig {
            buffer_capacity: 3,
            ..test_config()
        };
        let events = Arc::new(EventBus::default());
        let bus = Arc::new(MessageBus::new(config, Arc::clone(&events)));
        let mut event_rx = events.subscribe();

        let first = MessageEnvelope::direct("a", "b", MessageType::Sync, json!(0));
        let first_id = first.id;
        bus.enqueue(first).await.unwrap();
        for i in 1..=3 {
            bus.enqueue(MessageEnvelope::direct("a", "b", MessageType::Sync, json!(i)))
                .await
                .unwrap();
        }

        assert_eq!(bus.backlog().await, 3);
        let event = event_rx.recv().await.unwrap();
        assert_eq!(
            event.event,
            HiveEvent::MessageDropped { envelope_id: first_id }
        );
    }

    #[tokio::test]
    async fn test_drain_delivers_at_most_per_tick() {
        let config = MessagingConfig {
            deliveries_per_tick: 2,
            ..test_config()
        };
        let bus = bus_with(config);
        let _inbox = bus.register("b").await;

        for i in 0..5 {
            bus.enqueue(MessageEnvelope::direct("a", "b", MessageType::Sync, json!(i)))
                .await
                .unwrap();
        }
        assert_eq!(bus.drain_tick().await, 2);
        assert_eq!(bus.drain_tick().await, 2);
        assert_eq!(bus.drain_tick().await, 1);
    }

    #[tokio::test]
    async fn test_multicast_any_ack_satisfies() {
        let bus = bus_with(test_config());
        let mut a = bus.register("a").await;
        let _b = bus.register("b").await;

        let bus_clone = Arc::clone(&bus);
        tokio::spawn(async move {
            let received = a.recv().await.unwrap();
            assert_eq!(received.protocol, Protocol::Multicast);
            assert!(received.group_id.is_some());
            bus_clone.ack(received.id).await;
        });
        let bus_clone = Arc::clone(&bus);
        tokio::spawn(async move {
            for _ in 0..10 {
                bus_clone.drain_tick().await;
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        });

        bus.multicast(
            "queen",
            &["a".to_string(), "b".to_string()],
            MessageType::Command,
            json!({}),
        )
        .await
        .expect("one ack suffices");
    }

    #[tokio::test]
    async fn test_gossip_floods_with_hop_cap() {
        let bus = bus_with(test_config());
        let mut inboxes = Vec::new();
        for i in 0..6 {
            inboxes.push((format!("agent-{i}"), bus.register(&format!("agent-{i}")).await));
        }

        bus.gossip("agent-0", MessageType::Broadcast, json!({"news": true}))
            .await
            .unwrap();
        for _ in 0..5 {
            bus.drain_tick().await;
        }

        let mut reached = 0;
        for (id, inbox) in &mut inboxes {
            if id == "agent-0" {
                continue;
            }
            if let Ok(envelope) = inbox.try_recv() {
                let gossip = envelope.gossip.unwrap();
                assert!(gossip.hops <= GOSSIP_HOP_CAP);
                reached += 1;
            }
        }
        // First hop alone reaches fanout agents.
        assert!(reached >= 3);
    }

    #[tokio::test]
    async fn test_heartbeat_marks_silent_agents_offline() {
        let config = MessagingConfig {
            offline_after_secs: 0,
            ..test_config()
        };
        let events = Arc::new(EventBus::default());
        let bus = Arc::new(MessageBus::new(config, Arc::clone(&events)));
        let _inbox = bus.register("sleepy").await;

        assert!(bus.is_online("sleepy").await);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        bus.heartbeat_tick().await;
        assert!(!bus.is_online("sleepy").await);

        // A later beat brings it back.
        bus.beat("sleepy").await;
        assert!(bus.is_online("sleepy").await);
    }

    #[tokio::test]
    async fn test_encryption_round_trip_is_transparent() {
        let config = MessagingConfig {
            encryption: true,
            ..test_config()
        };
        let bus = bus_with(config);
        let mut inbox = bus.register("b").await;

        let payload = json!({"secret": "melange"});
        let envelope = MessageEnvelope::direct("a", "b", MessageType::Task, payload.clone());
        bus.enqueue(envelope).await.unwrap();

        // Encrypted on the wire.
        assert!(bus.state.lock().await.outbound[0].encrypted);

        bus.drain_tick().await;
        let received = inbox.try_recv().unwrap();
        assert!(!received.encrypted);
        assert_eq!(received.payload, payload);
    }

    #[tokio::test]
    async fn test_unencrypted_types_stay_plain() {
        let config = MessagingConfig {
            encryption: true,
            ..test_config()
        };
        let bus = bus_with(config);
        let _inbox = bus.register("b").await;

        bus.enqueue(MessageEnvelope::direct("a", "b", MessageType::Heartbeat, json!({})))
            .await
            .unwrap();
        assert!(!bus.state.lock().await.outbound[0].encrypted);
    }

    #[tokio::test]
    async fn test_corrupt_ciphertext_drops_envelope() {
        let config = MessagingConfig {
            encryption: true,
            ..test_config()
        };
        let events = Arc::new(EventBus::default());
        let bus = Arc::new(MessageBus::new(config, Arc::clone(&events)));
        let mut inbox = bus.register("b").await;
        let mut event_rx = events.subscribe();

        let mut envelope = MessageEnvelope::direct("a", "b", MessageType::Task, json!({}));
        envelope.encrypted = true;
        envelope.payload = serde_json::Value::String("not-base64!!".to_string());
        bus.enqueue(envelope).await.unwrap();
        bus.drain_tick().await;

        assert!(inbox.try_recv().is_err());
        let event = event_rx.recv().await.unwrap();
        assert!(matches!(event.event, HiveEvent::MessageDropped { .. }));
    }

    #[test]
    fn test_cryptobox_round_trip_and_iv_freshness() {
        let crypto = CryptoBox::new();
        let payload = json!({"k": [1, 2, 3]});
        let a = crypto.encrypt(&payload).unwrap();
        let b = crypto.encrypt(&payload).unwrap();
        // Fresh IV per message: same plaintext, different wire form.
        assert_ne!(a, b);
        assert_eq!(crypto.decrypt(Uuid::new_v4(), &a).unwrap(), payload);
        assert_eq!(crypto.decrypt(Uuid::new_v4(), &b).unwrap(), payload);
    }

    #[test]
    fn test_decrypt_rejects_garbage() {
        let crypto = CryptoBox::new();
        let err = crypto
            .decrypt(Uuid::nil(), &serde_json::Value::String("AAAA".into()))
            .unwrap_err();
        assert!(matches!(err, MessageError::DecryptFailed(_)));
    }
}
