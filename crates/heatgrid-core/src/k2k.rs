//! Worker-to-worker halo messaging.
//!
//! Every worker registers an endpoint with a shared [`HaloBroker`] and gets a bounded inbox.
//! Sends never block: the edge values are copied into a message and posted into the
//! destination's inbox, and the sender keeps a [`SendRequest`] that completes once the destination
//! has consumed the data. Receives are posted for an iteration with
//! [`HaloEndpoint::post_receives`] and only waited on right before the boundary pass, so the
//! interior pass overlaps the transfers.
//!
//! Messages are FIFO per sender but interleave across senders. A neighbor can run at most one
//! iteration ahead, so anything tagged with a later iteration is stashed until it is asked for;
//! anything tagged with an earlier one is a protocol error.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::error::{HeatGridError, Result};
use crate::halo::{Direction, HaloSet};
use crate::request::{CommRequest, RequestStatus};

/// Rank of a worker in the decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Configuration for halo messaging.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Inbox capacity per worker.
    pub max_pending_messages: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_pending_messages: 16,
        }
    }
}

/// One halo row or column in flight.
#[derive(Debug)]
pub struct HaloMessage {
    /// Sending worker.
    pub source: WorkerId,
    /// Slot the receiver stores the data in.
    pub direction: Direction,
    /// Iteration the data belongs to.
    pub iteration: u64,
    /// Edge values.
    pub data: Vec<f32>,
    ack: Option<oneshot::Sender<()>>,
}

impl HaloMessage {
    /// Tell the sender its data was consumed.
    fn acknowledge(&mut self) {
        if let Some(ack) = self.ack.take() {
            // The sender may already have dropped its request.
            let _ = ack.send(());
        }
    }
}

/// Status of message delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Message placed in the destination inbox.
    Delivered,
    /// Destination worker not registered or inbox closed.
    NotFound,
    /// Destination inbox full.
    QueueFull,
}

/// Messaging statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Number of registered endpoints.
    pub registered_endpoints: usize,
    /// Total messages delivered.
    pub messages_delivered: u64,
    /// Total messages rejected.
    pub messages_failed: u64,
}

/// Routes halo messages between registered workers.
pub struct HaloBroker {
    config: BrokerConfig,
    endpoints: RwLock<HashMap<WorkerId, mpsc::Sender<HaloMessage>>>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl fmt::Debug for HaloBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HaloBroker")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl HaloBroker {
    /// Create a new broker. Inboxes hold at least one message.
    pub fn new(mut config: BrokerConfig) -> Arc<Self> {
        config.max_pending_messages = config.max_pending_messages.max(1);
        Arc::new(Self {
            config,
            endpoints: RwLock::new(HashMap::new()),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    /// Register a worker and hand back its endpoint.
    pub fn register(self: &Arc<Self>, worker: WorkerId) -> HaloEndpoint {
        let (sender, receiver) = mpsc::channel(self.config.max_pending_messages);
        self.endpoints.write().insert(worker, sender);

        HaloEndpoint {
            worker,
            receiver,
            broker: Arc::clone(self),
            stash: BTreeMap::new(),
        }
    }

    /// Unregister a worker. Its inbox closes once drained.
    pub fn unregister(&self, worker: WorkerId) {
        self.endpoints.write().remove(&worker);
    }

    /// Check if a worker is registered.
    pub fn is_registered(&self, worker: WorkerId) -> bool {
        self.endpoints.read().contains_key(&worker)
    }

    /// Drop every registration so blocked receivers observe a closed inbox.
    pub fn close(&self) {
        let dropped = {
            let mut endpoints = self.endpoints.write();
            let count = endpoints.len();
            endpoints.clear();
            count
        };
        if dropped > 0 {
            warn!("Halo broker closed with {} endpoint(s) registered", dropped);
        }
    }

    fn deliver(&self, destination: WorkerId, message: HaloMessage) -> DeliveryStatus {
        let endpoints = self.endpoints.read();
        let status = match endpoints.get(&destination) {
            Some(sender) => match sender.try_send(message) {
                Ok(()) => DeliveryStatus::Delivered,
                Err(mpsc::error::TrySendError::Full(_)) => DeliveryStatus::QueueFull,
                Err(mpsc::error::TrySendError::Closed(_)) => DeliveryStatus::NotFound,
            },
            None => DeliveryStatus::NotFound,
        };

        match status {
            DeliveryStatus::Delivered => self.delivered.fetch_add(1, Ordering::Relaxed),
            _ => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        status
    }

    /// Get statistics.
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            registered_endpoints: self.endpoints.read().len(),
            messages_delivered: self.delivered.load(Ordering::Relaxed),
            messages_failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Builder for [`HaloBroker`].
#[derive(Debug, Default)]
pub struct HaloBrokerBuilder {
    config: BrokerConfig,
}

impl HaloBrokerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inbox capacity per worker.
    pub fn max_pending_messages(mut self, count: usize) -> Self {
        self.config.max_pending_messages = count.max(1);
        self
    }

    /// Build the broker.
    pub fn build(self) -> Arc<HaloBroker> {
        HaloBroker::new(self.config)
    }
}

/// Completion handle for a posted send.
#[derive(Debug)]
pub struct SendRequest {
    destination: WorkerId,
    direction: Direction,
    iteration: u64,
    ack: Option<oneshot::Receiver<()>>,
    status: Option<RequestStatus>,
}

impl SendRequest {
    /// Destination worker.
    pub fn destination(&self) -> WorkerId {
        self.destination
    }

    /// Slot the data lands in at the destination.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Iteration the data belongs to.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    fn settle(&mut self, status: RequestStatus) -> RequestStatus {
        if status == RequestStatus::Cancelled {
            warn!(
                "Halo send to {} ({:?}, iteration {}) dropped before it was consumed",
                self.destination, self.direction, self.iteration
            );
        }
        self.ack = None;
        self.status = Some(status);
        status
    }

    /// Wait for completion from async code.
    pub async fn completion(mut self) -> RequestStatus {
        if let Some(status) = self.status {
            return status;
        }
        let status = match self.ack.take() {
            Some(ack) => match ack.await {
                Ok(()) => RequestStatus::Completed,
                Err(_) => RequestStatus::Cancelled,
            },
            None => RequestStatus::Completed,
        };
        self.settle(status)
    }
}

impl CommRequest for SendRequest {
    /// Blocks the calling thread; must not be called from within an async runtime.
    fn wait(&mut self) -> RequestStatus {
        if let Some(status) = self.status {
            return status;
        }
        let status = match self.ack.take() {
            Some(ack) => match ack.blocking_recv() {
                Ok(()) => RequestStatus::Completed,
                Err(_) => RequestStatus::Cancelled,
            },
            None => RequestStatus::Completed,
        };
        self.settle(status)
    }

    fn test(&mut self) -> Option<RequestStatus> {
        if let Some(status) = self.status {
            return Some(status);
        }
        let ack = self.ack.as_mut()?;
        match ack.try_recv() {
            Ok(()) => Some(self.settle(RequestStatus::Completed)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(self.settle(RequestStatus::Cancelled)),
        }
    }
}

/// Receives posted for one iteration, not yet waited on.
#[derive(Debug)]
#[must_use = "posted receives must be waited on before the boundary pass"]
pub struct PendingHalos {
    iteration: u64,
    expected: Vec<Direction>,
}

impl PendingHalos {
    /// Iteration the receives were posted for.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Directions that will be filled.
    pub fn expected(&self) -> &[Direction] {
        &self.expected
    }

    /// Block until every expected direction arrived and store it in `halo`.
    ///
    /// `halo` must already be opened for the same iteration.
    pub fn wait_into(self, endpoint: &mut HaloEndpoint, halo: &mut HaloSet) -> Result<()> {
        endpoint.complete_receives(self, halo)
    }
}

/// A worker's view of the broker.
pub struct HaloEndpoint {
    worker: WorkerId,
    receiver: mpsc::Receiver<HaloMessage>,
    broker: Arc<HaloBroker>,
    stash: BTreeMap<(u64, Direction), HaloMessage>,
}

impl fmt::Debug for HaloEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HaloEndpoint")
            .field("worker", &self.worker)
            .field("stashed", &self.stash.len())
            .finish()
    }
}

impl HaloEndpoint {
    /// Worker this endpoint belongs to.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Number of early messages held for later iterations.
    pub fn stashed(&self) -> usize {
        self.stash.len()
    }

    /// Post `data` to `destination`'s `direction` slot for `iteration`. Never blocks.
    pub fn post_send(
        &self,
        destination: WorkerId,
        direction: Direction,
        iteration: u64,
        data: Vec<f32>,
    ) -> Result<SendRequest> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let message = HaloMessage {
            source: self.worker,
            direction,
            iteration,
            data,
            ack: Some(ack_tx),
        };

        match self.broker.deliver(destination, message) {
            DeliveryStatus::Delivered => {
                trace!(
                    "{} -> {}: {:?} halo for iteration {}",
                    self.worker,
                    destination,
                    direction,
                    iteration
                );
                Ok(SendRequest {
                    destination,
                    direction,
                    iteration,
                    ack: Some(ack_rx),
                    status: None,
                })
            }
            status => Err(HeatGridError::Delivery {
                from: self.worker,
                to: destination,
                status,
            }),
        }
    }

    /// Post receives for `directions` of `iteration`.
    pub fn post_receives(
        &self,
        iteration: u64,
        directions: impl IntoIterator<Item = Direction>,
    ) -> PendingHalos {
        let mut expected: Vec<Direction> = directions.into_iter().collect();
        expected.sort();
        expected.dedup();
        PendingHalos {
            iteration,
            expected,
        }
    }

    /// Take the next message without blocking, ignoring the stash.
    pub fn try_receive(&mut self) -> Option<HaloMessage> {
        self.receiver.try_recv().ok()
    }

    fn complete_receives(&mut self, pending: PendingHalos, halo: &mut HaloSet) -> Result<()> {
        let iteration = pending.iteration;
        if halo.iteration() != iteration {
            return Err(HeatGridError::transport(format!(
                "{}: halo set opened for iteration {}, receives posted for {}",
                self.worker,
                halo.iteration(),
                iteration
            )));
        }

        let mut remaining = Vec::with_capacity(pending.expected.len());
        for direction in pending.expected {
            match self.stash.remove(&(iteration, direction)) {
                Some(message) => Self::accept(message, halo)?,
                None => remaining.push(direction),
            }
        }

        while !remaining.is_empty() {
            let message = self.receiver.blocking_recv().ok_or_else(|| {
                HeatGridError::transport(format!(
                    "{}: inbox closed while waiting for {:?} (iteration {})",
                    self.worker, remaining, iteration
                ))
            })?;

            if message.iteration > iteration {
                let key = (message.iteration, message.direction);
                if self.stash.contains_key(&key) {
                    return Err(HeatGridError::transport(format!(
                        "{}: duplicate {:?} halo from {} for iteration {}",
                        self.worker, message.direction, message.source, message.iteration
                    )));
                }
                self.stash.insert(key, message);
                continue;
            }

            if message.iteration < iteration {
                return Err(HeatGridError::StaleHalo {
                    direction: message.direction,
                    expected: iteration,
                    actual: message.iteration,
                });
            }

            let Some(pos) = remaining.iter().position(|d| *d == message.direction) else {
                return Err(HeatGridError::transport(format!(
                    "{}: unexpected {:?} halo from {} for iteration {}",
                    self.worker, message.direction, message.source, iteration
                )));
            };
            remaining.swap_remove(pos);
            Self::accept(message, halo)?;
        }

        Ok(())
    }

    fn accept(mut message: HaloMessage, halo: &mut HaloSet) -> Result<()> {
        let data = std::mem::take(&mut message.data);
        halo.set(message.direction, message.iteration, data)?;
        message.acknowledge();
        Ok(())
    }
}

impl Drop for HaloEndpoint {
    fn drop(&mut self) {
        self.broker.unregister(self.worker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Arc<HaloBroker>, HaloEndpoint, HaloEndpoint) {
        let broker = HaloBrokerBuilder::new().max_pending_messages(8).build();
        let a = broker.register(WorkerId(0));
        let b = broker.register(WorkerId(1));
        (broker, a, b)
    }

    #[test]
    fn test_registration() {
        let (broker, a, _b) = pair();
        assert!(broker.is_registered(WorkerId(0)));
        assert!(broker.is_registered(WorkerId(1)));
        assert_eq!(broker.stats().registered_endpoints, 2);

        drop(a);
        assert!(!broker.is_registered(WorkerId(0)));
    }

    #[test]
    fn test_send_completes_after_consumption() {
        let (broker, a, mut b) = pair();

        let mut request = a
            .post_send(WorkerId(1), Direction::Up, 0, vec![1.0, 2.0])
            .unwrap();
        assert_eq!(request.test(), None);

        let mut halo = HaloSet::new(2);
        let pending = b.post_receives(0, [Direction::Up]);
        pending.wait_into(&mut b, &mut halo).unwrap();

        assert_eq!(halo.get(Direction::Up), Some(&[1.0, 2.0][..]));
        assert_eq!(request.test(), Some(RequestStatus::Completed));
        assert_eq!(request.wait(), RequestStatus::Completed);
        assert_eq!(broker.stats().messages_delivered, 1);
    }

    #[test]
    fn test_send_to_unknown_worker_fails() {
        let (broker, a, _b) = pair();
        let err = a
            .post_send(WorkerId(9), Direction::Left, 0, vec![0.0])
            .unwrap_err();
        assert!(matches!(
            err,
            HeatGridError::Delivery {
                status: DeliveryStatus::NotFound,
                ..
            }
        ));
        assert_eq!(broker.stats().messages_failed, 1);
    }

    #[test]
    fn test_queue_full_reported() {
        let broker = HaloBrokerBuilder::new().max_pending_messages(1).build();
        let a = broker.register(WorkerId(0));
        let _b = broker.register(WorkerId(1));

        let _first = a.post_send(WorkerId(1), Direction::Up, 0, vec![0.0]).unwrap();
        let err = a
            .post_send(WorkerId(1), Direction::Down, 0, vec![0.0])
            .unwrap_err();
        assert!(matches!(
            err,
            HeatGridError::Delivery {
                status: DeliveryStatus::QueueFull,
                ..
            }
        ));
    }

    #[test]
    fn test_dropped_receiver_cancels_send() {
        let (_broker, a, b) = pair();
        let mut request = a
            .post_send(WorkerId(1), Direction::Right, 0, vec![3.0])
            .unwrap();
        drop(b);
        assert_eq!(request.wait(), RequestStatus::Cancelled);
    }

    #[test]
    fn test_future_iteration_is_stashed() {
        let (_broker, a, mut b) = pair();

        let _late = a.post_send(WorkerId(1), Direction::Up, 1, vec![9.0]).unwrap();
        let _now = a.post_send(WorkerId(1), Direction::Up, 0, vec![4.0]).unwrap();

        let mut halo = HaloSet::new(1);
        b.post_receives(0, [Direction::Up])
            .wait_into(&mut b, &mut halo)
            .unwrap();
        assert_eq!(halo.get(Direction::Up), Some(&[4.0][..]));
        assert_eq!(b.stashed(), 1);

        halo.begin(1);
        b.post_receives(1, [Direction::Up])
            .wait_into(&mut b, &mut halo)
            .unwrap();
        assert_eq!(halo.get(Direction::Up), Some(&[9.0][..]));
        assert_eq!(b.stashed(), 0);
    }

    #[test]
    fn test_old_iteration_rejected() {
        let (_broker, a, mut b) = pair();
        let _old = a.post_send(WorkerId(1), Direction::Down, 2, vec![0.0]).unwrap();

        let mut halo = HaloSet::new(1);
        halo.begin(3);
        let err = b
            .post_receives(3, [Direction::Down])
            .wait_into(&mut b, &mut halo)
            .unwrap_err();
        assert!(matches!(
            err,
            HeatGridError::StaleHalo {
                expected: 3,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_mismatched_iteration_rejected_before_blocking() {
        let (_broker, _a, mut b) = pair();
        let mut halo = HaloSet::new(1);
        let err = b
            .post_receives(4, [Direction::Left])
            .wait_into(&mut b, &mut halo)
            .unwrap_err();
        assert!(matches!(err, HeatGridError::Transport(_)));
    }

    #[test]
    fn test_closed_broker_unblocks_receiver() {
        let (broker, _a, mut b) = pair();
        broker.close();

        let mut halo = HaloSet::new(1);
        let err = b
            .post_receives(0, [Direction::Up])
            .wait_into(&mut b, &mut halo)
            .unwrap_err();
        assert!(matches!(err, HeatGridError::Transport(_)));
    }

    #[tokio::test]
    async fn test_async_completion() {
        let (_broker, a, mut b) = pair();
        let request = a.post_send(WorkerId(1), Direction::Up, 0, vec![1.0]).unwrap();

        let mut message = b.try_receive().unwrap();
        assert_eq!(message.source, WorkerId(0));
        message.acknowledge();

        assert_eq!(request.completion().await, RequestStatus::Completed);
    }

    #[test]
    fn test_zero_capacity_config_clamped() {
        let broker = HaloBroker::new(BrokerConfig {
            max_pending_messages: 0,
        });
        let a = broker.register(WorkerId(0));
        let mut b = broker.register(WorkerId(1));

        let mut request = a.post_send(WorkerId(1), Direction::Up, 0, vec![4.0]).unwrap();
        let mut halo = HaloSet::new(1);
        halo.begin(0);
        b.post_receives(0, [Direction::Up])
            .wait_into(&mut b, &mut halo)
            .unwrap();

        assert_eq!(halo.get(Direction::Up), Some(&[4.0][..]));
        assert_eq!(request.wait(), RequestStatus::Completed);
    }
}
