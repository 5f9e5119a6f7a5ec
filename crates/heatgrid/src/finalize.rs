//! Worker teardown.
//!
//! A [`FinalizeHandle`] owns a worker's field together with its last outstanding communication
//! request. Teardown always runs in the same order: wait on the request, release the field through
//! its storage, drop the request. The wait has no timeout. Dropping an unconsumed handle performs
//! the same sequence, so early returns and panics cannot free a buffer the transport may still
//! be reading.

use tracing::debug;

use heatgrid_core::request::{CommRequest, RequestStatus};

use crate::storage::{Field, GridStorage, HeapStorage};

/// A worker's field and outstanding request, released together exactly once.
pub struct FinalizeHandle<R: CommRequest, S: GridStorage = HeapStorage> {
    field: Option<Field>,
    request: Option<R>,
    storage: S,
}

impl<R: CommRequest> FinalizeHandle<R, HeapStorage> {
    /// Bundle a heap-allocated field with its outstanding request.
    pub fn new(field: Field, request: R) -> Self {
        Self::with_storage(field, request, HeapStorage)
    }
}

impl<R: CommRequest, S: GridStorage> FinalizeHandle<R, S> {
    /// Bundle a field allocated from `storage` with its outstanding request.
    pub fn with_storage(field: Field, request: R, storage: S) -> Self {
        Self {
            field: Some(field),
            request: Some(request),
            storage,
        }
    }

    /// The field still owned by the handle.
    pub fn field(&self) -> Option<&Field> {
        self.field.as_ref()
    }

    /// Wait on the request, release the field, drop the request.
    pub fn finalize(mut self) -> RequestStatus {
        self.teardown()
    }

    fn teardown(&mut self) -> RequestStatus {
        let status = match self.request.as_mut() {
            Some(request) => request.wait(),
            None => RequestStatus::Completed,
        };
        if let Some(field) = self.field.take() {
            self.storage.release(field);
        }
        self.request = None;
        status
    }
}

impl<R: CommRequest, S: GridStorage> Drop for FinalizeHandle<R, S> {
    fn drop(&mut self) {
        if self.field.is_some() || self.request.is_some() {
            debug!("FinalizeHandle dropped without finalize; tearing down");
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heatgrid_core::error::Result;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        WaitStarted,
        WaitDone,
        Released,
        RequestDropped,
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    struct StubRequest {
        log: Log,
        outcome: RequestStatus,
    }

    impl CommRequest for StubRequest {
        fn wait(&mut self) -> RequestStatus {
            self.log.lock().push(Event::WaitStarted);
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.log.lock().push(Event::WaitDone);
            self.outcome
        }

        fn test(&mut self) -> Option<RequestStatus> {
            None
        }
    }

    impl Drop for StubRequest {
        fn drop(&mut self) {
            self.log.lock().push(Event::RequestDropped);
        }
    }

    struct RecordingStorage {
        log: Log,
    }

    impl GridStorage for RecordingStorage {
        fn allocate(&self, size: usize) -> Result<Field> {
            Field::zeroed(size)
        }

        fn release(&self, field: Field) {
            self.log.lock().push(Event::Released);
            drop(field);
        }
    }

    fn handle(log: &Log, outcome: RequestStatus) -> FinalizeHandle<StubRequest, RecordingStorage> {
        let storage = RecordingStorage { log: log.clone() };
        let field = storage.allocate(4).unwrap();
        let request = StubRequest {
            log: log.clone(),
            outcome,
        };
        FinalizeHandle::with_storage(field, request, storage)
    }

    const ORDER: [Event; 4] = [
        Event::WaitStarted,
        Event::WaitDone,
        Event::Released,
        Event::RequestDropped,
    ];

    #[test]
    fn test_wait_happens_before_release() {
        let log: Log = Arc::default();
        let status = handle(&log, RequestStatus::Completed).finalize();

        assert_eq!(status, RequestStatus::Completed);
        assert_eq!(*log.lock(), ORDER);
    }

    #[test]
    fn test_drop_tears_down_in_same_order() {
        let log: Log = Arc::default();
        {
            let h = handle(&log, RequestStatus::Completed);
            assert!(h.field().is_some());
        }
        assert_eq!(*log.lock(), ORDER);
    }

    #[test]
    fn test_cancelled_request_still_releases() {
        let log: Log = Arc::default();
        let status = handle(&log, RequestStatus::Cancelled).finalize();

        assert_eq!(status, RequestStatus::Cancelled);
        assert_eq!(*log.lock(), ORDER);
    }

    #[test]
    fn test_teardown_runs_once() {
        let log: Log = Arc::default();
        let h = handle(&log, RequestStatus::Completed);
        h.finalize();
        // finalize consumed the handle; its Drop must not release again
        assert_eq!(
            log.lock().iter().filter(|e| **e == Event::Released).count(),
            1
        );
    }

    #[test]
    fn test_heap_handle_with_real_send_request() {
        use heatgrid_core::halo::Direction;
        use heatgrid_core::k2k::{HaloBrokerBuilder, WorkerId};

        let broker = HaloBrokerBuilder::new().build();
        let a = broker.register(WorkerId(0));
        let mut b = broker.register(WorkerId(1));

        let request = a.post_send(WorkerId(1), Direction::Up, 0, vec![1.0]).unwrap();
        let handle = FinalizeHandle::new(Field::zeroed(1).unwrap(), request);

        let consumer = std::thread::spawn(move || {
            let mut halo = heatgrid_core::halo::HaloSet::new(1);
            b.post_receives(0, [Direction::Up])
                .wait_into(&mut b, &mut halo)
                .unwrap();
        });

        assert_eq!(handle.finalize(), RequestStatus::Completed);
        consumer.join().unwrap();
    }
}
