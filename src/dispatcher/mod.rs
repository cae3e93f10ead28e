//! Bounded request dispatcher.
//!
//! Admits unauthenticated requests against a fixed capacity of
//! [`MAX_CONCURRENT_REQUESTS`] and tracks each admitted request until its
//! transport reports completion.
//!
//! # Architecture
//!
//! ```text
//!   caller ── enqueue(factory) ──► RequestDispatcher ── send(req, slot) ──► RequestTransport
//!     ▲                                  │                                      │
//!     │                                  │ Mutex<SlotTable>                     │ background task
//!     │                                  ▼                                      ▼
//!     └── CapacityAvailable ◄── ObserverRegistry ◄── release ◄── CompletionSlot dropped
//! ```
//!
//! Every admitted request gets a [`CompletionSlot`]. The transport holds
//! it while the request is running and drops (or [`CompletionSlot::complete`]s)
//! it when the request finishes, fails or is abandoned. The slot is released
//! exactly once because it can only be dropped once.
//!
//! Capacity checks and slot bookkeeping share one mutex, held only for the
//! O(1) table update. The request factory and the transport both run
//! outside the lock, so a completion arriving on a transport task never
//! waits on caller code.

// Rust guideline compliant 2026-02

mod http;
mod request;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use uuid::Uuid;

use crate::constants::MAX_CONCURRENT_REQUESTS;
use crate::error::TransportError;
use crate::observers::{ObserverRegistry, Subscription};

pub use http::ReqwestTransport;
pub use request::{ResponseHandler, TransportRequest, TransportResponse};

/// Something that can run admitted requests.
pub trait RequestTransport: Send + Sync + fmt::Debug {
    /// Start `request`. The transport keeps `slot` until the request has
    /// finished and must not block the caller.
    fn send(&self, request: TransportRequest, slot: CompletionSlot);
}

/// Result of [`RequestDispatcher::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// The request was admitted and handed to the transport.
    Success,
    /// The factory produced no request; no capacity was used.
    NilRequest,
    /// All slots are busy; the transport was not invoked.
    CapacityExceeded,
}

impl EnqueueResult {
    /// Map the refusals onto [`TransportError`].
    pub fn into_result(self) -> Result<(), TransportError> {
        match self {
            Self::Success => Ok(()),
            Self::NilRequest => Err(TransportError::InvalidRequest),
            Self::CapacityExceeded => Err(TransportError::AdmissionRejected),
        }
    }
}

/// Identifier of an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Bookkeeping record for one admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightRequest {
    /// Request identifier.
    pub id: RequestId,
    /// When the dispatcher admitted the request.
    pub submitted_at: Instant,
}

/// Events published by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherEvent {
    /// A completion moved the dispatcher from full to not full.
    CapacityAvailable,
}

#[derive(Debug)]
struct SlotTable {
    capacity: usize,
    in_flight: HashMap<RequestId, InFlightRequest>,
}

#[derive(Debug)]
struct Shared {
    table: Mutex<SlotTable>,
    events: Arc<ObserverRegistry<DispatcherEvent>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SlotTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, id: RequestId) {
        let reopened = {
            let mut table = self.lock();
            let was_full = table.in_flight.len() >= table.capacity;
            if table.in_flight.remove(&id).is_none() {
                log::warn!("[Dispatcher] Released unknown request {id}");
                return;
            }
            log::debug!(
                "[Dispatcher] Request {id} finished ({}/{} in flight)",
                table.in_flight.len(),
                table.capacity
            );
            was_full && table.in_flight.len() < table.capacity
        };

        if reopened {
            self.events.broadcast(&DispatcherEvent::CapacityAvailable);
        }
    }
}

/// Proof of admission, held by the transport while a request runs.
///
/// Dropping the slot releases the capacity it reserved.
pub struct CompletionSlot {
    request: InFlightRequest,
    shared: Arc<Shared>,
}

impl fmt::Debug for CompletionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSlot")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

impl CompletionSlot {
    /// The admitted request this slot belongs to.
    pub fn request(&self) -> &InFlightRequest {
        &self.request
    }

    /// Release the slot now.
    pub fn complete(self) {
        drop(self);
    }
}

impl Drop for CompletionSlot {
    fn drop(&mut self) {
        self.shared.release(self.request.id);
    }
}

/// Admission control in front of a [`RequestTransport`].
#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    shared: Arc<Shared>,
    transport: Arc<dyn RequestTransport>,
}

impl RequestDispatcher {
    /// Dispatcher with the standard capacity of [`MAX_CONCURRENT_REQUESTS`].
    pub fn new(transport: Arc<dyn RequestTransport>) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(SlotTable {
                    capacity: MAX_CONCURRENT_REQUESTS,
                    in_flight: HashMap::with_capacity(MAX_CONCURRENT_REQUESTS),
                }),
                events: ObserverRegistry::new(),
            }),
            transport,
        }
    }

    /// Admit the request produced by `factory`, if there is room for it.
    ///
    /// The factory is only invoked when a slot is free. Returns without
    /// waiting for the request to run.
    pub fn enqueue<F>(&self, factory: F) -> EnqueueResult
    where
        F: FnOnce() -> Option<TransportRequest>,
    {
        if !self.has_capacity() {
            log::debug!("[Dispatcher] At capacity, refusing request");
            return EnqueueResult::CapacityExceeded;
        }

        let Some(request) = factory() else {
            log::debug!("[Dispatcher] Factory produced no request");
            return EnqueueResult::NilRequest;
        };

        // Re-check under the same lock as the insert: a concurrent enqueue
        // may have taken the last slot while the factory ran.
        let admitted = {
            let mut table = self.shared.lock();
            if table.in_flight.len() >= table.capacity {
                None
            } else {
                let admitted = InFlightRequest {
                    id: RequestId(Uuid::new_v4()),
                    submitted_at: Instant::now(),
                };
                table.in_flight.insert(admitted.id, admitted);
                log::debug!(
                    "[Dispatcher] Admitted {} {} as {} ({}/{} in flight)",
                    request.method(),
                    request.path(),
                    admitted.id,
                    table.in_flight.len(),
                    table.capacity
                );
                Some(admitted)
            }
        };

        let Some(admitted) = admitted else {
            log::debug!("[Dispatcher] Lost the last slot to a concurrent request");
            return EnqueueResult::CapacityExceeded;
        };

        let slot = CompletionSlot {
            request: admitted,
            shared: Arc::clone(&self.shared),
        };
        self.transport.send(request, slot);
        EnqueueResult::Success
    }

    /// Number of requests currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.shared.lock().in_flight.len()
    }

    /// Snapshot of the in-flight requests.
    pub fn in_flight(&self) -> Vec<InFlightRequest> {
        self.shared.lock().in_flight.values().copied().collect()
    }

    /// Returns `true` if a request would currently be admitted.
    pub fn has_capacity(&self) -> bool {
        let table = self.shared.lock();
        table.in_flight.len() < table.capacity
    }

    /// Registry for [`DispatcherEvent`]s.
    pub fn events(&self) -> &Arc<ObserverRegistry<DispatcherEvent>> {
        &self.shared.events
    }

    /// Call `callback` whenever the dispatcher goes from full to not full.
    pub fn on_capacity_available<F>(&self, callback: F) -> Subscription<DispatcherEvent>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.events.subscribe(move |event| match event {
            DispatcherEvent::CapacityAvailable => callback(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Keeps every slot until the test releases it.
    #[derive(Debug, Default)]
    struct HoldingTransport {
        slots: Mutex<Vec<CompletionSlot>>,
        sent: AtomicUsize,
    }

    impl RequestTransport for HoldingTransport {
        fn send(&self, _request: TransportRequest, slot: CompletionSlot) {
            self.sent.fetch_add(1, Ordering::SeqCst);
            self.slots.lock().unwrap().push(slot);
        }
    }

    impl HoldingTransport {
        fn finish_one(&self) {
            let slot = self.slots.lock().unwrap().pop().unwrap();
            slot.complete();
        }
    }

    fn dispatcher() -> (RequestDispatcher, Arc<HoldingTransport>) {
        let transport = Arc::new(HoldingTransport::default());
        let dispatcher = RequestDispatcher::new(Arc::clone(&transport) as Arc<dyn RequestTransport>);
        (dispatcher, transport)
    }

    #[test]
    fn test_factory_not_invoked_when_full() {
        let (dispatcher, _transport) = dispatcher();
        for _ in 0..3 {
            assert_eq!(dispatcher.enqueue(|| Some(TransportRequest::get("/x"))), EnqueueResult::Success);
        }

        let mut invoked = false;
        let result = dispatcher.enqueue(|| {
            invoked = true;
            Some(TransportRequest::get("/x"))
        });
        assert_eq!(result, EnqueueResult::CapacityExceeded);
        assert!(!invoked);
    }

    #[test]
    fn test_nil_request_does_not_consume_capacity() {
        let (dispatcher, transport) = dispatcher();
        assert_eq!(dispatcher.enqueue(|| None), EnqueueResult::NilRequest);
        assert_eq!(dispatcher.in_flight_count(), 0);
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_capacity_signal_only_on_full_to_not_full() {
        let (dispatcher, transport) = dispatcher();
        let signals = Arc::new(AtomicUsize::new(0));
        let signals_clone = Arc::clone(&signals);
        let _sub = dispatcher.on_capacity_available(move || {
            signals_clone.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.enqueue(|| Some(TransportRequest::get("/a")));
        dispatcher.enqueue(|| Some(TransportRequest::get("/b")));
        transport.finish_one();
        assert_eq!(signals.load(Ordering::SeqCst), 0, "never full, no signal");

        dispatcher.enqueue(|| Some(TransportRequest::get("/c")));
        dispatcher.enqueue(|| Some(TransportRequest::get("/d")));
        assert!(!dispatcher.has_capacity());
        transport.finish_one();
        assert_eq!(signals.load(Ordering::SeqCst), 1);
        transport.finish_one();
        assert_eq!(signals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_slot_releases_capacity() {
        #[derive(Debug)]
        struct DroppingTransport;
        impl RequestTransport for DroppingTransport {
            fn send(&self, _request: TransportRequest, _slot: CompletionSlot) {}
        }

        let dispatcher = RequestDispatcher::new(Arc::new(DroppingTransport));
        for _ in 0..5 {
            assert_eq!(dispatcher.enqueue(|| Some(TransportRequest::get("/x"))), EnqueueResult::Success);
        }
        assert_eq!(dispatcher.in_flight_count(), 0);
    }

    #[test]
    fn test_in_flight_records_are_distinct() {
        let (dispatcher, _transport) = dispatcher();
        dispatcher.enqueue(|| Some(TransportRequest::get("/a")));
        dispatcher.enqueue(|| Some(TransportRequest::get("/b")));
        let records = dispatcher.in_flight();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].id, records[1].id);
    }

    #[test]
    fn test_into_result_mapping() {
        assert_eq!(EnqueueResult::Success.into_result(), Ok(()));
        assert_eq!(EnqueueResult::NilRequest.into_result(), Err(TransportError::InvalidRequest));
        assert_eq!(
            EnqueueResult::CapacityExceeded.into_result(),
            Err(TransportError::AdmissionRejected)
        );
    }
}
