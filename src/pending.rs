//! In-flight request table.
//!
//! Fixed 128-slot mapping from stream id to the pending
//! [`RequestDescriptor`]. A slot is occupied exactly while its id is out
//! of the [`StreamIdPool`](crate::pool::StreamIdPool) and the request has
//! been handed to the write pump but not yet terminally delivered, so at
//! any quiescent moment `free ids + occupied slots = 128`.
//!
//! The mutex guards only pointer-sized moves and is never held across an
//! await point.

use std::sync::Mutex;

use crate::frame::STREAM_ID_COUNT;
use crate::request::RequestDescriptor;

/// 128-slot table of in-flight requests, indexed by stream id.
pub(crate) struct PendingTable {
    slots: Mutex<[Option<RequestDescriptor>; STREAM_ID_COUNT]>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(std::array::from_fn(|_| None)),
        }
    }

    /// Record the descriptor for `id`. The slot must be empty; a
    /// collision means the id pool handed out an id twice.
    pub(crate) fn put(&self, id: i8, descriptor: RequestDescriptor) {
        let mut slots = self.slots.lock().unwrap();
        let slot = &mut slots[id as usize];
        assert!(slot.is_none(), "stream id {id} already has a pending request");
        *slot = Some(descriptor);
    }

    /// Clear and return the descriptor for `id`, if any. The read pump
    /// treats `None` as a fatal unexpected-stream fault.
    pub(crate) fn take(&self, id: i8) -> Option<RequestDescriptor> {
        self.slots.lock().unwrap()[id as usize].take()
    }

    /// Empty the table, yielding every pending descriptor. Used once by
    /// the closing path to cancel whatever is still in flight.
    pub(crate) fn drain(&self) -> Vec<RequestDescriptor> {
        let mut slots = self.slots.lock().unwrap();
        slots.iter_mut().filter_map(Option::take).collect()
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}
