//! Snapshot storage backends.
//!
//! Dense storage keeps parallel arrays sized to the whole box and is cheapest
//! for well-filled selections. Sparse storage keys records by voxel index and
//! wins for thin selections. The backend is picked once per capture.

use std::collections::HashMap;

use crate::voxel::{Payload, ScheduledEvent, VoxelRecord};

/// Fill fraction below which a capture uses the sparse backend.
pub const SPARSE_FILL_THRESHOLD: f32 = 0.25;

/// Which backend a snapshot uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Dense,
    Sparse,
}

/// Per-voxel storage addressed by mask index.
///
/// Stores do not track which indices hold data; the owning snapshot's
/// has-data mask does.
pub trait VoxelStore {
    fn kind(&self) -> StoreKind;

    fn get(&self, index: usize) -> Option<VoxelRecord>;

    fn put(&mut self, index: usize, record: VoxelRecord);

    fn event(&self, index: usize) -> Option<ScheduledEvent>;

    fn put_event(&mut self, index: usize, event: Option<ScheduledEvent>);
}

/// Parallel arrays covering every index of the box.
#[derive(Clone, Debug)]
pub struct DenseStore {
    type_codes: Vec<u16>,
    variants: Vec<u8>,
    lights: Vec<u8>,
    payloads: HashMap<usize, Payload>,
    events: HashMap<usize, ScheduledEvent>,
}

impl DenseStore {
    pub fn new(volume: usize) -> Self {
        Self {
            type_codes: vec![0; volume],
            variants: vec![0; volume],
            lights: vec![0; volume],
            payloads: HashMap::new(),
            events: HashMap::new(),
        }
    }
}

impl VoxelStore for DenseStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Dense
    }

    fn get(&self, index: usize) -> Option<VoxelRecord> {
        Some(VoxelRecord {
            type_code: *self.type_codes.get(index)?,
            variant: self.variants[index],
            payload: self.payloads.get(&index).cloned(),
            light: self.lights[index],
        })
    }

    fn put(&mut self, index: usize, record: VoxelRecord) {
        if index >= self.type_codes.len() {
            return;
        }
        self.type_codes[index] = record.type_code;
        self.variants[index] = record.variant;
        self.lights[index] = record.light;
        match record.payload {
            Some(payload) => {
                self.payloads.insert(index, payload);
            }
            None => {
                self.payloads.remove(&index);
            }
        }
    }

    fn event(&self, index: usize) -> Option<ScheduledEvent> {
        self.events.get(&index).copied()
    }

    fn put_event(&mut self, index: usize, event: Option<ScheduledEvent>) {
        match event {
            Some(e) => self.events.insert(index, e),
            None => self.events.remove(&index),
        };
    }
}

/// Records keyed by index.
#[derive(Clone, Debug, Default)]
pub struct SparseStore {
    records: HashMap<usize, VoxelRecord>,
    events: HashMap<usize, ScheduledEvent>,
}

impl VoxelStore for SparseStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Sparse
    }

    fn get(&self, index: usize) -> Option<VoxelRecord> {
        self.records.get(&index).cloned()
    }

    fn put(&mut self, index: usize, record: VoxelRecord) {
        self.records.insert(index, record);
    }

    fn event(&self, index: usize) -> Option<ScheduledEvent> {
        self.events.get(&index).copied()
    }

    fn put_event(&mut self, index: usize, event: Option<ScheduledEvent>) {
        match event {
            Some(e) => self.events.insert(index, e),
            None => self.events.remove(&index),
        };
    }
}

/// The backend chosen for a snapshot.
#[derive(Clone, Debug)]
pub enum SnapshotStore {
    Dense(DenseStore),
    Sparse(SparseStore),
}

impl SnapshotStore {
    /// Pick a backend for `selected` voxels out of `volume`.
    pub fn for_fill(volume: usize, selected: usize, threshold: f32) -> Self {
        let fill = if volume == 0 { 0.0 } else { selected as f32 / volume as f32 };
        if fill < threshold {
            SnapshotStore::Sparse(SparseStore::default())
        } else {
            SnapshotStore::Dense(DenseStore::new(volume))
        }
    }

    fn inner(&self) -> &dyn VoxelStore {
        match self {
            SnapshotStore::Dense(s) => s,
            SnapshotStore::Sparse(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn VoxelStore {
        match self {
            SnapshotStore::Dense(s) => s,
            SnapshotStore::Sparse(s) => s,
        }
    }
}

impl VoxelStore for SnapshotStore {
    fn kind(&self) -> StoreKind {
        self.inner().kind()
    }

    fn get(&self, index: usize) -> Option<VoxelRecord> {
        self.inner().get(index)
    }

    fn put(&mut self, index: usize, record: VoxelRecord) {
        self.inner_mut().put(index, record)
    }

    fn event(&self, index: usize) -> Option<ScheduledEvent> {
        self.inner().event(index)
    }

    fn put_event(&mut self, index: usize, event: Option<ScheduledEvent>) {
        self.inner_mut().put_event(index, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_choice() {
        assert_eq!(SnapshotStore::for_fill(100, 10, SPARSE_FILL_THRESHOLD).kind(), StoreKind::Sparse);
        assert_eq!(SnapshotStore::for_fill(100, 25, SPARSE_FILL_THRESHOLD).kind(), StoreKind::Dense);
        assert_eq!(SnapshotStore::for_fill(0, 0, SPARSE_FILL_THRESHOLD).kind(), StoreKind::Sparse);
    }

    #[test]
    fn test_backends_agree() {
        let record = VoxelRecord::new(12, 3).with_light(7).with_payload(Payload {
            facing: None,
            data: vec![9],
        });
        let event = ScheduledEvent { type_code: 12, delay: 5, priority: 0 };

        let mut stores = [
            SnapshotStore::Dense(DenseStore::new(8)),
            SnapshotStore::Sparse(SparseStore::default()),
        ];
        for store in stores.iter_mut() {
            store.put(3, record.clone());
            store.put_event(3, Some(event));
            assert_eq!(store.get(3), Some(record.clone()));
            assert_eq!(store.event(3), Some(event));

            store.put(3, VoxelRecord::new(1, 0));
            store.put_event(3, None);
            assert_eq!(store.get(3).unwrap().payload, None);
            assert_eq!(store.event(3), None);
        }
    }

    #[test]
    fn test_dense_out_of_range() {
        let mut store = DenseStore::new(2);
        store.put(5, VoxelRecord::new(1, 0));
        assert_eq!(store.get(5), None);
    }
}
