//! Runtime mesh contract
//!
//! The generator hands finished layer blobs to a [`RuntimeMeshSink`] and
//! takes old blobs back when they are replaced. The sink is owned by the host
//! and shared with the generator through [`SharedMeshSink`].

use recast_common::Error;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Handle of one inserted layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerRef {
    pub tile_x: i32,
    pub tile_y: i32,
    pub layer: i32,
    /// Bumped on every insertion so handles to replaced layers go stale
    pub salt: u32,
}

pub trait RuntimeMeshSink: Send {
    /// Takes ownership of `blob`. Fails with [`Error::CapacityExceeded`] when
    /// no slot is free; the blob is handed back in that case.
    fn insert(
        &mut self,
        tile_x: i32,
        tile_y: i32,
        layer: i32,
        blob: Vec<u8>,
    ) -> std::result::Result<LayerRef, (Error, Vec<u8>)>;

    /// Removes a layer and returns its blob
    fn remove(&mut self, layer: LayerRef) -> Option<Vec<u8>>;

    /// Layers currently stored at a tile coordinate, ordered by layer index
    fn query(&self, tile_x: i32, tile_y: i32) -> Vec<LayerRef>;

    fn layer_at(&self, tile_x: i32, tile_y: i32, layer: i32) -> Option<LayerRef> {
        self.query(tile_x, tile_y)
            .into_iter()
            .find(|r| r.layer == layer)
    }
}

pub type SharedMeshSink = Arc<Mutex<dyn RuntimeMeshSink>>;

/// Map-backed sink with a fixed number of layer slots
#[derive(Debug)]
pub struct InMemoryMeshSink {
    capacity: usize,
    layers: BTreeMap<(i32, i32, i32), (u32, Vec<u8>)>,
    next_salt: u32,
}

impl InMemoryMeshSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            layers: BTreeMap::new(),
            next_salt: 1,
        }
    }

    pub fn shared(capacity: usize) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn blob(&self, layer: LayerRef) -> Option<&[u8]> {
        self.layers
            .get(&(layer.tile_x, layer.tile_y, layer.layer))
            .filter(|(salt, _)| *salt == layer.salt)
            .map(|(_, blob)| blob.as_slice())
    }

    /// Blobs of every layer at a tile coordinate, ordered by layer index
    pub fn tile_blobs(&self, tile_x: i32, tile_y: i32) -> Vec<&[u8]> {
        self.layers
            .range((tile_x, tile_y, i32::MIN)..=(tile_x, tile_y, i32::MAX))
            .map(|(_, (_, blob))| blob.as_slice())
            .collect()
    }

    pub fn memory_size(&self) -> usize {
        self.layers.values().map(|(_, blob)| blob.len()).sum()
    }
}

impl RuntimeMeshSink for InMemoryMeshSink {
    fn insert(
        &mut self,
        tile_x: i32,
        tile_y: i32,
        layer: i32,
        blob: Vec<u8>,
    ) -> std::result::Result<LayerRef, (Error, Vec<u8>)> {
        let key = (tile_x, tile_y, layer);
        if !self.layers.contains_key(&key) && self.layers.len() >= self.capacity {
            return Err((
                Error::CapacityExceeded {
                    tile_x,
                    tile_y,
                    layer,
                },
                blob,
            ));
        }
        let salt = self.next_salt;
        self.next_salt = self.next_salt.wrapping_add(1).max(1);
        self.layers.insert(key, (salt, blob));
        Ok(LayerRef {
            tile_x,
            tile_y,
            layer,
            salt,
        })
    }

    fn remove(&mut self, layer: LayerRef) -> Option<Vec<u8>> {
        let key = (layer.tile_x, layer.tile_y, layer.layer);
        match self.layers.get(&key) {
            Some((salt, _)) if *salt == layer.salt => self.layers.remove(&key).map(|(_, b)| b),
            _ => None,
        }
    }

    fn query(&self, tile_x: i32, tile_y: i32) -> Vec<LayerRef> {
        self.layers
            .range((tile_x, tile_y, i32::MIN)..=(tile_x, tile_y, i32::MAX))
            .map(|(&(tile_x, tile_y, layer), &(salt, _))| LayerRef {
                tile_x,
                tile_y,
                layer,
                salt,
            })
            .collect()
    }
}

/// Removes every layer at a tile coordinate, returning the released blobs
pub fn remove_tile_layers(sink: &mut dyn RuntimeMeshSink, tile_x: i32, tile_y: i32) -> Vec<Vec<u8>> {
    sink.query(tile_x, tile_y)
        .into_iter()
        .filter_map(|r| sink.remove(r))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_query_remove() {
        let mut sink = InMemoryMeshSink::new(8);
        let a = sink.insert(1, 1, 0, vec![1]).unwrap();
        let b = sink.insert(1, 1, 1, vec![2]).unwrap();
        sink.insert(2, 1, 0, vec![3]).unwrap();

        assert_eq!(sink.query(1, 1), vec![a, b]);
        assert_eq!(sink.layer_at(1, 1, 1), Some(b));
        assert_eq!(sink.remove(a), Some(vec![1]));
        assert_eq!(sink.remove(a), None);
        assert_eq!(sink.tile_blobs(1, 1), vec![&[2u8][..]]);
    }

    #[test]
    fn test_stale_handles_are_ignored() {
        let mut sink = InMemoryMeshSink::new(8);
        let old = sink.insert(0, 0, 0, vec![1]).unwrap();
        let new = sink.insert(0, 0, 0, vec![2]).unwrap();
        assert_ne!(old.salt, new.salt);
        assert_eq!(sink.remove(old), None);
        assert_eq!(sink.blob(new), Some(&[2u8][..]));
    }

    #[test]
    fn test_capacity_hands_blob_back() {
        let mut sink = InMemoryMeshSink::new(1);
        sink.insert(0, 0, 0, vec![1]).unwrap();
        let (err, blob) = sink.insert(0, 1, 0, vec![9]).unwrap_err();
        assert!(err.is_structural());
        assert_eq!(blob, vec![9]);
        assert_eq!(remove_tile_layers(&mut sink, 0, 0), vec![vec![1]]);
        assert!(sink.is_empty());
    }
}
