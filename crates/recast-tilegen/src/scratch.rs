//! Reusable per-build buffers
//!
//! One [`TileScratch`] is checked out for every running build and returned
//! when it finishes, so heightfields and triangle area buffers are reused
//! across tiles instead of reallocated.

use glam::Vec3;
use recast::Heightfield;
use recast_common::Result;
use std::sync::{Mutex, PoisonError};

/// A heightfield kept between builds of the same size
#[derive(Debug, Default)]
pub struct HeightfieldSlot(Option<Heightfield>);

impl HeightfieldSlot {
    /// A cleared heightfield of the requested size, reusing the previous one
    /// when the dimensions match
    pub fn prepare(
        &mut self,
        width: i32,
        height: i32,
        bmin: Vec3,
        bmax: Vec3,
        cs: f32,
        ch: f32,
    ) -> Result<&mut Heightfield> {
        let reusable = self.0.as_ref().is_some_and(|hf| {
            hf.width == width && hf.height == height && hf.cs == cs && hf.ch == ch
        });
        let hf = match self.0.take() {
            Some(mut hf) if reusable => {
                hf.reset(bmin, bmax);
                hf
            }
            _ => Heightfield::new(width, height, bmin, bmax, cs, ch)?,
        };
        Ok(self.0.insert(hf))
    }
}

#[derive(Debug, Default)]
pub struct TileScratch {
    /// Tile heightfield every element is rasterized into
    pub solid: HeightfieldSlot,
    /// Single-element heightfield used to prepare voxel cache entries
    pub voxel: HeightfieldSlot,
    pub tri_areas: Vec<u8>,
}

/// Zeroed area buffer for `count` triangles
pub fn zeroed_areas(buffer: &mut Vec<u8>, count: usize) -> &mut [u8] {
    buffer.clear();
    buffer.resize(count, 0);
    buffer
}

/// Pool of scratch sets, one per build slot
#[derive(Debug)]
pub struct ScratchPool {
    free: Mutex<Vec<TileScratch>>,
    capacity: usize,
}

impl ScratchPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn checkout(&self) -> TileScratch {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default()
    }

    pub fn checkin(&self, scratch: TileScratch) {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.capacity {
            free.push(scratch);
        }
    }

    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
