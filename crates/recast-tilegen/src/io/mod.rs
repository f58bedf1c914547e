//! Binary formats
//!
//! Every record starts with a little-endian magic and format version.
//! Malformed, truncated or foreign input is rejected with [`Error::Codec`].

mod compressor;
mod geometry_cache;
mod layer_codec;
mod tile_blob;
mod voxel_cache;

pub use compressor::{LayerCompressor, Lz4Compressor};
pub use geometry_cache::{GeometryCache, GEOMETRY_CACHE_MAGIC, GEOMETRY_CACHE_VERSION};
pub use layer_codec::{CompressedLayer, LayerHeader, LAYER_MAGIC, LAYER_VERSION};
pub use tile_blob::{
    NavTileData, OffMeshConnection, SegmentConnection, TileCluster, TileHeader, OFFMESH_BIDIR,
    OFFMESH_POINT, OFFMESH_SEGMENT, TILE_MAGIC, TILE_VERSION,
};
pub use voxel_cache::{VoxelCache, VoxelCacheTile, VoxelGrid, VOXEL_CACHE_MAGIC, VOXEL_CACHE_VERSION};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use recast_common::{Error, Result};
use std::io::{Read, Write};

/// Turns read errors into codec errors naming the field being read
pub(crate) trait CodecResultExt<T> {
    fn codec(self, what: &str) -> Result<T>;
}

impl<T> CodecResultExt<T> for std::io::Result<T> {
    fn codec(self, what: &str) -> Result<T> {
        self.map_err(|e| Error::Codec(format!("{}: {}", what, e)))
    }
}

pub(crate) fn write_header<W: Write>(w: &mut W, magic: u32, version: u32) -> Result<()> {
    w.write_u32::<LittleEndian>(magic)?;
    w.write_u32::<LittleEndian>(version)?;
    Ok(())
}

pub(crate) fn read_header<R: Read>(r: &mut R, magic: u32, version: u32, what: &str) -> Result<()> {
    let found = r.read_u32::<LittleEndian>().codec(what)?;
    if found != magic {
        return Err(Error::Codec(format!(
            "{}: bad magic {:#010x}, expected {:#010x}",
            what, found, magic
        )));
    }
    let found = r.read_u32::<LittleEndian>().codec(what)?;
    if found != version {
        return Err(Error::Codec(format!(
            "{}: unsupported version {}, expected {}",
            what, found, version
        )));
    }
    Ok(())
}

/// Validates an element count read from untrusted input against the bytes left
pub(crate) fn checked_count(count: i32, elem_size: usize, remaining: usize, what: &str) -> Result<usize> {
    let count = usize::try_from(count)
        .map_err(|_| Error::Codec(format!("{}: negative count {}", what, count)))?;
    if count.saturating_mul(elem_size) > remaining {
        return Err(Error::Codec(format!(
            "{}: {} entries do not fit in {} remaining bytes",
            what, count, remaining
        )));
    }
    Ok(count)
}

pub(crate) fn write_vec3<W: Write>(w: &mut W, v: Vec3) -> Result<()> {
    w.write_f32::<LittleEndian>(v.x)?;
    w.write_f32::<LittleEndian>(v.y)?;
    w.write_f32::<LittleEndian>(v.z)?;
    Ok(())
}

pub(crate) fn read_vec3<R: Read>(r: &mut R, what: &str) -> Result<Vec3> {
    let x = r.read_f32::<LittleEndian>().codec(what)?;
    let y = r.read_f32::<LittleEndian>().codec(what)?;
    let z = r.read_f32::<LittleEndian>().codec(what)?;
    Ok(Vec3::new(x, y, z))
}

/// Bytes left after the cursor position
pub(crate) fn remaining(cursor: &std::io::Cursor<&[u8]>) -> usize {
    cursor.get_ref().len().saturating_sub(cursor.position() as usize)
}
