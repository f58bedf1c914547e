//! Compressed heightfield layers
//!
//! The geometry phase stores every layer of a tile in this form so later
//! layer-only rebuilds can skip voxelization. The header stays uncompressed;
//! the per-cell arrays are compressed as one payload.

use super::{read_header, read_vec3, write_header, write_vec3, CodecResultExt, LayerCompressor};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use recast::HeightfieldLayer;
use recast_common::{Bounds, Error, Result};
use std::io::{Cursor, Read, Write};

pub const LAYER_MAGIC: u32 = u32::from_le_bytes(*b"NLYR");
pub const LAYER_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct LayerHeader {
    pub tile_x: i32,
    pub tile_y: i32,
    pub layer: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub width: i32,
    pub height: i32,
    pub minx: i32,
    pub maxx: i32,
    pub minz: i32,
    pub maxz: i32,
    pub hmin: i32,
    pub hmax: i32,
}

impl LayerHeader {
    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        write_header(w, LAYER_MAGIC, LAYER_VERSION)?;
        w.write_i32::<LittleEndian>(self.tile_x)?;
        w.write_i32::<LittleEndian>(self.tile_y)?;
        w.write_i32::<LittleEndian>(self.layer)?;
        write_vec3(w, self.bmin)?;
        write_vec3(w, self.bmax)?;
        w.write_f32::<LittleEndian>(self.cs)?;
        w.write_f32::<LittleEndian>(self.ch)?;
        for v in [
            self.width, self.height, self.minx, self.maxx, self.minz, self.maxz, self.hmin,
            self.hmax,
        ] {
            w.write_i32::<LittleEndian>(v)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        read_header(r, LAYER_MAGIC, LAYER_VERSION, "layer")?;
        let tile_x = r.read_i32::<LittleEndian>().codec("layer header")?;
        let tile_y = r.read_i32::<LittleEndian>().codec("layer header")?;
        let layer = r.read_i32::<LittleEndian>().codec("layer header")?;
        let bmin = read_vec3(r, "layer header")?;
        let bmax = read_vec3(r, "layer header")?;
        let cs = r.read_f32::<LittleEndian>().codec("layer header")?;
        let ch = r.read_f32::<LittleEndian>().codec("layer header")?;
        let mut ints = [0i32; 8];
        for v in ints.iter_mut() {
            *v = r.read_i32::<LittleEndian>().codec("layer header")?;
        }
        let [width, height, minx, maxx, minz, maxz, hmin, hmax] = ints;
        if width <= 0 || height <= 0 || width > 0xffff || height > 0xffff {
            return Err(Error::Codec(format!("layer: invalid size {}x{}", width, height)));
        }
        Ok(Self {
            tile_x,
            tile_y,
            layer,
            bmin,
            bmax,
            cs,
            ch,
            width,
            height,
            minx,
            maxx,
            minz,
            maxz,
            hmin,
            hmax,
        })
    }

    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// One encoded layer: uncompressed header followed by the compressed cells
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedLayer {
    pub header: LayerHeader,
    bytes: Vec<u8>,
}

impl CompressedLayer {
    pub fn encode(
        layer: &HeightfieldLayer,
        tile_x: i32,
        tile_y: i32,
        index: i32,
        compressor: &dyn LayerCompressor,
    ) -> Result<Self> {
        let header = LayerHeader {
            tile_x,
            tile_y,
            layer: index,
            bmin: layer.bmin,
            bmax: layer.bmax,
            cs: layer.cs,
            ch: layer.ch,
            width: layer.width,
            height: layer.height,
            minx: layer.minx,
            maxx: layer.maxx,
            minz: layer.minz,
            maxz: layer.maxz,
            hmin: layer.hmin,
            hmax: layer.hmax,
        };
        let cells = header.cell_count();
        if layer.heights.len() != cells || layer.areas.len() != cells || layer.cons.len() != cells {
            return Err(Error::Codec(format!(
                "layer {} of tile ({}, {}) has mismatched cell arrays",
                index, tile_x, tile_y
            )));
        }

        let mut payload = Vec::with_capacity(cells * 3);
        payload.extend_from_slice(&layer.heights);
        payload.extend_from_slice(&layer.areas);
        payload.extend_from_slice(&layer.cons);

        let mut bytes = Vec::new();
        header.write_to(&mut bytes)?;
        bytes.extend_from_slice(&compressor.compress(&payload)?);
        Ok(Self { header, bytes })
    }

    /// Parses a record produced by [`CompressedLayer::encode`]
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let header = LayerHeader::read_from(&mut Cursor::new(bytes.as_slice()))?;
        Ok(Self { header, bytes })
    }

    pub fn decompress(&self, compressor: &dyn LayerCompressor) -> Result<HeightfieldLayer> {
        let mut r = Cursor::new(self.bytes.as_slice());
        let header = LayerHeader::read_from(&mut r)?;
        let payload = compressor.decompress(&self.bytes[r.position() as usize..])?;

        let cells = header.cell_count();
        if payload.len() != cells * 3 {
            return Err(Error::Codec(format!(
                "layer payload holds {} bytes, expected {}",
                payload.len(),
                cells * 3
            )));
        }
        Ok(HeightfieldLayer {
            bmin: header.bmin,
            bmax: header.bmax,
            cs: header.cs,
            ch: header.ch,
            width: header.width,
            height: header.height,
            minx: header.minx,
            maxx: header.maxx,
            minz: header.minz,
            maxz: header.maxz,
            hmin: header.hmin,
            hmax: header.hmax,
            heights: payload[..cells].to_vec(),
            areas: payload[cells..cells * 2].to_vec(),
            cons: payload[cells * 2..].to_vec(),
        })
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.header.bmin, self.header.bmax)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn memory_size(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Lz4Compressor;
    use recast::LAYER_EMPTY_HEIGHT;

    fn layer() -> HeightfieldLayer {
        let (w, h) = (4, 3);
        let mut heights = vec![LAYER_EMPTY_HEIGHT; 12];
        heights[5] = 2;
        heights[6] = 3;
        HeightfieldLayer {
            bmin: Vec3::new(0.0, 1.0, 0.0),
            bmax: Vec3::new(4.0, 3.0, 3.0),
            cs: 1.0,
            ch: 0.5,
            width: w,
            height: h,
            minx: 1,
            maxx: 2,
            minz: 1,
            maxz: 1,
            hmin: 2,
            hmax: 6,
            heights,
            areas: vec![63; 12],
            cons: vec![0x12; 12],
        }
    }

    #[test]
    fn test_layer_survives_compression() {
        let encoded = CompressedLayer::encode(&layer(), 3, 4, 1, &Lz4Compressor).unwrap();
        assert_eq!(encoded.header.tile_x, 3);
        assert_eq!(encoded.header.layer, 1);
        assert_eq!(encoded.bounds().max, Vec3::new(4.0, 3.0, 3.0));

        let parsed = CompressedLayer::from_bytes(encoded.as_bytes().to_vec()).unwrap();
        assert_eq!(parsed, encoded);
        assert_eq!(parsed.decompress(&Lz4Compressor).unwrap(), layer());
    }

    #[test]
    fn test_rejects_mismatched_arrays() {
        let mut bad = layer();
        bad.cons.pop();
        assert!(CompressedLayer::encode(&bad, 0, 0, 0, &Lz4Compressor).is_err());
    }

    #[test]
    fn test_rejects_bad_records() {
        let encoded = CompressedLayer::encode(&layer(), 0, 0, 0, &Lz4Compressor).unwrap();
        let mut bytes = encoded.as_bytes().to_vec();
        bytes[1] ^= 0x55;
        assert!(matches!(CompressedLayer::from_bytes(bytes), Err(Error::Codec(_))));

        let truncated = encoded.as_bytes()[..20].to_vec();
        assert!(matches!(CompressedLayer::from_bytes(truncated), Err(Error::Codec(_))));
    }
}
