//! Exported collision geometry of one navigation element

use super::{checked_count, read_header, read_vec3, remaining, write_header, write_vec3, CodecResultExt};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use recast_common::{Bounds, Error, Result};
use std::io::Cursor;

pub const GEOMETRY_CACHE_MAGIC: u32 = u32::from_le_bytes(*b"NGEO");
pub const GEOMETRY_CACHE_VERSION: u32 = 1;

/// Indexed triangle soup plus an optional per-element slope limit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryCache {
    pub verts: Vec<Vec3>,
    /// Three indices per triangle
    pub indices: Vec<i32>,
    /// Replaces the agent's max slope (degrees) for this element's triangles
    pub slope_override: Option<f32>,
}

impl GeometryCache {
    pub fn new(verts: Vec<Vec3>, indices: Vec<i32>) -> Self {
        Self {
            verts,
            indices,
            slope_override: None,
        }
    }

    pub fn with_slope_override(mut self, degrees: f32) -> Self {
        self.slope_override = Some(degrees);
        self
    }

    pub fn face_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.len() < 3
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::from_points(&self.verts)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.indices.len() % 3 != 0 {
            return Err(Error::InvalidMesh(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        let mut out = Vec::with_capacity(25 + self.verts.len() * 12 + self.indices.len() * 4);
        write_header(&mut out, GEOMETRY_CACHE_MAGIC, GEOMETRY_CACHE_VERSION)?;
        out.write_i32::<LittleEndian>(self.verts.len() as i32)?;
        out.write_i32::<LittleEndian>(self.face_count() as i32)?;
        out.write_u8(self.slope_override.is_some() as u8)?;
        out.write_f32::<LittleEndian>(self.slope_override.unwrap_or(0.0))?;
        for v in &self.verts {
            write_vec3(&mut out, *v)?;
        }
        for &i in &self.indices {
            out.write_i32::<LittleEndian>(i)?;
        }
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(data);
        read_header(&mut r, GEOMETRY_CACHE_MAGIC, GEOMETRY_CACHE_VERSION, "geometry cache")?;
        let num_verts = r.read_i32::<LittleEndian>().codec("geometry cache header")?;
        let num_faces = r.read_i32::<LittleEndian>().codec("geometry cache header")?;
        let has_override = r.read_u8().codec("geometry cache header")? != 0;
        let slope = r.read_f32::<LittleEndian>().codec("geometry cache header")?;

        let num_verts = checked_count(num_verts, 12, remaining(&r), "geometry cache vertices")?;
        let mut verts = Vec::with_capacity(num_verts);
        for _ in 0..num_verts {
            verts.push(read_vec3(&mut r, "geometry cache vertices")?);
        }

        let num_faces = checked_count(num_faces, 12, remaining(&r), "geometry cache faces")?;
        let mut indices = Vec::with_capacity(num_faces * 3);
        for _ in 0..num_faces * 3 {
            let i = r.read_i32::<LittleEndian>().codec("geometry cache faces")?;
            if i < 0 || i as usize >= num_verts {
                return Err(Error::Codec(format!(
                    "geometry cache: index {} out of range ({} vertices)",
                    i, num_verts
                )));
            }
            indices.push(i);
        }

        Ok(Self {
            verts,
            indices,
            slope_override: has_override.then_some(slope),
        })
    }
}
