//! Encoded navigation data of one tile layer
//!
//! This is the relocatable record handed to the runtime mesh. Vertices are
//! stored in voxel coordinates relative to `bmin`, so moving a tile only
//! means rewriting its header.

use super::{
    checked_count, read_header, read_vec3, remaining, write_header, write_vec3, CodecResultExt,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use recast_common::{Error, Result};
use std::io::{Cursor, Read, Write};

pub const TILE_MAGIC: u32 = u32::from_le_bytes(*b"NTIL");
pub const TILE_VERSION: u32 = 1;

/// Connection between two points
pub const OFFMESH_POINT: u8 = 0x01;
/// Connection between two segments
pub const OFFMESH_SEGMENT: u8 = 0x02;
/// Traversable in both directions
pub const OFFMESH_BIDIR: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffMeshConnection {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
    pub flags: u16,
    pub area: u8,
    /// `OFFMESH_*` bits
    pub kind: u8,
    pub user_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentConnection {
    pub start_a: Vec3,
    pub start_b: Vec3,
    pub end_a: Vec3,
    pub end_b: Vec3,
    pub radius: f32,
    pub flags: u16,
    pub area: u8,
    pub kind: u8,
    pub user_id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileCluster {
    pub center: Vec3,
    pub links: Vec<u16>,
}

/// Fixed-size prefix of a tile record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileHeader {
    pub tile_x: i32,
    pub tile_y: i32,
    pub layer: i32,
    pub poly_count: u32,
    pub vert_count: u32,
}

impl TileHeader {
    /// Reads the header without decoding the rest of the record
    pub fn peek(data: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(data);
        read_header(&mut r, TILE_MAGIC, TILE_VERSION, "tile")?;
        let tile_x = r.read_i32::<LittleEndian>().codec("tile header")?;
        let tile_y = r.read_i32::<LittleEndian>().codec("tile header")?;
        let layer = r.read_i32::<LittleEndian>().codec("tile header")?;
        let poly_count = r.read_u32::<LittleEndian>().codec("tile header")?;
        let vert_count = r.read_u32::<LittleEndian>().codec("tile header")?;
        Ok(Self {
            tile_x,
            tile_y,
            layer,
            poly_count,
            vert_count,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavTileData {
    pub tile_x: i32,
    pub tile_y: i32,
    pub layer: i32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub max_verts_per_poly: u8,
    pub verts: Vec<[u16; 3]>,
    /// `nvp` vertex slots followed by `nvp` neighbour slots per polygon
    pub polys: Vec<u16>,
    pub poly_flags: Vec<u16>,
    pub poly_areas: Vec<u8>,
    /// Cluster index of every polygon
    pub poly_clusters: Vec<u16>,
    pub detail_meshes: Vec<[u32; 4]>,
    pub detail_verts: Vec<Vec3>,
    pub detail_tris: Vec<[u8; 4]>,
    pub off_mesh: Vec<OffMeshConnection>,
    pub segments: Vec<SegmentConnection>,
    pub clusters: Vec<TileCluster>,
}

impl NavTileData {
    pub fn poly_count(&self) -> usize {
        self.poly_areas.len()
    }

    fn check_consistency(&self) -> Result<()> {
        let n = self.poly_count();
        let nvp = self.max_verts_per_poly as usize;
        if self.polys.len() != n * nvp * 2
            || self.poly_flags.len() != n
            || self.poly_clusters.len() != n
        {
            return Err(Error::Codec(format!(
                "tile ({}, {}) layer {}: polygon arrays disagree on {} polygons",
                self.tile_x, self.tile_y, self.layer, n
            )));
        }
        if !self.detail_meshes.is_empty() && self.detail_meshes.len() != n {
            return Err(Error::Codec(format!(
                "tile ({}, {}) layer {}: {} detail meshes for {} polygons",
                self.tile_x,
                self.tile_y,
                self.layer,
                self.detail_meshes.len(),
                n
            )));
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        self.check_consistency()?;
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        write_header(w, TILE_MAGIC, TILE_VERSION)?;
        w.write_i32::<LittleEndian>(self.tile_x)?;
        w.write_i32::<LittleEndian>(self.tile_y)?;
        w.write_i32::<LittleEndian>(self.layer)?;
        w.write_u32::<LittleEndian>(self.poly_count() as u32)?;
        w.write_u32::<LittleEndian>(self.verts.len() as u32)?;
        w.write_u32::<LittleEndian>(self.detail_meshes.len() as u32)?;
        w.write_u32::<LittleEndian>(self.detail_verts.len() as u32)?;
        w.write_u32::<LittleEndian>(self.detail_tris.len() as u32)?;
        w.write_u32::<LittleEndian>(self.off_mesh.len() as u32)?;
        w.write_u32::<LittleEndian>(self.segments.len() as u32)?;
        w.write_u32::<LittleEndian>(self.clusters.len() as u32)?;
        w.write_u8(self.max_verts_per_poly)?;
        w.write_f32::<LittleEndian>(self.walkable_height)?;
        w.write_f32::<LittleEndian>(self.walkable_radius)?;
        w.write_f32::<LittleEndian>(self.walkable_climb)?;
        write_vec3(w, self.bmin)?;
        write_vec3(w, self.bmax)?;
        w.write_f32::<LittleEndian>(self.cs)?;
        w.write_f32::<LittleEndian>(self.ch)?;

        for v in &self.verts {
            for c in v {
                w.write_u16::<LittleEndian>(*c)?;
            }
        }
        for &p in &self.polys {
            w.write_u16::<LittleEndian>(p)?;
        }
        for &f in &self.poly_flags {
            w.write_u16::<LittleEndian>(f)?;
        }
        w.write_all(&self.poly_areas)?;
        for &c in &self.poly_clusters {
            w.write_u16::<LittleEndian>(c)?;
        }
        for m in &self.detail_meshes {
            for v in m {
                w.write_u32::<LittleEndian>(*v)?;
            }
        }
        for v in &self.detail_verts {
            write_vec3(w, *v)?;
        }
        for t in &self.detail_tris {
            w.write_all(t)?;
        }
        for con in &self.off_mesh {
            write_vec3(w, con.start)?;
            write_vec3(w, con.end)?;
            w.write_f32::<LittleEndian>(con.radius)?;
            w.write_u16::<LittleEndian>(con.flags)?;
            w.write_u8(con.area)?;
            w.write_u8(con.kind)?;
            w.write_u32::<LittleEndian>(con.user_id)?;
        }
        for seg in &self.segments {
            for p in [seg.start_a, seg.start_b, seg.end_a, seg.end_b] {
                write_vec3(w, p)?;
            }
            w.write_f32::<LittleEndian>(seg.radius)?;
            w.write_u16::<LittleEndian>(seg.flags)?;
            w.write_u8(seg.area)?;
            w.write_u8(seg.kind)?;
            w.write_u32::<LittleEndian>(seg.user_id)?;
        }
        for cluster in &self.clusters {
            write_vec3(w, cluster.center)?;
            w.write_u16::<LittleEndian>(cluster.links.len() as u16)?;
            for &l in &cluster.links {
                w.write_u16::<LittleEndian>(l)?;
            }
        }
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(data);
        read_header(&mut r, TILE_MAGIC, TILE_VERSION, "tile")?;
        let tile_x = r.read_i32::<LittleEndian>().codec("tile header")?;
        let tile_y = r.read_i32::<LittleEndian>().codec("tile header")?;
        let layer = r.read_i32::<LittleEndian>().codec("tile header")?;
        let mut counts = [0i32; 8];
        for c in counts.iter_mut() {
            let v = r.read_u32::<LittleEndian>().codec("tile header")?;
            *c = i32::try_from(v).map_err(|_| Error::Codec(format!("tile: count {} too large", v)))?;
        }
        let [npolys, nverts, ndmeshes, ndverts, ndtris, noffmesh, nsegments, nclusters] = counts;
        let nvp = r.read_u8().codec("tile header")?;
        let walkable_height = r.read_f32::<LittleEndian>().codec("tile header")?;
        let walkable_radius = r.read_f32::<LittleEndian>().codec("tile header")?;
        let walkable_climb = r.read_f32::<LittleEndian>().codec("tile header")?;
        let bmin = read_vec3(&mut r, "tile header")?;
        let bmax = read_vec3(&mut r, "tile header")?;
        let cs = r.read_f32::<LittleEndian>().codec("tile header")?;
        let ch = r.read_f32::<LittleEndian>().codec("tile header")?;

        let nverts = checked_count(nverts, 6, remaining(&r), "tile vertices")?;
        let mut verts = Vec::with_capacity(nverts);
        for _ in 0..nverts {
            let mut v = [0u16; 3];
            for c in v.iter_mut() {
                *c = r.read_u16::<LittleEndian>().codec("tile vertices")?;
            }
            verts.push(v);
        }

        let poly_size = nvp as usize * 4 + 5;
        let npolys = checked_count(npolys, poly_size, remaining(&r), "tile polygons")?;
        let polys = read_u16s(&mut r, npolys * nvp as usize * 2, "tile polygons")?;
        let poly_flags = read_u16s(&mut r, npolys, "tile polygon flags")?;
        let mut poly_areas = vec![0u8; npolys];
        r.read_exact(&mut poly_areas).codec("tile polygon areas")?;
        let poly_clusters = read_u16s(&mut r, npolys, "tile polygon clusters")?;

        let ndmeshes = checked_count(ndmeshes, 16, remaining(&r), "tile detail meshes")?;
        let mut detail_meshes = Vec::with_capacity(ndmeshes);
        for _ in 0..ndmeshes {
            let mut m = [0u32; 4];
            for v in m.iter_mut() {
                *v = r.read_u32::<LittleEndian>().codec("tile detail meshes")?;
            }
            detail_meshes.push(m);
        }
        let ndverts = checked_count(ndverts, 12, remaining(&r), "tile detail vertices")?;
        let mut detail_verts = Vec::with_capacity(ndverts);
        for _ in 0..ndverts {
            detail_verts.push(read_vec3(&mut r, "tile detail vertices")?);
        }
        let ndtris = checked_count(ndtris, 4, remaining(&r), "tile detail triangles")?;
        let mut detail_tris = Vec::with_capacity(ndtris);
        for _ in 0..ndtris {
            let mut t = [0u8; 4];
            r.read_exact(&mut t).codec("tile detail triangles")?;
            detail_tris.push(t);
        }

        let noffmesh = checked_count(noffmesh, 36, remaining(&r), "tile off-mesh links")?;
        let mut off_mesh = Vec::with_capacity(noffmesh);
        for _ in 0..noffmesh {
            off_mesh.push(OffMeshConnection {
                start: read_vec3(&mut r, "tile off-mesh links")?,
                end: read_vec3(&mut r, "tile off-mesh links")?,
                radius: r.read_f32::<LittleEndian>().codec("tile off-mesh links")?,
                flags: r.read_u16::<LittleEndian>().codec("tile off-mesh links")?,
                area: r.read_u8().codec("tile off-mesh links")?,
                kind: r.read_u8().codec("tile off-mesh links")?,
                user_id: r.read_u32::<LittleEndian>().codec("tile off-mesh links")?,
            });
        }
        let nsegments = checked_count(nsegments, 60, remaining(&r), "tile segment links")?;
        let mut segments = Vec::with_capacity(nsegments);
        for _ in 0..nsegments {
            segments.push(SegmentConnection {
                start_a: read_vec3(&mut r, "tile segment links")?,
                start_b: read_vec3(&mut r, "tile segment links")?,
                end_a: read_vec3(&mut r, "tile segment links")?,
                end_b: read_vec3(&mut r, "tile segment links")?,
                radius: r.read_f32::<LittleEndian>().codec("tile segment links")?,
                flags: r.read_u16::<LittleEndian>().codec("tile segment links")?,
                area: r.read_u8().codec("tile segment links")?,
                kind: r.read_u8().codec("tile segment links")?,
                user_id: r.read_u32::<LittleEndian>().codec("tile segment links")?,
            });
        }
        let nclusters = checked_count(nclusters, 14, remaining(&r), "tile clusters")?;
        let mut clusters = Vec::with_capacity(nclusters);
        for _ in 0..nclusters {
            let center = read_vec3(&mut r, "tile clusters")?;
            let nlinks = r.read_u16::<LittleEndian>().codec("tile clusters")? as usize;
            let links = read_u16s(&mut r, nlinks, "tile clusters")?;
            clusters.push(TileCluster { center, links });
        }

        let tile = Self {
            tile_x,
            tile_y,
            layer,
            walkable_height,
            walkable_radius,
            walkable_climb,
            bmin,
            bmax,
            cs,
            ch,
            max_verts_per_poly: nvp,
            verts,
            polys,
            poly_flags,
            poly_areas,
            poly_clusters,
            detail_meshes,
            detail_verts,
            detail_tris,
            off_mesh,
            segments,
            clusters,
        };
        tile.check_consistency()?;
        Ok(tile)
    }
}

fn read_u16s<R: Read>(r: &mut R, count: usize, what: &str) -> Result<Vec<u16>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(r.read_u16::<LittleEndian>().codec(what)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_tile() -> NavTileData {
        NavTileData {
            tile_x: 2,
            tile_y: 5,
            layer: 1,
            walkable_height: 2.0,
            walkable_radius: 0.5,
            walkable_climb: 0.4,
            bmin: Vec3::new(0.0, -1.0, 0.0),
            bmax: Vec3::new(8.0, 3.0, 8.0),
            cs: 1.0,
            ch: 0.5,
            max_verts_per_poly: 3,
            verts: vec![[0, 2, 0], [0, 2, 4], [4, 2, 4]],
            polys: vec![0, 1, 2, 0xffff, 0x8002, 0xffff],
            poly_flags: vec![1],
            poly_areas: vec![63],
            poly_clusters: vec![0],
            detail_meshes: vec![[0, 3, 0, 1]],
            detail_verts: vec![Vec3::ZERO, Vec3::Z * 4.0, Vec3::new(4.0, 0.0, 4.0)],
            detail_tris: vec![[0, 1, 2, 0x15]],
            off_mesh: vec![OffMeshConnection {
                start: Vec3::new(1.0, 0.0, 1.0),
                end: Vec3::new(1.0, 2.0, 6.0),
                radius: 0.5,
                flags: 1,
                area: 63,
                kind: OFFMESH_POINT | OFFMESH_BIDIR,
                user_id: 42,
            }],
            segments: Vec::new(),
            clusters: vec![TileCluster {
                center: Vec3::new(1.3, 0.0, 2.6),
                links: vec![],
            }],
        }
    }

    #[test]
    fn test_tile_record_round_trip() {
        let tile = triangle_tile();
        let bytes = tile.encode().unwrap();
        let header = TileHeader::peek(&bytes).unwrap();
        assert_eq!((header.tile_x, header.tile_y, header.layer), (2, 5, 1));
        assert_eq!(header.poly_count, 1);
        assert_eq!(header.vert_count, 3);
        assert_eq!(NavTileData::decode(&bytes).unwrap(), tile);
    }

    #[test]
    fn test_rejects_inconsistent_tiles() {
        let mut tile = triangle_tile();
        tile.poly_flags.clear();
        assert!(matches!(tile.encode(), Err(Error::Codec(_))));
    }

    #[test]
    fn test_rejects_bad_records() {
        let bytes = triangle_tile().encode().unwrap();
        assert!(matches!(NavTileData::decode(&bytes[..bytes.len() - 1]), Err(Error::Codec(_))));

        let mut bad_version = bytes.clone();
        bad_version[4..8].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(NavTileData::decode(&bad_version), Err(Error::Codec(_))));
        assert!(matches!(TileHeader::peek(&[1, 2, 3]), Err(Error::Codec(_))));
    }
}
