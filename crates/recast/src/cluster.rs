//! Coarse connectivity graph of a layer
//!
//! One cluster per region, placed at the average of the region outline and
//! linked to the clusters of neighbouring regions. The runtime uses it for
//! hierarchical path queries across tiles.

use crate::contour::ContourSet;
use crate::polymesh::PolyMesh;
use glam::Vec3;
use recast_common::Result;

/// Cluster index meaning "no cluster"
pub const NULL_CLUSTER: u16 = 0xffff;

#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Region the cluster was built from
    pub region: u16,
    /// World-space centre
    pub center: Vec3,
    /// Indices of neighbouring clusters
    pub links: Vec<u16>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterSet {
    pub clusters: Vec<Cluster>,
    /// Cluster index of each polygon, filled by [`ClusterSet::update_poly_map`]
    pub poly_map: Vec<u16>,
    reg_map: Vec<u16>,
}

impl ClusterSet {
    /// Builds clusters from region outlines
    pub fn build(cset: &ContourSet) -> Result<Self> {
        let max_reg = cset.contours.iter().map(|c| c.reg).max().unwrap_or(0) as usize;
        let mut reg_map = vec![NULL_CLUSTER; max_reg + 1];
        let mut clusters: Vec<Cluster> = Vec::new();

        for contour in &cset.contours {
            if contour.verts.is_empty() || reg_map[contour.reg as usize] != NULL_CLUSTER {
                continue;
            }
            let sum = contour.verts.iter().fold(Vec3::ZERO, |acc, v| {
                acc + Vec3::new(v.x as f32, v.y as f32, v.z as f32)
            });
            let avg = sum / contour.verts.len() as f32;
            let center = cset.bmin + Vec3::new(avg.x * cset.cs, avg.y * cset.ch, avg.z * cset.cs);

            reg_map[contour.reg as usize] = clusters.len() as u16;
            clusters.push(Cluster {
                region: contour.reg,
                center,
                links: Vec::new(),
            });
        }

        for contour in &cset.contours {
            let own = reg_map[contour.reg as usize];
            if own == NULL_CLUSTER {
                continue;
            }
            for v in &contour.verts {
                let Some(nei) = v.neighbour_region() else {
                    continue;
                };
                let Some(&other) = reg_map.get(nei as usize) else {
                    continue;
                };
                if nei == 0 || other == NULL_CLUSTER || other == own {
                    continue;
                }
                let links = &mut clusters[own as usize].links;
                if !links.contains(&other) {
                    links.push(other);
                }
            }
        }

        Ok(Self {
            clusters,
            poly_map: Vec::new(),
            reg_map,
        })
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Cluster of the given region
    pub fn cluster_of_region(&self, reg: u16) -> Option<u16> {
        self.reg_map
            .get(reg as usize)
            .copied()
            .filter(|&c| c != NULL_CLUSTER)
    }

    /// Assigns every polygon of `mesh` to the cluster of its region
    pub fn update_poly_map(&mut self, mesh: &PolyMesh) {
        self.poly_map = mesh
            .regs
            .iter()
            .map(|&r| self.cluster_of_region(r).unwrap_or(NULL_CLUSTER))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::{Contour, ContourVertex};

    fn square(reg: u16, x0: i32, neighbour_on_right: u16) -> Contour {
        let verts = vec![
            ContourVertex::new(x0, 0, 0, 0),
            ContourVertex::new(x0, 0, 4, 0),
            ContourVertex::new(x0 + 4, 0, 4, neighbour_on_right as u32),
            ContourVertex::new(x0 + 4, 0, 0, 0),
        ];
        Contour {
            raw_verts: verts.clone(),
            verts,
            reg,
            area: 63,
        }
    }

    fn set(contours: Vec<Contour>) -> ContourSet {
        ContourSet {
            contours,
            bmin: Vec3::new(10.0, 0.0, 0.0),
            bmax: Vec3::new(18.0, 4.0, 4.0),
            cs: 1.0,
            ch: 0.5,
            width: 8,
            height: 4,
            border_size: 0,
            max_error: 1.3,
        }
    }

    #[test]
    fn test_clusters_link_neighbours() {
        let mut right = square(2, 4, 0);
        right.verts[0].flags = 1;
        let clusters = ClusterSet::build(&set(vec![square(1, 0, 2), right])).unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters.clusters[0].links, vec![1]);
        assert_eq!(clusters.clusters[1].links, vec![0]);
        assert!((clusters.clusters[0].center - Vec3::new(12.0, 0.0, 2.0)).length() < 1e-5);
        assert_eq!(clusters.cluster_of_region(2), Some(1));
        assert_eq!(clusters.cluster_of_region(7), None);
    }

    #[test]
    fn test_empty_set() {
        let clusters = ClusterSet::build(&set(Vec::new())).unwrap();
        assert!(clusters.is_empty());
    }
}
