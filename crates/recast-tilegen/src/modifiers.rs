//! Area modifiers, off-mesh links and area classes
//!
//! A modifier paints an area id onto the walkable surface inside a shape.
//! Modifiers gathered together with geometry are baked into the compact
//! heightfield (static); the rest are painted onto decompressed layers
//! (dynamic) and only cost a layer rebuild when they change.

use glam::Vec3;
use recast::{NULL_AREA, WALKABLE_AREA};
use recast_common::{Bounds, Error, Result};
use std::collections::HashMap;

/// Number of distinct area ids
pub const MAX_AREAS: usize = 64;

/// Opaque identifier of an area class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct AreaClass(pub u32);

impl AreaClass {
    /// Unwalkable; painting it removes the surface
    pub const NULL: AreaClass = AreaClass(0);
    /// Plain walkable ground
    pub const DEFAULT: AreaClass = AreaClass(1);
}

/// Volume a modifier applies to
#[derive(Debug, Clone, PartialEq)]
pub enum AreaShape {
    /// Upright cylinder; `origin` is the centre of the bottom cap
    Cylinder { origin: Vec3, radius: f32, height: f32 },
    Box { center: Vec3, extent: Vec3 },
    /// Convex outline in the xz plane between two heights
    Convex { points: Vec<Vec3>, min_y: f32, max_y: f32 },
}

impl AreaShape {
    pub fn bounds(&self) -> Bounds {
        match self {
            AreaShape::Cylinder {
                origin,
                radius,
                height,
            } => Bounds::new(
                Vec3::new(origin.x - radius, origin.y, origin.z - radius),
                Vec3::new(origin.x + radius, origin.y + height, origin.z + radius),
            ),
            AreaShape::Box { center, extent } => Bounds::from_center_extent(*center, *extent),
            AreaShape::Convex {
                points,
                min_y,
                max_y,
            } => {
                let mut bounds = Bounds::from_points(points);
                if bounds.is_valid() {
                    bounds.min.y = *min_y;
                    bounds.max.y = *max_y;
                }
                bounds
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AreaModifier {
    pub class: AreaClass,
    pub shape: AreaShape,
    /// Extend the shape downwards by the agent height so agents standing
    /// below it are affected too
    pub include_agent_height: bool,
}

impl AreaModifier {
    pub fn new(class: AreaClass, shape: AreaShape) -> Self {
        Self {
            class,
            shape,
            include_agent_height: false,
        }
    }

    pub fn with_agent_height(mut self) -> Self {
        self.include_agent_height = true;
        self
    }

    pub fn bounds(&self) -> Bounds {
        self.shape.bounds()
    }
}

/// Point-to-point off-mesh connection
#[derive(Debug, Clone, PartialEq)]
pub struct OffMeshLink {
    pub left: Vec3,
    pub right: Vec3,
    pub snap_radius: f32,
    pub bidirectional: bool,
    pub user_id: u32,
    /// Area class of the link; the default walkable class when unset
    pub area_class: Option<AreaClass>,
}

impl OffMeshLink {
    pub fn new(left: Vec3, right: Vec3, snap_radius: f32) -> Self {
        Self {
            left,
            right,
            snap_radius,
            bidirectional: true,
            user_id: 0,
            area_class: None,
        }
    }
}

/// Off-mesh connection between two segments
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentLink {
    pub left_start: Vec3,
    pub left_end: Vec3,
    pub right_start: Vec3,
    pub right_end: Vec3,
    pub snap_radius: f32,
    pub bidirectional: bool,
    pub user_id: u32,
    pub area_class: Option<AreaClass>,
}

/// Everything a single navigation element contributes besides geometry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositeModifier {
    pub areas: Vec<AreaModifier>,
    pub links: Vec<OffMeshLink>,
    pub segment_links: Vec<SegmentLink>,
}

impl CompositeModifier {
    pub fn is_empty(&self) -> bool {
        self.areas.is_empty() && self.links.is_empty() && self.segment_links.is_empty()
    }

    pub fn with_area(mut self, area: AreaModifier) -> Self {
        self.areas.push(area);
        self
    }

    pub fn with_link(mut self, link: OffMeshLink) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_segment_link(mut self, link: SegmentLink) -> Self {
        self.segment_links.push(link);
        self
    }

    /// Union of every area shape and link endpoint
    pub fn bounds(&self) -> Bounds {
        let mut bounds = Bounds::empty();
        for area in &self.areas {
            bounds = bounds.union(&area.bounds());
        }
        for link in &self.links {
            bounds.add_point(link.left);
            bounds.add_point(link.right);
        }
        for link in &self.segment_links {
            for p in [link.left_start, link.left_end, link.right_start, link.right_end] {
                bounds.add_point(p);
            }
        }
        bounds
    }
}

/// Maps area classes to area ids, traversal flags and costs
#[derive(Debug, Clone)]
pub struct AreaClassRegistry {
    ids: HashMap<AreaClass, u8>,
    flags: [u16; MAX_AREAS],
    costs: [f32; MAX_AREAS],
    default_class: AreaClass,
}

impl Default for AreaClassRegistry {
    fn default() -> Self {
        let mut registry = Self {
            ids: HashMap::new(),
            flags: [0; MAX_AREAS],
            costs: [1.0; MAX_AREAS],
            default_class: AreaClass::DEFAULT,
        };
        registry.ids.insert(AreaClass::NULL, NULL_AREA);
        registry.costs[NULL_AREA as usize] = f32::MAX;
        registry.ids.insert(AreaClass::DEFAULT, WALKABLE_AREA);
        registry.flags[WALKABLE_AREA as usize] = 1;
        registry
    }
}

impl AreaClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `class` as area `id`. Re-registering a class moves it.
    pub fn register(&mut self, class: AreaClass, id: u8, flags: u16, cost: f32) -> Result<()> {
        if id as usize >= MAX_AREAS {
            return Err(Error::InvalidConfig(format!(
                "area id {} out of range (max {})",
                id,
                MAX_AREAS - 1
            )));
        }
        if let Some((other, _)) = self.ids.iter().find(|(c, i)| **i == id && **c != class) {
            return Err(Error::InvalidConfig(format!(
                "area id {} already used by class {}",
                id, other.0
            )));
        }
        self.ids.insert(class, id);
        self.flags[id as usize] = flags;
        self.costs[id as usize] = cost;
        Ok(())
    }

    pub fn area_id(&self, class: AreaClass) -> Option<u8> {
        self.ids.get(&class).copied()
    }

    pub fn flags(&self, area: u8) -> u16 {
        self.flags.get(area as usize).copied().unwrap_or(0)
    }

    pub fn cost(&self, area: u8) -> f32 {
        self.costs.get(area as usize).copied().unwrap_or(f32::MAX)
    }

    /// Cost of a class; unregistered classes sort last
    pub fn class_cost(&self, class: AreaClass) -> f32 {
        self.area_id(class).map_or(f32::MAX, |id| self.cost(id))
    }

    pub fn default_class(&self) -> AreaClass {
        self.default_class
    }

    pub fn set_default_class(&mut self, class: AreaClass) {
        self.default_class = class;
    }
}

/// Order in which modifiers are painted. Later modifiers overwrite earlier
/// ones where they overlap.
pub trait AreaOrdering: Send + Sync {
    fn sort_areas(&self, areas: &mut [AreaModifier], registry: &AreaClassRegistry);
}

/// Paints cheap areas first so expensive ones, and null areas last of all,
/// win where they overlap. Equal costs keep their supplied order.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostOrdering;

impl AreaOrdering for CostOrdering {
    fn sort_areas(&self, areas: &mut [AreaModifier], registry: &AreaClassRegistry) {
        areas.sort_by(|a, b| {
            registry
                .class_cost(a.class)
                .total_cmp(&registry.class_cost(b.class))
        });
    }
}
