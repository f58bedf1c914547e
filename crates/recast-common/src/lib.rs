//! Common types shared by the voxel pipeline and the tiled generator
//!
//! Holds the error type used across the workspace, the axis-aligned
//! [`Bounds`] box and a handful of scalar/2D geometry helpers.

mod bounds;
mod math;

pub use bounds::Bounds;
pub use math::*;

/// Represents a 3D position (y is up)
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input mesh: {0}")]
    InvalidMesh(String),

    #[error("navigation mesh generation failed: {0}")]
    NavMeshGeneration(String),

    #[error("recast error: {0}")]
    Recast(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed binary data: {0}")]
    Codec(String),

    #[cfg(feature = "std")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A layer produced more vertices than a 16-bit local index can address.
    #[error("vertex limit exceeded: {count} vertices (max {max})")]
    VertexLimitExceeded { count: usize, max: usize },

    /// A layer produced more polygons than the tile address budget allows.
    #[error("polygon limit exceeded: {count} polygons (max {max})")]
    PolyLimitExceeded { count: usize, max: usize },

    /// The runtime mesh refused a layer because it has no free tile slot.
    #[error("runtime mesh capacity exceeded inserting tile ({tile_x}, {tile_y}) layer {layer}")]
    CapacityExceeded { tile_x: i32, tile_y: i32, layer: i32 },

    /// The voxel pipeline ran out of a fixed id or index space, such as
    /// region ids or the layers of one tile.
    #[error("{what} limit exceeded: {count} (max {max})")]
    LimitExceeded {
        what: &'static str,
        count: usize,
        max: usize,
    },

    #[error("build aborted")]
    Aborted,
}

impl Error {
    /// Structural errors reproduce on every retry, so the tile should not be re-queued.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::VertexLimitExceeded { .. }
                | Error::PolyLimitExceeded { .. }
                | Error::CapacityExceeded { .. }
                | Error::LimitExceeded { .. }
        )
    }
}

/// Result type for recast operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        assert!(Error::VertexLimitExceeded {
            count: 70000,
            max: 65535
        }
        .is_structural());
        assert!(Error::CapacityExceeded {
            tile_x: 1,
            tile_y: 2,
            layer: 0
        }
        .is_structural());
        assert!(Error::PolyLimitExceeded { count: 9, max: 8 }.is_structural());
        assert!(Error::LimitExceeded {
            what: "region id",
            count: 65535,
            max: 32767
        }
        .is_structural());
        assert!(!Error::Aborted.is_structural());
        assert!(!Error::Recast("oom".into()).is_structural());
    }

    #[test]
    fn test_error_display() {
        let err = Error::VertexLimitExceeded {
            count: 70000,
            max: 65535,
        };
        assert_eq!(
            err.to_string(),
            "vertex limit exceeded: 70000 vertices (max 65535)"
        );
        let err = Error::LimitExceeded {
            what: "tile layer",
            count: 256,
            max: 255,
        };
        assert_eq!(err.to_string(), "tile layer limit exceeded: 256 (max 255)");
    }
}
