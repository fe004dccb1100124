//! Global constants for arp-kernel

/// Default number of segments for cylinder and revolve meshes
pub const CYLINDER_SEGMENTS: u32 = 32;

/// Default number of latitude segments for sphere mesh generation
pub const SPHERE_LAT_SEGMENTS: u32 = 16;

/// Default number of longitude segments for sphere mesh generation
pub const SPHERE_LON_SEGMENTS: u32 = 32;

/// Number of angular steps used when revolving a profile
pub const REVOLVE_SEGMENTS: u32 = 24;

/// Radius of the tubes generated for shape outlines
pub const OUTLINE_TUBE_RADIUS: f32 = 0.0005;

/// Number of sides of an outline tube
pub const OUTLINE_TUBE_SIDES: u32 = 4;

/// Distance below which two points are considered identical by the preview kernel
pub const POINT_TOLERANCE: f64 = 1e-6;

/// Prefix of the handles allocated by the preview kernel
pub const HANDLE_PREFIX: &str = "shape";
