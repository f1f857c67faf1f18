//! Precomputed star-rating grid.
//!
//! Star ratings are precalculated for the cartesian product of a few
//! discrete speed multipliers and the difficulty-affecting mod
//! combinations. The grid layout is part of the native map file format; the
//! file header stores both dimensions so a layout change invalidates stored
//! data instead of silently misreading it.

use static_assertions::const_assert;

use crate::mods::ModFlags;

/// Discrete speed multipliers covered by the grid.
pub const SPEEDS: [f32; 3] = [0.75, 1.0, 1.5];

/// Mod combinations covered by the grid, as masks over the
/// difficulty-affecting flags.
pub const MOD_COMBOS: [ModFlags; 3] = [ModFlags::empty(), ModFlags::Easy, ModFlags::HardRock];

/// Number of speed buckets.
pub const NUM_SPEEDS: usize = SPEEDS.len();

/// Number of mod-combination buckets.
pub const NUM_MOD_COMBOS: usize = MOD_COMBOS.len();

/// Ratings stored per map, speed-major.
pub const RATINGS_PER_MAP: usize = NUM_SPEEDS * NUM_MOD_COMBOS;

// both dimensions are stored as u8 in the file header
const_assert!(NUM_SPEEDS <= u8::MAX as usize);
const_assert!(NUM_MOD_COMBOS <= u8::MAX as usize);

/// The precomputed ratings of one difficulty.
pub type SrGrid = [f32; RATINGS_PER_MAP];

/// Map a mod selection to its grid slot. Returns `None` when the speed is
/// not one of the precalculated buckets or the difficulty-affecting flags
/// form a combination the grid doesn't cover.
pub fn bucket_index(flags: ModFlags, speed: f32) -> Option<usize> {
    let combo = flags & (ModFlags::Easy | ModFlags::HardRock);
    let combo_idx = MOD_COMBOS.iter().position(|&m| m == combo)?;
    let speed_idx = SPEEDS.iter().position(|&s| (s - speed).abs() < 1e-3)?;
    Some(speed_idx * NUM_MOD_COMBOS + combo_idx)
}
