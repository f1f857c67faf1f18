//! # beatdb
//!
//! `beatdb` is the beatmap / score / overrides database engine of a desktop
//! rhythm-game client. It unifies several heterogeneous on-disk database
//! formats (native, legacy, and third-party) plus raw on-disk beatmap
//! folders into one coherent in-memory catalog, keeps that catalog
//! consistent under background loading, incremental rescans, imports and
//! saves, and persists it back across version migrations.
//!
//! The entry point is [`catalog::Database`]: construct it over a
//! [`db::Settings`], call [`catalog::Database::load`], poll
//! [`catalog::Database::progress`], and query away.

#![deny(missing_docs)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate num_derive;
#[macro_use]
extern crate thiserror;

/// Difficulties and sets
pub mod beatmap;
/// The in-memory catalog, loader and query surface
pub mod catalog;
/// On-disk database formats (paths, binary layer, readers/writers)
pub mod db;
/// Engine error kinds
pub mod errors;
/// Content hashes
pub mod hash;
/// Mod flags and packed mod selections
pub mod mods;
/// Collaborator hooks (toasts, browser, replay sink)
pub mod notify;
/// Metadata-only chart file parsing
pub mod osu_file;
/// Per-map overrides on top of read-only legacy data
pub mod overrides;
/// Finished scores and sort orders
pub mod score;
/// The precomputed star-rating grid
pub mod stars;
/// Tick-epoch timestamps and BPM derivation
pub mod timing;

/// Exports everything in the library.
pub mod prelude {
    pub use crate::beatmap::*;
    pub use crate::catalog::*;
    pub use crate::db::*;
    pub use crate::errors::*;
    pub use crate::hash::*;
    pub use crate::mods::*;
    pub use crate::notify::*;
    pub use crate::overrides::*;
    pub use crate::score::*;
    pub use crate::stars::*;
    pub use crate::timing::*;
}
