//! On-disk database formats: path/type resolution, the binary layer, and
//! the per-format readers and writers.

pub mod binary;
pub mod legacy_maps;
pub mod maps;
pub mod scores;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use log::{debug, warn};

use crate::errors::{DbError, DbResult};

pub use self::binary::{Reader, Writer};

/// Version written to the native map database.
pub const MAPS_DB_VERSION: u32 = 20260202;

/// Version written to the native score database.
pub const SCORES_DB_VERSION: u32 = 20240725;

/// Newest legacy map database version this build understands.
pub const LEGACY_MAPS_MAX_VERSION: u32 = 20260202;

/// Magic prefix of the native score database (raw bytes, not
/// length-prefixed).
pub const SCORES_MAGIC: &[u8; 5] = b"NEOSC";

/// The known database kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DbKind {
    /// The native score database (`<pkg>_scores.db`).
    NativeScores,
    /// The native map database (`<pkg>_maps.db`).
    NativeMaps,
    /// A legacy score database in the variant-A or variant-B format
    /// (`scores.db` in the data directory; the two variants share a path
    /// and are told apart by version).
    LegacyScores,
    /// The third-party stable client's score database
    /// (`scores.db` in its install folder).
    StableScores,
    /// The third-party stable client's map database (`osu!.db`).
    StableMaps,
    /// The third-party stable client's collections (`collection.db`).
    StableCollections,
    /// Locally-kept collections (`collections.db` in the data directory).
    Collections,
}

/// The configuration the engine consumes. Nothing else affects its
/// behavior.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Directory holding the native databases and backups.
    pub data_dir: PathBuf,
    /// Install folder of the third-party stable client.
    pub stable_folder: PathBuf,
    /// Songs folder, relative to `stable_folder` unless absolute.
    pub songs_subfolder: PathBuf,
    /// Whether the legacy map database may be read at all. When disabled
    /// (or the file is unreadable) the raw folder scanner takes over.
    pub legacy_db_enabled: bool,
}

impl Settings {
    /// Settings rooted at a data directory, with the legacy paths unset.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Settings {
        Settings {
            data_dir: data_dir.into(),
            stable_folder: PathBuf::new(),
            songs_subfolder: PathBuf::from("Songs"),
            legacy_db_enabled: true,
        }
    }

    /// The folder scanned for raw beatmap directories.
    pub fn songs_folder(&self) -> PathBuf {
        if self.songs_subfolder.is_absolute() {
            self.songs_subfolder.clone()
        } else {
            self.stable_folder.join(&self.songs_subfolder)
        }
    }
}

/// The canonical path for a database kind. Native kinds live under the
/// data directory; legacy kinds are derived from the configured stable
/// install folder.
pub fn path_for(kind: DbKind, settings: &Settings) -> PathBuf {
    match kind {
        DbKind::NativeScores => settings.data_dir.join("beatdb_scores.db"),
        DbKind::NativeMaps => settings.data_dir.join("beatdb_maps.db"),
        DbKind::LegacyScores => settings.data_dir.join("scores.db"),
        DbKind::Collections => settings.data_dir.join("collections.db"),
        DbKind::StableScores => settings.stable_folder.join("scores.db"),
        // note the missing plural
        DbKind::StableCollections => settings.stable_folder.join("collection.db"),
        DbKind::StableMaps => settings.stable_folder.join("osu!.db"),
    }
}

/// Classify a foreign file for import.
///
/// Decision order: exact filename matches identify the collection formats
/// and the native score file; a file named `scores.db` is sniffed by
/// header. Version `20210106`/`20210108`/`20210110` is variant-A. Anything
/// else requires walking to the first score of the first beatmap that has
/// one: variant-B stores an i64 timestamp there whose high 32 bits are
/// zero, while the stable format stores a hash string, which never has a
/// zero 32-bit word at that position.
///
/// Only reads file headers; fails with `InvalidDatabase` and nothing else.
pub fn kind_of(path: &Path) -> DbResult<DbKind> {
    let invalid = |reason: &str| DbError::InvalidDatabase {
        path: path.display().to_string(),
        reason: reason.to_owned(),
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match file_name.as_str() {
        "collection.db" => return Ok(DbKind::StableCollections),
        "collections.db" => return Ok(DbKind::Collections),
        "beatdb_scores.db" => return Ok(DbKind::NativeScores),
        "scores.db" => {}
        _ => return Err(invalid("unrecognized file name")),
    }

    let mut reader = Reader::open(path);
    let version = reader.read_u32();
    if !reader.good() || version == 0 {
        return Err(invalid("unreadable version header"));
    }

    if matches!(version, 20210106 | 20210108 | 20210110) {
        return Ok(DbKind::LegacyScores);
    }

    let nb_beatmaps = reader.read_u32();
    for _ in 0..nb_beatmaps {
        let _hash = reader.read_hash_chars();
        let nb_scores = reader.read_u32();
        if !reader.good() {
            return Err(invalid("truncated score header"));
        }
        if nb_scores == 0 {
            // no score bytes follow, try the next beatmap record
            continue;
        }

        reader.read_u8(); // gamemode
        reader.read_u32(); // per-score version

        // variant-B stores an i64 unix timestamp here, whose high half
        // stays zero until 2106; the stable format stores a hash string,
        // and neither its length prefix nor its hex text contains a zero
        // 32-bit word
        reader.read_u32(); // timestamp low half / string prefix
        let timestamp_check = reader.read_u32();
        if !reader.good() {
            return Err(invalid("truncated score header"));
        }
        return if timestamp_check == 0 {
            Ok(DbKind::LegacyScores)
        } else {
            Ok(DbKind::StableScores)
        };
    }

    // zero beatmaps, or none with any scores
    Err(invalid("no inspectable score"))
}

/// Cancellation flag and byte-based progress, shared between the loader
/// task and every database reader.
///
/// Progress is a single fraction in [0, 1]: total file sizes are summed
/// during discovery, each reader reports its position as it goes, and the
/// published value is clamped to [0.01, 0.99] until the load completes.
pub struct LoadContext {
    cancel: AtomicBool,
    progress_bits: AtomicU32,
    bytes_processed: AtomicU64,
    total_bytes: AtomicU64,
}

impl Default for LoadContext {
    fn default() -> LoadContext {
        LoadContext {
            cancel: AtomicBool::new(false),
            progress_bits: AtomicU32::new(0),
            bytes_processed: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
        }
    }
}

impl LoadContext {
    /// Reset all counters for a fresh load. The cancel flag is cleared.
    pub fn reset(&self) {
        self.cancel.store(false, Ordering::Release);
        self.progress_bits.store(0, Ordering::Release);
        self.bytes_processed.store(0, Ordering::Release);
        self.total_bytes.store(0, Ordering::Release);
    }

    /// Ask the loader to stop at its next granularity point.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Add a file's size to the total used for progress fractions.
    pub fn add_total_bytes(&self, bytes: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Mark a whole file as consumed.
    pub fn finish_file(&self, bytes: u64) {
        self.bytes_processed.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Publish progress for a position inside the file currently being
    /// read, clamped so the value never looks idle or finished mid-load.
    /// Once cancellation forces the finished state, reports are dropped.
    pub fn report(&self, position_in_file: u64) {
        if self.is_cancelled() {
            return;
        }
        let done = self.bytes_processed.load(Ordering::Acquire) + position_in_file;
        let total = self.total_bytes.load(Ordering::Acquire);
        let fraction = if total == 0 {
            0.5
        } else {
            (done as f64 / total as f64).clamp(0.01, 0.99) as f32
        };
        self.set_progress(fraction);
    }

    /// Publish an absolute progress value.
    pub fn set_progress(&self, progress: f32) {
        self.progress_bits
            .store(progress.to_bits(), Ordering::Release);
    }

    /// Current progress in [0, 1].
    pub fn progress(&self) -> f32 {
        f32::from_bits(self.progress_bits.load(Ordering::Acquire))
    }
}

/// Copy a database to a timestamped backup before anything can overwrite
/// it. Invoked whenever a reader encounters a version older than the one
/// this build writes.
pub(crate) fn backup_stale(path: &Path, found_version: u32, current_version: u32) {
    let date = chrono::Utc::now().format("%Y-%m-%d");
    let backup = format!("{}.{}-{}", path.display(), found_version, date);
    match std::fs::copy(path, &backup) {
        Ok(_) => debug!(
            "older database {} < {}, backed up {} -> {}",
            found_version,
            current_version,
            path.display(),
            backup
        ),
        Err(err) => warn!("failed to back up {}: {}", path.display(), err),
    }
}

/// Basic readability probe for the legacy map database: the file exists,
/// has a size, and carries a non-zero version.
pub fn is_legacy_maps_readable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let mut reader = Reader::open(path);
    if reader.total_size == 0 {
        return false;
    }
    let version = reader.read_u32();
    reader.good() && version > 0
}

#[cfg(test)]
mod tests {
    use super::{kind_of, path_for, DbKind, Settings};

    #[test]
    fn test_native_paths() {
        let mut settings = Settings::with_data_dir("/data");
        settings.stable_folder = "/osu".into();

        assert_eq!(
            path_for(DbKind::NativeMaps, &settings),
            std::path::Path::new("/data/beatdb_maps.db")
        );
        assert_eq!(
            path_for(DbKind::NativeScores, &settings),
            std::path::Path::new("/data/beatdb_scores.db")
        );
        assert_eq!(
            path_for(DbKind::StableMaps, &settings),
            std::path::Path::new("/osu/osu!.db")
        );
        assert_eq!(
            path_for(DbKind::StableCollections, &settings),
            std::path::Path::new("/osu/collection.db")
        );
    }

    #[test]
    fn test_songs_folder() {
        let mut settings = Settings::with_data_dir("/data");
        settings.stable_folder = "/osu".into();
        assert_eq!(settings.songs_folder(), std::path::Path::new("/osu/Songs"));

        settings.songs_subfolder = "/mnt/maps".into();
        assert_eq!(settings.songs_folder(), std::path::Path::new("/mnt/maps"));
    }

    #[test]
    fn test_kind_of_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let coll = dir.path().join("collection.db");
        std::fs::write(&coll, b"anything").unwrap();
        assert_eq!(kind_of(&coll).unwrap(), DbKind::StableCollections);

        let native = dir.path().join("beatdb_scores.db");
        std::fs::write(&native, b"anything").unwrap();
        assert_eq!(kind_of(&native).unwrap(), DbKind::NativeScores);

        let unknown = dir.path().join("whatever.bin");
        std::fs::write(&unknown, b"anything").unwrap();
        assert!(kind_of(&unknown).is_err());
    }
}
