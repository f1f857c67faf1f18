//! Reader and writer for the native map database.
//!
//! The version tag is the first field; every later schema addition is gated
//! on a version threshold so any older file can still be read. The writer
//! always emits the current version with every field, in exactly the order
//! the reader consumes them.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::{debug, info, warn};

use crate::beatmap::{BeatmapSet, Difficulty, Origin};
use crate::db::{backup_stale, LoadContext, Reader, Settings, Writer, MAPS_DB_VERSION};
use crate::errors::{DbError, DbResult};
use crate::hash::ContentHash;
use crate::notify::Notifier;
use crate::overrides::MapOverrides;
use crate::stars::{SrGrid, NUM_MOD_COMBOS, NUM_SPEEDS, RATINGS_PER_MAP};
use crate::timing::unix_from_stored;

/// Size of one serialized timing-point record in map files that still
/// carried them (versions before 20240812).
const TIMING_RECORD_BYTES: u64 = 19;

/// Everything read from the native map database, staged for publishing.
#[derive(Default)]
pub struct NativeMaps {
    /// Version found in the file, 0 when the file was absent/empty.
    pub version: u32,
    /// Sets read from the file.
    pub sets: Vec<BeatmapSet>,
    /// The override section.
    pub overrides: HashMap<ContentHash, MapOverrides>,
    /// The star-rating section, absent entirely for older versions or
    /// when the stored grid layout doesn't match this build.
    pub star_ratings: HashMap<ContentHash, Box<SrGrid>>,
    /// Hashes of difficulties whose loudness is not yet computed.
    pub loudness_pending: Vec<ContentHash>,
}

/// Read the native map database. A missing or empty file yields an empty
/// result; a file from the future is refused with a toast so a newer
/// build's data cannot be corrupted.
pub fn read(
    path: &Path,
    settings: &Settings,
    ctx: &LoadContext,
    notifier: &dyn Notifier,
) -> DbResult<NativeMaps> {
    let mut reader = Reader::open(path);
    let mut out = NativeMaps::default();

    if reader.total_size == 0 {
        return Ok(out);
    }

    let version = reader.read_u32();
    if !reader.good() || version == 0 {
        ctx.finish_file(reader.total_size);
        return Err(DbError::InvalidDatabase {
            path: path.display().to_string(),
            reason: "missing version header".to_owned(),
        });
    }
    if version > MAPS_DB_VERSION {
        notifier.toast(&format!(
            "beatdb_maps.db version unknown ({}), maps will not load.",
            version
        ));
        ctx.finish_file(reader.total_size);
        return Err(DbError::InvalidDatabase {
            path: path.display().to_string(),
            reason: format!("version {} is newer than {}", version, MAPS_DB_VERSION),
        });
    }
    if version < MAPS_DB_VERSION {
        backup_stale(path, version, MAPS_DB_VERSION);
    }
    out.version = version;

    let nb_sets = reader.read_u32();
    for _ in 0..nb_sets {
        if ctx.is_cancelled() {
            return Err(DbError::Cancelled);
        }
        ctx.report(reader.position());

        let set_id = reader.read_i32();
        let nb_diffs = reader.read_u16();
        if !reader.good() {
            break;
        }

        let folder = native_set_folder(settings, set_id);
        let mut diffs: Vec<Difficulty> = Vec::with_capacity(nb_diffs as usize);

        for _ in 0..nb_diffs {
            let diff = read_difficulty(&mut reader, version, set_id, &folder);
            if !reader.good() {
                break;
            }
            // mapsets with id -1 were saved by mistake: consume their
            // bytes but keep nothing
            if set_id == -1 {
                debug!("skipped set_id=-1 difficulty with hash {}", diff.hash);
                continue;
            }
            diffs.push(diff);
        }
        if !reader.good() {
            // truncated mid-set: keep the complete sets read so far
            warn!(
                "native map db truncated at {} of {} bytes",
                reader.position(),
                reader.total_size
            );
            break;
        }
        if set_id == -1 || diffs.is_empty() {
            continue;
        }

        for diff in diffs.iter_mut() {
            if diff.hash.is_suspicious() {
                let osu_path = format!("{}{}", diff.folder, diff.osu_filename);
                if let Some(hash) = ContentHash::recalculate(&osu_path) {
                    debug!("recalculated hash {} for {}", hash, osu_path);
                    diff.hash = hash;
                }
            }
            if diff.loudness == 0.0 {
                out.loudness_pending.push(diff.hash);
            }
        }

        out.sets.push(BeatmapSet {
            set_id,
            folder,
            origin: Origin::Native,
            difficulties: diffs,
        });
    }

    if reader.good() && version >= 20240812 {
        let nb_overrides = reader.read_u32();
        for _ in 0..nb_overrides {
            let (hash, over) = read_override(&mut reader, version);
            if !reader.good() {
                break;
            }
            out.overrides.insert(hash, over);
        }
    }

    if reader.good() && version >= 20260202 {
        read_star_section(&mut reader, &mut out);
    }

    ctx.finish_file(reader.total_size);
    info!(
        "native maps: {} sets, {} overrides, {} star entries",
        out.sets.len(),
        out.overrides.len(),
        out.star_ratings.len()
    );
    Ok(out)
}

fn native_set_folder(settings: &Settings, set_id: i32) -> String {
    let mut folder = settings
        .data_dir
        .join("maps")
        .join(set_id.to_string())
        .display()
        .to_string();
    folder.push('/');
    folder
}

fn read_difficulty(reader: &mut Reader, version: u32, set_id: i32, folder: &str) -> Difficulty {
    let mut diff = Difficulty {
        set_id,
        folder: folder.to_owned(),
        origin: Origin::Native,
        ..Difficulty::default()
    };

    diff.osu_filename = reader.read_string();
    diff.map_id = reader.read_i32();
    diff.title = reader.read_string();
    diff.audio_filename = reader.read_string();
    diff.length_ms = reader.read_i32();
    diff.stack_leniency = reader.read_f32();
    diff.artist = reader.read_string();
    diff.creator = reader.read_string();
    diff.diff_name = reader.read_string();
    diff.source = reader.read_string();
    diff.tags = reader.read_string();

    diff.hash = if version >= 20260202 {
        reader.read_hash_digest()
    } else {
        reader.read_hash_chars()
    };

    diff.ar = reader.read_f32();
    diff.cs = reader.read_f32();
    diff.hp = reader.read_f32();
    diff.od = reader.read_f32();
    diff.slider_multiplier = reader.read_f64();
    diff.preview_ms = reader.read_u32();
    diff.last_modification = unix_from_stored(reader.read_i64());
    diff.local_offset = reader.read_i16();
    diff.online_offset = reader.read_i16();
    diff.num_circles = reader.read_u16();
    diff.num_sliders = reader.read_u16();
    diff.num_spinners = reader.read_u16();
    diff.stars_nomod = reader.read_f64();

    // the BPM triple is always present but only trustworthy from 20251209
    // on; older values are left at the recompute sentinel
    if version >= 20251209 {
        diff.min_bpm = reader.read_i32();
        diff.max_bpm = reader.read_i32();
        diff.avg_bpm = reader.read_i32();
    } else {
        reader.skip_bytes(4 * 3);
    }

    if version < 20240812 {
        let nb_timing_points = reader.read_u32();
        reader.skip_bytes(TIMING_RECORD_BYTES * nb_timing_points as u64);
    }
    if version >= 20240703 {
        diff.draw_background = reader.read_u8() != 0;
    }
    if version >= 20240812 {
        diff.loudness = reader.read_f32();
    }

    diff.title_unicode = diff.title.clone();
    diff.artist_unicode = diff.artist.clone();
    if version >= 20250801 {
        let title_unicode = reader.read_string();
        let artist_unicode = reader.read_string();
        if !title_unicode.trim().is_empty() {
            diff.title_unicode = title_unicode;
        }
        if !artist_unicode.trim().is_empty() {
            diff.artist_unicode = artist_unicode;
        }
    }
    if version >= 20251009 {
        diff.background_filename = reader.read_string();
    }
    if version >= 20251225 {
        diff.ppv2_version = reader.read_u32();
    }

    diff
}

fn read_override(reader: &mut Reader, version: u32) -> (ContentHash, MapOverrides) {
    let hash = if version >= 20260202 {
        reader.read_hash_digest()
    } else {
        reader.read_hash_chars()
    };

    let mut over = MapOverrides {
        local_offset: reader.read_i16(),
        online_offset: reader.read_i16(),
        star_rating: reader.read_f32(),
        loudness: reader.read_f32(),
        ..MapOverrides::default()
    };
    if version >= 20251209 {
        over.min_bpm = reader.read_i32();
        over.max_bpm = reader.read_i32();
        over.avg_bpm = reader.read_i32();
    } else {
        // leave the sentinels so the next legacy load recomputes
        reader.skip_bytes(4 * 3);
    }
    over.draw_background = reader.read_u8() != 0;
    if version >= 20251009 {
        over.background_filename = reader.read_string();
    }
    if version >= 20251225 {
        over.ppv2_version = reader.read_u32();
    }

    (hash, over)
}

fn read_star_section(reader: &mut Reader, out: &mut NativeMaps) {
    let stored_speeds = reader.read_u8() as usize;
    let stored_combos = reader.read_u8() as usize;
    let nb_entries = reader.read_u32();
    if !reader.good() {
        return;
    }

    let layout_matches = stored_speeds == NUM_SPEEDS && stored_combos == NUM_MOD_COMBOS;
    if !layout_matches {
        // layout changed; skip the stored data, a recalc will repopulate it
        debug!(
            "star ratings layout changed (stored {}x{}, current {}x{}), skipping",
            stored_speeds, stored_combos, NUM_SPEEDS, NUM_MOD_COMBOS
        );
        let entry_bytes = (crate::hash::HASH_LEN + 4 * stored_speeds * stored_combos) as u64;
        reader.skip_bytes(entry_bytes * nb_entries as u64);
        return;
    }

    out.star_ratings.reserve(nb_entries as usize);
    for _ in 0..nb_entries {
        let hash = reader.read_hash_digest();
        let mut grid: Box<SrGrid> = Box::new([0.0; RATINGS_PER_MAP]);
        for slot in grid.iter_mut() {
            *slot = reader.read_f32();
        }
        if !reader.good() {
            return;
        }
        out.star_ratings.insert(hash, grid);
    }
}

/// Write the native map database at the current version.
///
/// Only natively-owned sets are persisted, deduplicated by folder path
/// (redundant entries can arise from the scanner and `add_set` paths).
/// Overrides with suspicious hashes are dropped so a bad read can never
/// poison the file.
pub fn write(
    path: &Path,
    sets: &[BeatmapSet],
    overrides: &HashMap<ContentHash, MapOverrides>,
    star_ratings: &HashMap<ContentHash, Box<SrGrid>>,
) -> DbResult<()> {
    let mut writer = Writer::create(path);

    let mut folders_written: HashSet<&str> = HashSet::new();
    let native_sets: Vec<&BeatmapSet> = sets
        .iter()
        .filter(|set| set.origin == Origin::Native)
        .filter(|set| folders_written.insert(set.folder.as_str()))
        .collect();

    writer.write_u32(MAPS_DB_VERSION);
    writer.write_u32(native_sets.len() as u32);

    let mut nb_diffs = 0_u32;
    for set in native_sets {
        writer.write_i32(set.set_id);
        writer.write_u16(set.difficulties.len() as u16);

        for diff in set.difficulties.iter() {
            writer.write_string(&diff.osu_filename);
            writer.write_i32(diff.map_id);
            writer.write_string(&diff.title);
            writer.write_string(&diff.audio_filename);
            writer.write_i32(diff.length_ms);
            writer.write_f32(diff.stack_leniency);
            writer.write_string(&diff.artist);
            writer.write_string(&diff.creator);
            writer.write_string(&diff.diff_name);
            writer.write_string(&diff.source);
            writer.write_string(&diff.tags);
            writer.write_hash_digest(&diff.hash);
            writer.write_f32(diff.ar);
            writer.write_f32(diff.cs);
            writer.write_f32(diff.hp);
            writer.write_f32(diff.od);
            writer.write_f64(diff.slider_multiplier);
            writer.write_u32(diff.preview_ms);
            writer.write_i64(diff.last_modification);
            writer.write_i16(diff.local_offset);
            writer.write_i16(diff.online_offset);
            writer.write_u16(diff.num_circles);
            writer.write_u16(diff.num_sliders);
            writer.write_u16(diff.num_spinners);
            writer.write_f64(diff.stars_nomod);
            writer.write_i32(diff.min_bpm);
            writer.write_i32(diff.max_bpm);
            writer.write_i32(diff.avg_bpm);
            writer.write_u8(diff.draw_background as u8);
            writer.write_f32(diff.loudness);
            writer.write_string(&diff.title_unicode);
            writer.write_string(&diff.artist_unicode);
            writer.write_string(&diff.background_filename);
            writer.write_u32(diff.ppv2_version);

            nb_diffs += 1;
        }
    }

    let real_overrides: Vec<(&ContentHash, &MapOverrides)> = overrides
        .iter()
        .filter(|(hash, _)| !hash.is_suspicious())
        .collect();

    writer.write_u32(real_overrides.len() as u32);
    for (hash, over) in real_overrides.iter() {
        writer.write_hash_digest(hash);
        writer.write_i16(over.local_offset);
        writer.write_i16(over.online_offset);
        writer.write_f32(over.star_rating);
        writer.write_f32(over.loudness);
        writer.write_i32(over.min_bpm);
        writer.write_i32(over.max_bpm);
        writer.write_i32(over.avg_bpm);
        writer.write_u8(over.draw_background as u8);
        writer.write_string(&over.background_filename);
        writer.write_u32(over.ppv2_version);
    }

    writer.write_u8(NUM_SPEEDS as u8);
    writer.write_u8(NUM_MOD_COMBOS as u8);
    writer.write_u32(star_ratings.len() as u32);
    for (hash, grid) in star_ratings.iter() {
        writer.write_hash_digest(hash);
        for value in grid.iter() {
            writer.write_f32(*value);
        }
    }

    writer.finish()?;
    info!(
        "saved {} maps, {} overrides, {} star entries to {}",
        nb_diffs,
        real_overrides.len(),
        star_ratings.len(),
        path.display()
    );
    Ok(())
}
