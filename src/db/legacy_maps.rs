//! Reader for the third-party stable client's map database (`osu!.db`).
//!
//! This source is read-only: the engine never writes it back, and all local
//! adjustments to maps that came from here live in the override map. The
//! file is a flat list of difficulties which get grouped into sets by their
//! set id; entries with an invalid id are further subgrouped by
//! title/artist text.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info, warn};

use crate::beatmap::{BeatmapSet, Difficulty, Origin};
use crate::db::{LoadContext, Reader, Settings, LEGACY_MAPS_MAX_VERSION};
use crate::errors::{DbError, DbResult};
use crate::hash::ContentHash;
use crate::notify::Notifier;
use crate::overrides::MapOverrides;
use crate::timing::{compute_bpm, ticks_to_unix, TimingEntry, TIMING_ENTRY_BYTES};

/// Everything read from the legacy map database, staged for publishing.
#[derive(Default)]
pub struct LegacyMaps {
    /// Sets assembled from the flat difficulty list.
    pub sets: Vec<BeatmapSet>,
    /// Hashes of difficulties whose loudness is not yet computed.
    pub loudness_pending: Vec<ContentHash>,
}

/// Read the legacy map database, applying stored overrides on top of the
/// read-only data.
pub fn read(
    path: &Path,
    settings: &Settings,
    overrides: &HashMap<ContentHash, MapOverrides>,
    ctx: &LoadContext,
    notifier: &dyn Notifier,
) -> DbResult<LegacyMaps> {
    let mut reader = Reader::open(path);
    let mut out = LegacyMaps::default();

    let version = if reader.good() && reader.total_size > 0 {
        reader.read_u32()
    } else {
        0
    };
    if version == 0 {
        ctx.finish_file(reader.total_size);
        return Err(DbError::InvalidDatabase {
            path: path.display().to_string(),
            reason: "missing version header".to_owned(),
        });
    }

    // header
    let folder_count = reader.read_u32();
    reader.read_u8(); // account unlocked
    reader.read_u64(); // unlock date
    let player_name = reader.read_string();
    let nb_beatmaps = reader.read_u32();

    debug!(
        "legacy map db: version = {}, folder_count = {}, player = {}, diffs = {}",
        version, folder_count, player_name, nb_beatmaps
    );

    if version > LEGACY_MAPS_MAX_VERSION {
        notifier.toast(&format!(
            "osu!.db version unknown ({}), osu!stable maps will not get loaded.",
            version
        ));
        ctx.finish_file(reader.total_size);
        return Err(DbError::InvalidDatabase {
            path: path.display().to_string(),
            reason: format!(
                "version {} is newer than {}",
                version, LEGACY_MAPS_MAX_VERSION
            ),
        });
    }

    let songs_folder = settings.songs_folder().display().to_string();

    // group the flat list by set id as we go
    let mut grouped: Vec<(i32, Vec<Difficulty>)> = Vec::new();
    let mut set_id_to_index: HashMap<i32, usize> = HashMap::new();

    let mut timing_buffer: Vec<TimingEntry> = Vec::new();
    let mut nb_read = 0_u32;

    for i in 0..nb_beatmaps {
        if ctx.is_cancelled() {
            return Err(DbError::Cancelled);
        }
        ctx.report(reader.position());

        let entry = read_entry(&mut reader, version, overrides, &mut timing_buffer);
        if !reader.good() {
            warn!(
                "legacy map db truncated at entry {}/{} ({} of {} bytes)",
                i,
                nb_beatmaps,
                reader.position(),
                reader.total_size
            );
            break;
        }

        let mut entry = match entry {
            Some(entry) => entry,
            None => continue, // corrupt or non-standard entry, skipped
        };

        // normalize the stored relative path and derive the folder
        entry.path = entry.path.replace('\\', "/");
        let folder = format!("{}/{}/", songs_folder.trim_end_matches('/'), entry.path);
        entry.diff.folder = folder;

        if entry.diff.hash.is_suspicious() {
            let full_path = format!("{}{}", entry.diff.folder, entry.diff.osu_filename);
            if let Some(hash) = ContentHash::recalculate(&full_path) {
                debug!("recalculated hash {} for {}", hash, full_path);
                entry.diff.hash = hash;
            } else {
                debug!("skipped entry {} with no recoverable hash", full_path);
                continue;
            }
        }

        // some old maps carry no usable set id; try the leading digits of
        // the folder name
        if entry.diff.set_id < 1 && !entry.path.is_empty() {
            let candidate = entry.path.split('/').next().unwrap_or("");
            let digits: String = candidate
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if !digits.is_empty() {
                entry.diff.set_id = digits.parse().unwrap_or(-1);
            }
        }

        if entry.diff.loudness == 0.0 {
            out.loudness_pending.push(entry.diff.hash);
        }

        let set_id = entry.diff.set_id;
        match set_id_to_index.get(&set_id) {
            Some(&idx) => {
                let diffs = &mut grouped[idx].1;
                if !diffs.iter().any(|d| d.hash == entry.diff.hash) {
                    diffs.push(entry.diff);
                }
            }
            None => {
                set_id_to_index.insert(set_id, grouped.len());
                grouped.push((set_id, vec![entry.diff]));
            }
        }
        nb_read += 1;
    }

    // build sets; invalid ids are split up by title/artist instead
    for (set_id, diffs) in grouped {
        if ctx.is_cancelled() {
            return Err(DbError::Cancelled);
        }
        if diffs.is_empty() {
            continue;
        }

        if set_id > 0 {
            let folder = diffs[0].folder.clone();
            out.sets.push(BeatmapSet {
                set_id,
                folder,
                origin: Origin::Legacy,
                difficulties: diffs,
            });
        } else {
            let mut by_title_artist: Vec<(String, Vec<Difficulty>)> = Vec::new();
            for diff in diffs {
                let key = format!("{}|{}", diff.title, diff.artist);
                match by_title_artist.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, group)) => group.push(diff),
                    None => by_title_artist.push((key, vec![diff])),
                }
            }
            for (_, group) in by_title_artist {
                let folder = group[0].folder.clone();
                out.sets.push(BeatmapSet {
                    set_id: -1,
                    folder,
                    origin: Origin::Legacy,
                    difficulties: group,
                });
            }
        }
    }

    ctx.finish_file(reader.total_size);
    info!(
        "legacy maps: {} of {} difficulties kept in {} sets",
        nb_read,
        nb_beatmaps,
        out.sets.len()
    );
    Ok(out)
}

struct Entry {
    diff: Difficulty,
    path: String,
}

/// Read one difficulty record. Returns `None` for entries that are skipped
/// (corrupt metadata or a gamemode the engine doesn't handle); the record's
/// bytes are consumed either way.
fn read_entry(
    reader: &mut Reader,
    version: u32,
    overrides: &HashMap<ContentHash, MapOverrides>,
    timing_buffer: &mut Vec<TimingEntry>,
) -> Option<Entry> {
    // entry byte size, present only in a window of versions
    if (20160408..20191106).contains(&version) {
        reader.read_u32();
    }

    let mut diff = Difficulty {
        origin: Origin::Legacy,
        ..Difficulty::default()
    };

    diff.artist = reader.read_string().trim().to_owned();
    diff.artist_unicode = reader.read_string();
    diff.title = reader.read_string().trim().to_owned();
    diff.title_unicode = reader.read_string();
    diff.creator = reader.read_string().trim().to_owned();
    diff.diff_name = reader.read_string().trim().to_owned();
    diff.audio_filename = reader.read_string();
    diff.hash = reader.read_hash_chars();
    diff.osu_filename = reader.read_string();

    let over = overrides.get(&diff.hash);

    reader.read_u8(); // ranked status
    diff.num_circles = reader.read_u16();
    diff.num_sliders = reader.read_u16();
    diff.num_spinners = reader.read_u16();
    diff.last_modification = ticks_to_unix(reader.read_i64());

    if version < 20140609 {
        diff.ar = reader.read_u8() as f32;
        diff.cs = reader.read_u8() as f32;
        diff.hp = reader.read_u8() as f32;
        diff.od = reader.read_u8() as f32;
    } else {
        diff.ar = reader.read_f32();
        diff.cs = reader.read_f32();
        diff.hp = reader.read_f32();
        diff.od = reader.read_f32();
    }

    diff.slider_multiplier = reader.read_f64();

    let mut nomod_stars = 0_f32;
    if version >= 20140609 {
        // the star rating field width changed from f64 to f32
        let wide = version < 20250108;

        let nb_std_ratings = reader.read_u32();
        for _ in 0..nb_std_ratings {
            reader.read_u8(); // int tag
            let mods = reader.read_u32();
            reader.read_u8(); // float tag
            if mods == 0 && nomod_stars == 0.0 {
                nomod_stars = if wide {
                    reader.read_f64() as f32
                } else {
                    reader.read_f32()
                };
            } else if wide {
                reader.skip_bytes(8);
            } else {
                reader.skip_bytes(4);
            }
        }

        // the other game modes only matter for skipping the right bytes
        let rating_bytes = 1 + 4 + 1 + if wide { 8 } else { 4 };
        for _ in 0..3 {
            let nb_ratings = reader.read_u32();
            reader.skip_bytes(rating_bytes * nb_ratings as u64);
        }
    }

    reader.read_u32(); // drain time, seconds
    let duration = reader.read_i32();
    diff.length_ms = duration.max(0);
    diff.preview_ms = reader.read_u32();

    let nb_timing_points = reader.read_u32();
    if let Some(over) = over.filter(|o| o.has_bpm()) {
        // cached BPM is valid, no need to parse the timing points
        reader.skip_bytes(TIMING_ENTRY_BYTES * nb_timing_points as u64);
        diff.min_bpm = over.min_bpm;
        diff.max_bpm = over.max_bpm;
        diff.avg_bpm = over.avg_bpm;
    } else if nb_timing_points > 0 {
        timing_buffer.clear();
        timing_buffer.reserve(nb_timing_points as usize);
        for _ in 0..nb_timing_points {
            timing_buffer.push(TimingEntry {
                ms_per_beat: reader.read_f64(),
                offset_ms: reader.read_f64(),
                uninherited: reader.read_u8() != 0,
            });
        }
        let bpm = compute_bpm(timing_buffer, diff.length_ms as f64);
        diff.min_bpm = bpm.min;
        diff.max_bpm = bpm.max;
        diff.avg_bpm = bpm.most_common;
    }

    diff.map_id = reader.read_i32(); // can be -1, despite what the wiki says
    diff.set_id = reader.read_i32();
    reader.read_u32(); // thread id
    reader.skip_bytes(4); // grades for the four modes

    diff.local_offset = reader.read_u16() as i16;
    diff.stack_leniency = reader.read_f32();
    let mode = reader.read_u8();

    diff.source = reader.read_string().trim().to_owned();
    diff.tags = reader.read_string().trim().to_owned();
    diff.online_offset = reader.read_u16() as i16;
    reader.skip_string(); // title font
    reader.read_u8(); // unplayed
    reader.read_u64(); // last played
    reader.read_u8(); // osz2

    // stored folder path; some entries carry stray whitespace that breaks
    // path lookups
    let path = reader.read_string().trim().to_owned();

    reader.read_u64(); // last online check
    reader.skip_bytes(5); // ignore flags, storyboard/video toggles
    if version < 20140609 {
        reader.read_u16();
    }
    reader.read_u32(); // last edit time
    reader.read_u8(); // mania scroll speed

    if !reader.good() {
        return None;
    }

    // corrupt entries have all metadata empty; checking the .osu file on
    // disk would be accurate but is far too slow for 100k+ entries
    if diff.artist.is_empty()
        && diff.title.is_empty()
        && diff.creator.is_empty()
        && diff.diff_name.is_empty()
    {
        return None;
    }
    if mode != 0 {
        return None;
    }

    if diff.title_unicode.trim().is_empty() {
        diff.title_unicode = diff.title.clone();
    }
    if diff.artist_unicode.trim().is_empty() {
        diff.artist_unicode = diff.artist.clone();
    }

    match over {
        Some(over) => diff.apply_overrides(over),
        None => {
            // negative ratings mark maps still needing a recalc pass
            if nomod_stars <= 0.0 {
                nomod_stars = -nomod_stars;
            }
            diff.stars_nomod = f64::from(nomod_stars);
            diff.draw_background = true;
        }
    }

    Some(Entry { diff, path })
}
