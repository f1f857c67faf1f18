//! Readers and writer for score databases: the native format plus the
//! legacy and stable import formats.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info, warn};

use crate::db::{backup_stale, LoadContext, Reader, Writer, SCORES_DB_VERSION, SCORES_MAGIC};
use crate::errors::{DbError, DbResult};
use crate::hash::ContentHash;
use crate::mods::{LegacyFlags, ModFlags, Mods};
use crate::notify::Notifier;
use crate::score::{FinishedScore, Grade};
use crate::timing::ticks_to_unix;

/// Offset between the tick epoch and the replay-timestamp key used by the
/// stable client's replay files.
const STABLE_REPLAY_TS_OFFSET: u64 = 504_911_232_000_000_000;

/// pp algorithm version assigned to imported legacy scores (the last
/// algorithm those clients shipped).
const LEGACY_IMPORT_PPV2_VERSION: u32 = 20220902;

/// Destination for imported scores. Implemented by the catalog; the
/// readers stay unaware of locking and deduplication details.
pub trait ScoreSink {
    /// Insert a score, deduplicating against existing entries. Returns
    /// whether the score was newly added (or replaced an entry).
    fn add_score(&self, score: FinishedScore) -> bool;

    /// Whether a score with this identity is already present. Used to skip
    /// whole records cheaply during imports.
    fn contains_score(&self, hash: &ContentHash, unix_timestamp: u64, player_name: &str) -> bool;
}

/// Read the native score database. Aborts without touching the sink when
/// the file's version is newer than this build; backs the file up first
/// when it is older.
pub fn read_native(
    path: &Path,
    sink: &dyn ScoreSink,
    ctx: &LoadContext,
    notifier: &dyn Notifier,
) -> DbResult<u32> {
    let mut reader = Reader::open(path);
    if reader.total_size == 0 {
        return Ok(0);
    }

    let mut magic = [0_u8; 5];
    reader.read_bytes(&mut magic);
    if !reader.good() || &magic != SCORES_MAGIC {
        notifier.toast("Failed to load beatdb_scores.db!");
        ctx.finish_file(reader.total_size);
        return Err(DbError::InvalidDatabase {
            path: path.display().to_string(),
            reason: "bad magic".to_owned(),
        });
    }

    let version = reader.read_u32();
    if version > SCORES_DB_VERSION {
        warn!(
            "beatdb_scores.db version {} is newer than this build ({})",
            version, SCORES_DB_VERSION
        );
        ctx.finish_file(reader.total_size);
        return Err(DbError::InvalidDatabase {
            path: path.display().to_string(),
            reason: format!("version {} is newer than {}", version, SCORES_DB_VERSION),
        });
    }
    if version < SCORES_DB_VERSION {
        backup_stale(path, version, SCORES_DB_VERSION);
    }

    let nb_beatmaps = reader.read_u32();
    let nb_scores_expected = reader.read_u32();

    let mut nb_scores = 0_u32;
    'beatmaps: for _ in 0..nb_beatmaps {
        if ctx.is_cancelled() {
            return Err(DbError::Cancelled);
        }

        let beatmap_hash = reader.read_hash_chars();
        let nb_map_scores = reader.read_u32();
        if !reader.good() {
            break;
        }

        for _ in 0..nb_map_scores {
            let score = read_native_score(&mut reader, beatmap_hash);
            if !reader.good() {
                warn!(
                    "native score db truncated at {} of {} bytes",
                    reader.position(),
                    reader.total_size
                );
                break 'beatmaps;
            }
            sink.add_score(score);
            nb_scores += 1;
        }

        ctx.report(reader.position());
    }

    if nb_scores != nb_scores_expected {
        warn!(
            "inconsistency in beatdb_scores.db: expected {} scores, found {}",
            nb_scores_expected, nb_scores
        );
    }

    ctx.finish_file(reader.total_size);
    info!("loaded {} native scores", nb_scores);
    Ok(nb_scores)
}

fn read_native_score(reader: &mut Reader, beatmap_hash: ContentHash) -> FinishedScore {
    let mut sc = FinishedScore {
        beatmap_hash,
        ..FinishedScore::default()
    };

    sc.mods = Mods::unpack(reader);
    sc.score = reader.read_u64();
    sc.spinner_bonus = reader.read_u64();
    sc.unix_timestamp = reader.read_u64();
    sc.player_id = reader.read_i32();
    sc.player_name = reader.read_string();
    sc.grade = num::FromPrimitive::from_u8(reader.read_u8()).unwrap_or(Grade::N);

    sc.client = reader.read_string();
    sc.server = reader.read_string();
    sc.foreign_score_id = reader.read_i64();
    sc.foreign_replay_ts = reader.read_u64();

    sc.num_300s = reader.read_u16();
    sc.num_100s = reader.read_u16();
    sc.num_50s = reader.read_u16();
    sc.num_gekis = reader.read_u16();
    sc.num_katus = reader.read_u16();
    sc.num_misses = reader.read_u16();
    sc.combo_max = reader.read_u16();

    sc.ppv2_version = reader.read_u32();
    sc.pp = reader.read_f32();
    sc.stars_total = reader.read_f32();
    sc.stars_aim = reader.read_f32();
    sc.stars_speed = reader.read_f32();

    sc.num_slider_breaks = reader.read_u16();
    sc.unstable_rate = reader.read_f32();
    sc.hit_error_min = reader.read_f32();
    sc.hit_error_max = reader.read_f32();
    sc.max_possible_combo = reader.read_u32() as i32;
    sc.num_hit_objects = reader.read_u32() as i32;
    sc.num_circles = reader.read_u32() as i32;

    sc.perfect = sc.max_possible_combo > 0 && i32::from(sc.combo_max) >= sc.max_possible_combo;

    sc
}

/// Write the native score database. The caller is expected to hold the
/// score index read lock for the duration.
pub fn write_native(
    path: &Path,
    scores: &HashMap<ContentHash, Vec<FinishedScore>>,
) -> DbResult<()> {
    let mut writer = Writer::create(path);

    writer.write_bytes(SCORES_MAGIC);
    writer.write_u32(SCORES_DB_VERSION);

    let mut nb_beatmaps = 0_u32;
    let mut nb_scores = 0_u32;
    for scorevec in scores.values() {
        if !scorevec.is_empty() {
            nb_beatmaps += 1;
            nb_scores += scorevec.len() as u32;
        }
    }
    writer.write_u32(nb_beatmaps);
    writer.write_u32(nb_scores);

    for (hash, scorevec) in scores.iter() {
        if scorevec.is_empty() {
            continue;
        }

        writer.write_hash_chars(hash);
        writer.write_u32(scorevec.len() as u32);

        for score in scorevec.iter() {
            score.mods.pack(&mut writer);
            writer.write_u64(score.score);
            writer.write_u64(score.spinner_bonus);
            writer.write_u64(score.unix_timestamp);
            writer.write_i32(score.player_id);
            writer.write_string(&score.player_name);
            writer.write_u8(score.grade as u8);

            writer.write_string(&score.client);
            writer.write_string(&score.server);
            writer.write_i64(score.foreign_score_id);
            writer.write_u64(score.foreign_replay_ts);

            writer.write_u16(score.num_300s);
            writer.write_u16(score.num_100s);
            writer.write_u16(score.num_50s);
            writer.write_u16(score.num_gekis);
            writer.write_u16(score.num_katus);
            writer.write_u16(score.num_misses);
            writer.write_u16(score.combo_max);

            writer.write_u32(score.ppv2_version);
            writer.write_f32(score.pp);
            writer.write_f32(score.stars_total);
            writer.write_f32(score.stars_aim);
            writer.write_f32(score.stars_speed);

            writer.write_u16(score.num_slider_breaks);
            writer.write_f32(score.unstable_rate);
            writer.write_f32(score.hit_error_min);
            writer.write_f32(score.hit_error_max);
            writer.write_u32(score.max_possible_combo as u32);
            writer.write_u32(score.num_hit_objects as u32);
            writer.write_u32(score.num_circles as u32);
        }
    }

    writer.finish()?;
    info!("saved {} scores to {}", nb_scores, path.display());
    Ok(())
}

/// Read a legacy score database, auto-detecting variant-A (whitelisted
/// versions) against variant-B (anything newer).
pub fn read_legacy(path: &Path, sink: &dyn ScoreSink, ctx: &LoadContext) -> DbResult<u32> {
    let mut reader = Reader::open(path);

    let version = reader.read_u32();
    if reader.total_size == 0 || version == 0 {
        ctx.finish_file(reader.total_size);
        return Ok(0);
    }

    let is_variant_a = matches!(version, 20210106 | 20210108 | 20210110);
    // older versions can only be even older variant-A builds; nothing we
    // can import from those
    let is_variant_b = !is_variant_a && version > 20210110;

    let nb_imported = if is_variant_b {
        read_legacy_variant_b(&mut reader, sink, ctx)?
    } else if is_variant_a {
        read_legacy_variant_a(&mut reader, version, sink, ctx)?
    } else {
        0
    };

    ctx.finish_file(reader.total_size);
    info!("imported {} legacy scores from {}", nb_imported, path.display());
    Ok(nb_imported)
}

fn read_legacy_variant_b(
    reader: &mut Reader,
    sink: &dyn ScoreSink,
    ctx: &LoadContext,
) -> DbResult<u32> {
    let mut nb_imported = 0_u32;

    let nb_beatmaps = reader.read_u32();
    'beatmaps: for _ in 0..nb_beatmaps {
        if ctx.is_cancelled() {
            return Err(DbError::Cancelled);
        }
        ctx.report(reader.position());

        let beatmap_hash = reader.read_hash_chars();
        let nb_scores = reader.read_u32();
        if !reader.good() {
            break;
        }

        for _ in 0..nb_scores {
            reader.read_u8(); // gamemode, always 0
            reader.read_u32(); // per-score version

            let mut sc = FinishedScore {
                beatmap_hash,
                ..FinishedScore::default()
            };

            sc.unix_timestamp = reader.read_u64();
            sc.player_name = reader.read_string();
            sc.num_300s = reader.read_u16();
            sc.num_100s = reader.read_u16();
            sc.num_50s = reader.read_u16();
            sc.num_gekis = reader.read_u16();
            sc.num_katus = reader.read_u16();
            sc.num_misses = reader.read_u16();
            sc.score = reader.read_u64();
            sc.combo_max = reader.read_u16();
            sc.mods = Mods::from_legacy(LegacyFlags::from_bits_truncate(reader.read_u32()));
            sc.num_slider_breaks = reader.read_u16();
            sc.ppv2_version = LEGACY_IMPORT_PPV2_VERSION;
            sc.pp = reader.read_f32();
            sc.unstable_rate = reader.read_f32();
            sc.hit_error_min = reader.read_f32();
            sc.hit_error_max = reader.read_f32();
            sc.stars_total = reader.read_f32();
            sc.stars_aim = reader.read_f32();
            sc.stars_speed = reader.read_f32();
            sc.mods.speed = reader.read_f32();
            if !sc.mods.speed.is_finite() || sc.mods.speed <= 0.0 {
                sc.mods.speed = 1.0;
            }
            sc.mods.cs_override = reader.read_f32();
            sc.mods.ar_override = reader.read_f32();
            sc.mods.od_override = reader.read_f32();
            sc.mods.hp_override = reader.read_f32();
            sc.max_possible_combo = reader.read_u32() as i32;
            sc.num_hit_objects = reader.read_u32() as i32;
            sc.num_circles = reader.read_u32() as i32;
            sc.foreign_score_id = i64::from(reader.read_u32());
            // these builds did not record their exact version
            sc.client = "beatdb-win64-release-35.10".to_owned();
            sc.server = reader.read_string();

            let experimental = reader.read_string();
            sc.mods.apply_experimental(&experimental);

            if !reader.good() {
                break 'beatmaps;
            }

            sc.perfect = i32::from(sc.combo_max) >= sc.max_possible_combo;
            sc.grade = sc.calculate_grade();

            if sink.add_score(sc) {
                nb_imported += 1;
            }
        }
    }

    Ok(nb_imported)
}

fn read_legacy_variant_a(
    reader: &mut Reader,
    db_version: u32,
    sink: &dyn ScoreSink,
    ctx: &LoadContext,
) -> DbResult<u32> {
    let mut nb_imported = 0_u32;

    let nb_beatmaps = reader.read_i32();
    debug!("variant-A scores: version = {}, beatmaps = {}", db_version, nb_beatmaps);

    'beatmaps: for b in 0..nb_beatmaps {
        if ctx.is_cancelled() {
            return Err(DbError::Cancelled);
        }
        ctx.report(reader.position());

        let hash_str = reader.read_string();
        if !reader.good() {
            break;
        }
        if hash_str.len() < 32 {
            warn!(
                "invalid score on beatmap {} with hash length {}",
                b,
                hash_str.len()
            );
            continue;
        }
        if hash_str.len() > 32 {
            warn!("corrupt score database entry detected, stopping");
            break;
        }
        let beatmap_hash = ContentHash::from_hex(&hash_str).unwrap_or(ContentHash::ZERO);

        let nb_scores = reader.read_i32();
        for _ in 0..nb_scores {
            let gamemode = reader.read_u8();
            let score_version = reader.read_i32();
            let unix_timestamp = reader.read_u64();
            let player_name = reader.read_string();
            if !reader.good() {
                break 'beatmaps;
            }

            if sink.contains_score(&beatmap_hash, unix_timestamp, &player_name) {
                // skip the rest of the record without building a score
                let mut skip = (2 * 8) + 8 + 4 + (4 * 12);
                if score_version > 20180722 {
                    skip += 4 * 3;
                }
                reader.skip_bytes(skip);
                reader.skip_string(); // experimental mods
                debug!("skipped duplicate score on {} (already imported)", beatmap_hash);
                continue;
            }

            let num_300s = reader.read_u16();
            let num_100s = reader.read_u16();
            let num_50s = reader.read_u16();
            let num_gekis = reader.read_u16();
            let num_katus = reader.read_u16();
            let num_misses = reader.read_u16();
            let total_score = reader.read_i64();
            let combo_max = reader.read_u16();
            let mut mods = Mods::from_legacy(LegacyFlags::from_bits_truncate(reader.read_u32()));

            let num_slider_breaks = reader.read_u16();
            let pp = reader.read_f32();
            let unstable_rate = reader.read_f32();
            let hit_error_min = reader.read_f32();
            let hit_error_max = reader.read_f32();
            let stars_total = reader.read_f32();
            let stars_aim = reader.read_f32();
            let stars_speed = reader.read_f32();
            let speed = reader.read_f32();
            mods.cs_override = reader.read_f32();
            mods.ar_override = reader.read_f32();
            mods.od_override = reader.read_f32();
            mods.hp_override = reader.read_f32();
            if speed > 0.0 {
                mods.speed = speed;
            }

            let mut max_possible_combo = -1;
            let mut num_hit_objects = -1;
            let mut num_circles = -1;
            if score_version > 20180722 {
                max_possible_combo = reader.read_i32();
                num_hit_objects = reader.read_i32();
                num_circles = reader.read_i32();
            }

            let experimental = reader.read_string();
            if !reader.good() {
                break 'beatmaps;
            }

            // builds after 20190103 repurposed the gamemode byte as an
            // imported-score marker, so their records are kept regardless
            // of its value
            if gamemode != 0 && score_version <= 20190103 {
                continue;
            }

            mods.apply_experimental(&experimental);

            let mut sc = FinishedScore {
                beatmap_hash,
                mods,
                unix_timestamp,
                player_name,
                num_300s,
                num_100s,
                num_50s,
                num_gekis,
                num_katus,
                num_misses,
                score: total_score.max(0) as u64,
                combo_max,
                num_slider_breaks,
                ppv2_version: LEGACY_IMPORT_PPV2_VERSION,
                pp,
                unstable_rate,
                hit_error_min,
                hit_error_max,
                stars_total,
                stars_aim,
                stars_speed,
                max_possible_combo,
                num_hit_objects,
                num_circles,
                client: format!("mcosu-{}", score_version),
                ..FinishedScore::default()
            };
            sc.perfect = max_possible_combo > 0
                && combo_max > 0
                && i32::from(combo_max) >= max_possible_combo;
            sc.grade = sc.calculate_grade();

            if sink.add_score(sc) {
                nb_imported += 1;
            }
        }
    }

    Ok(nb_imported)
}

/// Read the stable client's score database.
pub fn read_stable(path: &Path, sink: &dyn ScoreSink, ctx: &LoadContext) -> DbResult<u32> {
    let mut reader = Reader::open(path);

    let version = reader.read_u32();
    let nb_beatmaps = reader.read_u32();
    if reader.total_size == 0 || version == 0 {
        ctx.finish_file(reader.total_size);
        return Ok(0);
    }

    debug!("stable scores.db: version = {}, beatmaps = {}", version, nb_beatmaps);

    let mut nb_imported = 0_u32;
    'beatmaps: for b in 0..nb_beatmaps {
        if ctx.is_cancelled() {
            return Err(DbError::Cancelled);
        }

        let hash_str = reader.read_string();
        if !reader.good() {
            break;
        }
        if hash_str.len() < 32 {
            warn!(
                "invalid score on beatmap {} with hash length {}",
                b,
                hash_str.len()
            );
            continue;
        }
        if hash_str.len() > 32 {
            warn!("corrupt score database entry detected, stopping");
            break;
        }
        let beatmap_hash = ContentHash::from_hex(&hash_str).unwrap_or(ContentHash::ZERO);

        let nb_scores = reader.read_u32();
        for _ in 0..nb_scores {
            let gamemode = reader.read_u8();
            let score_version = reader.read_u32();

            let mut sc = FinishedScore {
                beatmap_hash,
                client: format!("peppy-{}", score_version),
                server: "ppy.sh".to_owned(),
                ..FinishedScore::default()
            };

            reader.skip_string(); // beatmap hash, already known
            sc.player_name = reader.read_string();
            reader.skip_string(); // replay hash, unused

            sc.num_300s = reader.read_u16();
            sc.num_100s = reader.read_u16();
            sc.num_50s = reader.read_u16();
            sc.num_gekis = reader.read_u16();
            sc.num_katus = reader.read_u16();
            sc.num_misses = reader.read_u16();

            sc.score = reader.read_i32().max(0) as u64;
            sc.combo_max = reader.read_u16();
            sc.perfect = reader.read_u8() != 0;
            sc.mods = Mods::from_legacy(LegacyFlags::from_bits_truncate(reader.read_u32()));

            reader.skip_string(); // hp graph

            let ticks = reader.read_u64();
            sc.unix_timestamp = ticks_to_unix(ticks as i64).max(0) as u64;
            sc.foreign_replay_ts = ticks.saturating_sub(STABLE_REPLAY_TS_OFFSET);

            // always -1 in practice, but honor a positive length
            let old_replay_size = reader.read_i32();
            if old_replay_size > 0 {
                reader.skip_bytes(old_replay_size as u64);
            }

            sc.foreign_score_id = if score_version >= 20131110 {
                reader.read_i64()
            } else if score_version >= 20121008 {
                i64::from(reader.read_i32())
            } else {
                0
            };

            if sc.mods.flags.contains(ModFlags::Target) {
                reader.read_f64(); // total accuracy of all target hits
            }

            if !reader.good() {
                break 'beatmaps;
            }

            if gamemode == 0 && sc.foreign_score_id != 0 {
                sc.grade = sc.calculate_grade();
                if sink.add_score(sc) {
                    nb_imported += 1;
                }
            }
        }

        ctx.report(reader.position());
    }

    ctx.finish_file(reader.total_size);
    info!("imported {} stable scores", nb_imported);
    Ok(nb_imported)
}
