mod common;

use std::collections::HashMap;
use std::sync::Arc;

use beatdb::db::binary::Writer;
use beatdb::prelude::*;

use common::*;

const DT: u32 = 1 << 6;
const HD: u32 = 1 << 3;
const HT: u32 = 1 << 8;

/// Write a variant-B legacy score database (the format newer than any
/// variant-A build).
fn write_variant_b(path: &std::path::Path, h: ContentHash) {
    let mut w = Writer::create(path);
    w.write_u32(20230909); // version, > variant-A whitelist
    w.write_u32(1); // beatmaps
    w.write_hash_chars(&h);
    w.write_u32(1); // scores

    w.write_u8(0); // gamemode
    w.write_u32(20230909); // per-score version
    w.write_u64(1_650_000_000); // unix timestamp
    w.write_string("import-b");
    w.write_u16(500); // 300s
    w.write_u16(20); // 100s
    w.write_u16(3); // 50s
    w.write_u16(40); // gekis
    w.write_u16(10); // katus
    w.write_u16(0); // misses
    w.write_u64(7_654_321); // score
    w.write_u16(810); // combo
    w.write_u32(HD); // legacy flag word
    w.write_u16(2); // slider breaks
    w.write_f32(123.4); // pp
    w.write_f32(88.0); // unstable rate
    w.write_f32(-11.0); // hit error min
    w.write_f32(13.0); // hit error max
    w.write_f32(5.9); // stars total
    w.write_f32(3.1); // aim
    w.write_f32(2.6); // speed
    w.write_f32(1.25); // speed multiplier
    w.write_f32(-1.0); // CS override
    w.write_f32(10.5); // AR override
    w.write_f32(-1.0); // OD override
    w.write_f32(-1.0); // HP override
    w.write_u32(850); // max possible combo
    w.write_u32(523); // hit objects
    w.write_u32(500); // circles
    w.write_u32(99887); // foreign score id
    w.write_string("private.server");
    w.write_string("osu_mod_wobble;osu_mod_timewarp");
    w.finish().unwrap();
}

#[test]
fn test_variant_b_import() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    let h = hash(0x42);
    write_variant_b(&path_for(DbKind::LegacyScores, &settings), h);

    let db = Database::new(settings, Arc::new(NullNotifier));
    db.load();
    wait_for_load(&db);

    let list = db.scores_for(&h);
    assert_eq!(list.len(), 1);
    let sc = &list[0];
    assert_eq!(sc.player_name, "import-b");
    assert_eq!(sc.score, 7_654_321);
    assert_eq!(sc.combo_max, 810);
    assert_eq!(sc.mods.speed, 1.25);
    assert_eq!(sc.mods.ar_override, 10.5);
    assert_eq!(sc.mods.cs_override, -1.0);
    assert!(sc.mods.flags.contains(ModFlags::Hidden));
    // the experimental string maps through the fixed table
    assert!(sc.mods.flags.contains(ModFlags::Wobble1));
    assert!(sc.mods.flags.contains(ModFlags::Timewarp));
    assert_eq!(sc.foreign_score_id, 99887);
    assert_eq!(sc.server, "private.server");
    assert!(sc.has_possible_replay());
    assert_ne!(sc.grade, Grade::N);
    assert_eq!(sc.max_possible_combo, 850);
}

#[test]
fn test_external_import_queue() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    let h = hash(0x77);

    // dropped anywhere on disk; the name lets the sniffer classify it
    let dropped = dir.path().join("dropped").join("scores.db");
    std::fs::create_dir_all(dropped.parent().unwrap()).unwrap();
    write_variant_b(&dropped, h);

    let db = Database::new(settings, Arc::new(NullNotifier));
    db.add_path_to_import(dropped.clone());
    db.load();
    wait_for_load(&db);

    assert_eq!(db.scores_for(&h).len(), 1);

    // the queue was consumed; a reload does not re-import (and the
    // dedup rule would drop the duplicate anyway)
    db.load();
    wait_for_load(&db);
    assert_eq!(db.scores_for(&h).len(), 1);
}

/// Write a variant-A legacy score database (whitelisted versions) holding
/// one score with the given gamemode byte and per-score version.
fn write_variant_a(
    path: &std::path::Path,
    h: ContentHash,
    ts: u64,
    player: &str,
    gamemode: u8,
    score_version: i32,
) {
    let mut w = Writer::create(path);
    w.write_u32(20210108); // version, in the whitelist
    w.write_i32(1); // beatmaps
    w.write_string(&h.to_hex());
    w.write_i32(1); // scores

    w.write_u8(gamemode);
    w.write_i32(score_version);
    w.write_u64(ts);
    w.write_string(player);
    w.write_u16(300);
    w.write_u16(50);
    w.write_u16(2);
    w.write_u16(20);
    w.write_u16(15);
    w.write_u16(5);
    w.write_i64(1_234_567);
    w.write_u16(321); // combo
    w.write_u32(DT | HD);
    w.write_u16(1); // slider breaks
    w.write_f32(77.7); // pp
    w.write_f32(95.0); // ur
    w.write_f32(-9.0);
    w.write_f32(10.0);
    w.write_f32(4.2); // stars
    w.write_f32(2.2);
    w.write_f32(1.9);
    w.write_f32(1.5); // speed
    w.write_f32(4.0); // CS
    w.write_f32(9.0); // AR
    w.write_f32(8.0); // OD
    w.write_f32(6.0); // HP
    if score_version > 20180722 {
        w.write_i32(700); // max possible combo
        w.write_i32(352); // hit objects
        w.write_i32(300); // circles
    }
    w.write_string(""); // experimental mods
    w.finish().unwrap();
}

#[test]
fn test_variant_a_import() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    let h = hash(0x43);
    write_variant_a(
        &path_for(DbKind::LegacyScores, &settings),
        h,
        1_600_000_000,
        "import-a",
        0,
        20190103,
    );

    let db = Database::new(settings, Arc::new(NullNotifier));
    db.load();
    wait_for_load(&db);

    let list = db.scores_for(&h);
    assert_eq!(list.len(), 1);
    let sc = &list[0];
    assert_eq!(sc.player_name, "import-a");
    assert!(sc.client.starts_with("mcosu-"));
    // variant-A imports can never produce a replay
    assert!(!sc.has_possible_replay());
    // DoubleTime became a speed multiplier, not a flag
    assert_eq!(sc.mods.speed, 1.5);
    assert!(sc.mods.flags.contains(ModFlags::Hidden));
    assert_eq!(sc.mods.cs_override, 4.0);
    assert_eq!(sc.max_possible_combo, 700);
}

#[test]
fn test_variant_a_marker_gamemode_still_imports() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    let h = hash(0x46);
    // newer builds repurposed the gamemode byte as an imported-score
    // marker; a nonzero value with a post-20190103 score version is a
    // real osu!standard score and must be kept
    write_variant_a(
        &path_for(DbKind::LegacyScores, &settings),
        h,
        1_610_000_000,
        "import-marker",
        0xa9,
        20210101,
    );

    let db = Database::new(settings, Arc::new(NullNotifier));
    db.load();
    wait_for_load(&db);

    let list = db.scores_for(&h);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].player_name, "import-marker");
}

#[test]
fn test_variant_a_old_nonzero_gamemode_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    let h = hash(0x47);
    // at or before 20190103 the byte really is the gamemode, so a
    // non-standard score is filtered out
    write_variant_a(
        &path_for(DbKind::LegacyScores, &settings),
        h,
        1_610_000_000,
        "import-taiko",
        1,
        20190103,
    );

    let db = Database::new(settings, Arc::new(NullNotifier));
    db.load();
    wait_for_load(&db);

    assert!(db.scores_for(&h).is_empty());
}

#[test]
fn test_variant_a_duplicate_of_native_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    let h = hash(0x44);

    // the native database already holds this score (same identity)
    let mut native: HashMap<ContentHash, Vec<FinishedScore>> = HashMap::new();
    native.insert(
        h,
        vec![FinishedScore {
            beatmap_hash: h,
            unix_timestamp: 1_600_000_000,
            player_name: "import-a".to_owned(),
            score: 999,
            client: "beatdb-win64-release-36.00".to_owned(),
            ..FinishedScore::default()
        }],
    );
    beatdb::db::scores::write_native(&path_for(DbKind::NativeScores, &settings), &native).unwrap();

    write_variant_a(
        &path_for(DbKind::LegacyScores, &settings),
        h,
        1_600_000_000,
        "import-a",
        0,
        20190103,
    );

    let db = Database::new(settings, Arc::new(NullNotifier));
    db.load();
    wait_for_load(&db);

    // the legacy duplicate was skipped early; the native score remains
    let list = db.scores_for(&h);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].score, 999);
}

/// Write a stable-format score database with one counted score and one
/// that fails the submission filter.
fn write_stable_scores(path: &std::path::Path, h: ContentHash) {
    let ticks: u64 = 637_441_288_088_683_788; // 2020-12-21 in tick form

    let mut w = Writer::create(path);
    w.write_u32(20140731); // version
    w.write_u32(1); // beatmaps
    w.write_string(&h.to_hex());
    w.write_u32(2); // scores

    for score_id in [424_242_i64, 0] {
        w.write_u8(0); // gamemode
        w.write_u32(20140731); // score version
        w.write_string(&h.to_hex()); // map hash again
        w.write_string("stable-player");
        w.write_string("replayhashreplayhashreplayhash00");
        w.write_u16(400);
        w.write_u16(10);
        w.write_u16(0);
        w.write_u16(30);
        w.write_u16(5);
        w.write_u16(1);
        w.write_i32(2_000_000);
        w.write_u16(640);
        w.write_u8(0); // perfect
        w.write_u32(HT);
        w.write_string("0|1"); // hp graph
        w.write_u64(ticks);
        w.write_i32(-1); // legacy replay blob length
        w.write_i64(score_id);
    }
    w.finish().unwrap();
}

#[test]
fn test_stable_import() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    std::fs::create_dir_all(&settings.stable_folder).unwrap();
    let h = hash(0x45);
    write_stable_scores(&path_for(DbKind::StableScores, &settings), h);

    let db = Database::new(settings, Arc::new(NullNotifier));
    db.load();
    wait_for_load(&db);

    // the unsubmitted score (id 0) was filtered out
    let list = db.scores_for(&h);
    assert_eq!(list.len(), 1);
    let sc = &list[0];
    assert_eq!(sc.player_name, "stable-player");
    assert_eq!(sc.server, "ppy.sh");
    assert!(sc.client.starts_with("peppy-"));
    assert_eq!(sc.foreign_score_id, 424_242);
    // tick-epoch timestamp converted to unix seconds
    assert_eq!(sc.unix_timestamp, 1_608_532_008);
    assert!(sc.foreign_replay_ts > 0);
    // HalfTime became a speed multiplier
    assert_eq!(sc.mods.speed, 0.75);
}

/// Write a minimal legacy map database with two difficulties in one set
/// and one difficulty with an invalid set id.
fn write_legacy_maps(path: &std::path::Path, h1: ContentHash, h2: ContentHash, h3: ContentHash) {
    let mut w = Writer::create(path);
    w.write_u32(20191106); // version: f32 difficulty fields, f64 star widths
    w.write_u32(3); // folder count
    w.write_u8(1); // account unlocked
    w.write_u64(0); // unlock date
    w.write_string("stable-player");
    w.write_u32(3); // beatmap count

    fn entry(
        w: &mut Writer,
        h: &ContentHash,
        diff_name: &str,
        map_id: i32,
        set_id: i32,
        path_str: &str,
        stars: f64,
    ) {
        w.write_string("Legacy Artist");
        w.write_string("");
        w.write_string("Legacy Song");
        w.write_string("");
        w.write_string("legacy-mapper");
        w.write_string(diff_name);
        w.write_string("song.mp3");
        w.write_string(&h.to_hex());
        w.write_string(&format!("{}.osu", diff_name));
        w.write_u8(4); // ranked status
        w.write_u16(150); // circles
        w.write_u16(70); // sliders
        w.write_u16(2); // spinners
        w.write_i64(637_441_288_088_683_788); // tick-form modification time
        w.write_f32(9.0); // AR
        w.write_f32(4.0); // CS
        w.write_f32(5.0); // HP
        w.write_f32(8.0); // OD
        w.write_f64(1.7); // slider multiplier

        // std star ratings: a nomod entry plus a modded one
        w.write_u32(2);
        w.write_u8(0x08);
        w.write_u32(0); // nomod
        w.write_u8(0x0d);
        w.write_f64(stars);
        w.write_u8(0x08);
        w.write_u32(DT);
        w.write_u8(0x0d);
        w.write_f64(stars + 1.5);
        // taiko/ctb/mania blocks are empty
        w.write_u32(0);
        w.write_u32(0);
        w.write_u32(0);

        w.write_u32(95); // drain seconds
        w.write_i32(95_000); // duration ms
        w.write_u32(30_000); // preview

        // timing points: 150 bpm, plus an inherited point
        w.write_u32(2);
        w.write_f64(400.0);
        w.write_f64(0.0);
        w.write_u8(1);
        w.write_f64(-100.0);
        w.write_f64(20_000.0);
        w.write_u8(0);

        w.write_i32(map_id);
        w.write_i32(set_id);
        w.write_u32(0); // thread id
        w.write_u8(9); // grades
        w.write_u8(9);
        w.write_u8(9);
        w.write_u8(9);
        w.write_u16(12); // local offset
        w.write_f32(0.7); // stack leniency
        w.write_u8(0); // mode
        w.write_string("");
        w.write_string("legacy tags");
        w.write_u16(3); // online offset
        w.write_string(""); // title font
        w.write_u8(1); // unplayed
        w.write_u64(0); // last played
        w.write_u8(0); // osz2
        w.write_string(path_str);
        w.write_u64(0); // last online check
        w.write_u8(0);
        w.write_u8(0);
        w.write_u8(0);
        w.write_u8(0);
        w.write_u8(0);
        w.write_u32(0); // last edit
        w.write_u8(0); // mania scroll speed
    }

    entry(&mut w, &h1, "Normal", 1001, 777, "777 Legacy Artist - Legacy Song", 3.5);
    entry(&mut w, &h2, "Hyper", 1002, 777, "777 Legacy Artist - Legacy Song", 4.5);
    entry(&mut w, &h3, "Orphan", 1003, -1, "999999 somewhere", 2.0);
    w.finish().unwrap();
}

#[test]
fn test_legacy_maps_import() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    std::fs::create_dir_all(&settings.stable_folder).unwrap();
    let (h1, h2, h3) = (hash(0x51), hash(0x52), hash(0x53));
    write_legacy_maps(&path_for(DbKind::StableMaps, &settings), h1, h2, h3);

    let db = Database::new(settings, Arc::new(NullNotifier));
    db.load();
    wait_for_load(&db);

    let set = db.set_by_id(777).expect("grouped by set id");
    assert_eq!(set.difficulties.len(), 2);
    assert_eq!(set.origin, Origin::Legacy);

    let normal = db.difficulty_by_hash(&h1).expect("indexed");
    assert_eq!(normal.diff_name, "Normal");
    assert_eq!(normal.map_id, 1001);
    assert_eq!(normal.stars_nomod, 3.5);
    assert_eq!(normal.local_offset, 12);
    assert_eq!(normal.online_offset, 3);
    assert_eq!(normal.length_ms, 95_000);
    // 60000 / 400ms per beat
    assert_eq!(normal.min_bpm, 150);
    assert_eq!(normal.max_bpm, 150);
    assert_eq!(normal.avg_bpm, 150);
    // tick-form timestamp converted
    assert_eq!(normal.last_modification, 1_608_532_008);
    // empty unicode fields fall back to the plain ones
    assert_eq!(normal.title_unicode, "Legacy Song");

    // the id-less entry got its set id recovered from the path prefix
    let orphan = db.difficulty_by_hash(&h3).expect("orphan indexed");
    assert_eq!(orphan.set_id, 999_999);
}

#[test]
fn test_overrides_apply_to_legacy_maps() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    std::fs::create_dir_all(&settings.stable_folder).unwrap();
    let (h1, h2, h3) = (hash(0x61), hash(0x62), hash(0x63));
    write_legacy_maps(&path_for(DbKind::StableMaps, &settings), h1, h2, h3);

    // a native maps db carrying only an override for h1
    let mut overrides: HashMap<ContentHash, MapOverrides> = HashMap::new();
    overrides.insert(
        h1,
        MapOverrides {
            local_offset: -44,
            online_offset: 8,
            star_rating: 7.77,
            loudness: -6.0,
            min_bpm: 150,
            max_bpm: 150,
            avg_bpm: 150,
            draw_background: false,
            background_filename: "cached.jpg".to_owned(),
            ppv2_version: 20220902,
        },
    );
    beatdb::db::maps::write(
        &path_for(DbKind::NativeMaps, &settings),
        &[],
        &overrides,
        &HashMap::new(),
    )
    .unwrap();

    let db = Database::new(settings, Arc::new(NullNotifier));
    db.load();
    wait_for_load(&db);

    let diff = db.difficulty_by_hash(&h1).expect("present");
    assert_eq!(diff.local_offset, -44);
    assert_eq!(diff.online_offset, 8);
    assert_eq!(diff.stars_nomod as f32, 7.77);
    assert_eq!(diff.loudness, -6.0);
    assert!(!diff.draw_background);
    assert_eq!(diff.background_filename, "cached.jpg");
    assert_eq!(diff.ppv2_version, 20220902);

    // a sibling without an override keeps the values from the file
    let other = db.difficulty_by_hash(&h2).expect("present");
    assert_eq!(other.stars_nomod, 4.5);
    assert_eq!(other.local_offset, 12);
}
