mod common;

use std::sync::Arc;

use beatdb::prelude::*;

use common::*;

fn loaded_db(dir: &tempfile::TempDir) -> Arc<Database> {
    let db = Database::new(test_settings(dir.path()), Arc::new(NullNotifier));
    db.load();
    wait_for_load(&db);
    db
}

fn score(h: ContentHash, ts: u64, player: &str, pp: f32) -> FinishedScore {
    FinishedScore {
        beatmap_hash: h,
        unix_timestamp: ts,
        player_name: player.to_owned(),
        pp,
        score: (pp * 10_000.0) as u64,
        num_300s: 100,
        ..FinishedScore::default()
    }
}

#[test]
fn test_duplicate_score_with_replay_wins() {
    let dir = tempfile::tempdir().unwrap();
    let db = loaded_db(&dir);
    let h = hash(0x11);

    // variant-A imports never have a replay available
    let mut s1 = score(h, 1000, "a", 50.0);
    s1.client = "mcosu-20190103".to_owned();
    assert!(!s1.has_possible_replay());

    let mut s2 = score(h, 1000, "a", 50.0);
    s2.client = "beatdb-win64-release-36.00".to_owned();
    assert!(s2.has_possible_replay());

    assert!(db.add_score(s1));
    assert!(db.add_score(s2.clone()));

    let list = db.scores_for(&h);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].client, s2.client);
    assert!(list[0].has_possible_replay());
}

#[test]
fn test_duplicate_without_replay_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let db = loaded_db(&dir);
    let h = hash(0x12);

    let mut s1 = score(h, 1000, "a", 50.0);
    s1.client = "beatdb-win64-release-36.00".to_owned();
    let mut s2 = score(h, 1000, "a", 99.0);
    s2.client = "mcosu-20190103".to_owned();

    assert!(db.add_score(s1.clone()));
    // incoming duplicate without a replay never replaces anything
    assert!(!db.add_score(s2));

    let list = db.scores_for(&h);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].pp, 50.0);
}

#[test]
fn test_score_vector_stays_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let db = loaded_db(&dir);
    let h = hash(0x13);

    db.set_score_sort_order("By misses");
    for (i, misses) in [5_u16, 1, 9, 3].iter().enumerate() {
        let mut s = score(h, 1000 + i as u64, "a", 10.0);
        s.num_misses = *misses;
        assert!(db.add_score(s));
    }

    let list = db.scores_for(&h);
    let misses: Vec<u16> = list.iter().map(|s| s.num_misses).collect();
    assert_eq!(misses, vec![1, 3, 5, 9]);

    db.set_score_sort_order("By date");
    let list = db.scores_for(&h);
    let stamps: Vec<u64> = list.iter().map(|s| s.unix_timestamp).collect();
    assert_eq!(stamps, vec![1003, 1002, 1001, 1000]);
}

#[test]
fn test_unknown_sort_name_falls_back_to_pp() {
    let dir = tempfile::tempdir().unwrap();
    let db = loaded_db(&dir);
    let h = hash(0x14);

    db.set_score_sort_order("By vibes");
    for (i, pp) in [10.0_f32, 30.0, 20.0].iter().enumerate() {
        assert!(db.add_score(score(h, 2000 + i as u64, "a", *pp)));
    }

    let list = db.scores_for(&h);
    let pps: Vec<f32> = list.iter().map(|s| s.pp).collect();
    assert_eq!(pps, vec![30.0, 20.0, 10.0]);
}

#[test]
fn test_delete_score() {
    let dir = tempfile::tempdir().unwrap();
    let db = loaded_db(&dir);
    let h = hash(0x15);

    let s1 = score(h, 1000, "a", 50.0);
    let s2 = score(h, 2000, "a", 60.0);
    assert!(db.add_score(s1.clone()));
    assert!(db.add_score(s2));

    db.delete_score(&s1);
    let list = db.scores_for(&h);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].unix_timestamp, 2000);
}

#[test]
fn test_player_stats_weighting() {
    let dir = tempfile::tempdir().unwrap();
    let db = loaded_db(&dir);

    // two maps, best pp 200 and 100, all perfect accuracy
    assert!(db.add_score(score(hash(0x21), 1, "player", 200.0)));
    assert!(db.add_score(score(hash(0x22), 2, "player", 100.0)));
    // a lower attempt on the first map must not count
    assert!(db.add_score(score(hash(0x21), 3, "player", 150.0)));
    // someone else's score must not count either
    assert!(db.add_score(score(hash(0x21), 4, "other", 900.0)));

    let ps = db.player_pp_scores("player", false);
    assert_eq!(ps.scores.len(), 2);
    assert_eq!(ps.scores[0].pp, 200.0);
    assert_eq!(ps.scores[1].pp, 100.0);
    let expected_total = (200.0_f32 * 10_000.0) as u64
        + (100.0_f32 * 10_000.0) as u64
        + (150.0_f32 * 10_000.0) as u64;
    assert_eq!(ps.total_score, expected_total);

    let stats = db.calculate_player_stats("player");
    let expected_pp = 200.0 + 100.0 * 0.95 + Database::bonus_pp_for_num_scores(2);
    assert!((stats.pp - expected_pp).abs() < 0.01, "pp = {}", stats.pp);

    // both counted scores are SS, so weighted accuracy normalizes to 1.0
    assert!((stats.accuracy - 1.0).abs() < 1e-4);
    assert_eq!(stats.total_score, expected_total);
    assert_eq!(stats.level, Database::level_for_score(expected_total));
}

#[test]
fn test_player_stats_relax_filter() {
    let dir = tempfile::tempdir().unwrap();
    let db = loaded_db(&dir);

    let mut relaxed = score(hash(0x23), 1, "player", 500.0);
    relaxed.mods.flags |= ModFlags::Relax;
    assert!(db.add_score(relaxed));
    assert!(db.add_score(score(hash(0x23), 2, "player", 100.0)));

    let ps = db.player_pp_scores("player", false);
    assert_eq!(ps.scores.len(), 1);
    assert_eq!(ps.scores[0].pp, 100.0);

    let ps = db.player_pp_scores("player", true);
    assert_eq!(ps.scores.len(), 1);
    assert_eq!(ps.scores[0].pp, 500.0);
}

#[test]
fn test_stats_cache_invalidation() {
    let dir = tempfile::tempdir().unwrap();
    let db = loaded_db(&dir);

    assert!(db.add_score(score(hash(0x24), 1, "player", 100.0)));
    let first = db.calculate_player_stats("player");

    assert!(db.add_score(score(hash(0x25), 2, "player", 300.0)));
    let second = db.calculate_player_stats("player");
    assert!(second.pp > first.pp);
}

#[test]
fn test_level_table() {
    assert_eq!(Database::required_score_for_level(1), 1);
    assert_eq!(Database::required_score_for_level(2), 30_000);

    // spot checks of the round trip at interesting places
    for level in [1, 2, 10, 60, 99, 100, 101, 150, 200] {
        let required = Database::required_score_for_level(level);
        assert_eq!(
            Database::level_for_score_capped(required, 200),
            level,
            "level {} / required {}",
            level,
            required
        );
    }

    // the cap clamps the walk
    assert_eq!(
        Database::level_for_score_capped(u64::MAX, 120),
        120
    );
}

#[test]
fn test_scores_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());

    let notifier = CollectingNotifier::new();
    let db = Database::new(settings.clone(), notifier.clone());
    db.load();
    wait_for_load(&db);

    let h = hash(0x31);
    let mut s = score(h, 777, "keeper", 42.5);
    s.replay = Some(vec![1, 2, 3]);
    assert!(db.add_score(s));
    db.wait_for_pending_saves();
    db.save();

    // the async add_score save handed the replay to the sink
    assert_eq!(notifier.replays.lock().as_slice(), &[777]);
    assert!(notifier.saves.lock().iter().any(|ok| *ok));

    let db2 = Database::new(settings, Arc::new(NullNotifier));
    db2.load();
    wait_for_load(&db2);

    let list = db2.scores_for(&h);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].player_name, "keeper");
    assert_eq!(list[0].pp, 42.5);
    assert_eq!(list[0].unix_timestamp, 777);
}
