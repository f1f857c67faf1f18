mod common;

use std::sync::Arc;

use beatdb::prelude::*;

use common::*;

fn raw_settings(root: &std::path::Path) -> Settings {
    let mut settings = test_settings(root);
    // no usable legacy database forces the raw folder scanner
    settings.legacy_db_enabled = false;
    std::fs::create_dir_all(settings.songs_folder()).unwrap();
    settings
}

#[test]
fn test_raw_scan_builds_catalog_from_folders() {
    let dir = tempfile::tempdir().unwrap();
    let settings = raw_settings(dir.path());
    let songs = settings.songs_folder();

    write_osu_file(&songs.join("111 Artist - SongA"), "easy.osu", "SongA", 111, 1);
    write_osu_file(&songs.join("111 Artist - SongA"), "hard.osu", "SongA", 111, 2);
    write_osu_file(&songs.join("222 Artist - SongB"), "only.osu", "SongB", 222, 3);

    let db = Database::new(settings, Arc::new(NullNotifier));
    db.load();
    wait_for_load(&db);

    assert_eq!(db.with_sets(|sets| sets.len()), 2);
    let set_a = db.set_by_id(111).expect("SongA set");
    assert_eq!(set_a.difficulties.len(), 2);
    for diff in set_a.difficulties.iter() {
        assert_eq!(diff.set_id, 111);
        assert_eq!(diff.origin, Origin::Legacy);
        assert!(!diff.hash.is_suspicious());
        assert!(db.difficulty_by_hash(&diff.hash).is_some());
    }
    assert_eq!(db.set_by_id(222).unwrap().difficulties.len(), 1);
}

#[test]
fn test_rescan_only_picks_up_new_folders() {
    let dir = tempfile::tempdir().unwrap();
    let settings = raw_settings(dir.path());
    let songs = settings.songs_folder();

    write_osu_file(&songs.join("111 First"), "a.osu", "First", 111, 1);

    let notifier = CollectingNotifier::new();
    let db = Database::new(settings, notifier.clone());
    db.load();
    wait_for_load(&db);
    assert_eq!(db.with_sets(|sets| sets.len()), 1);

    // a new folder appears on disk
    write_osu_file(&songs.join("222 Second"), "b.osu", "Second", 222, 2);

    db.load();
    wait_for_load(&db);

    assert!(db.found_changes());
    assert_eq!(db.with_sets(|sets| sets.len()), 2);
    assert!(db.set_by_id(111).is_some(), "existing entries left untouched");
    assert!(db.set_by_id(222).is_some());
    assert!(notifier
        .toasts
        .lock()
        .iter()
        .any(|t| t.contains("Adding 1 new beatmap")));

    // a rescan with nothing new says so
    db.load();
    wait_for_load(&db);
    assert!(!db.found_changes());
    assert_eq!(db.with_sets(|sets| sets.len()), 2);
    assert!(notifier
        .toasts
        .lock()
        .iter()
        .any(|t| t.contains("No new beatmaps detected")));
}

#[test]
fn test_add_set_deduplicates() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    let folder = dir.path().join("999 Dropped - Song");
    write_osu_file(&folder, "x.osu", "Dropped", -1, -1);

    let notifier = CollectingNotifier::new();
    let db = Database::new(settings, notifier.clone());
    db.load();
    wait_for_load(&db);

    // ids are missing from the chart, but the caller knows the set id
    let set_id = db.add_set(&folder, 999, false).expect("attached");
    assert_eq!(set_id, 999);
    assert_eq!(notifier.sets_added.lock().as_slice(), &[999]);

    let set = db.set_by_id(999).unwrap();
    assert_eq!(set.difficulties.len(), 1);
    assert_eq!(set.difficulties[0].set_id, 999);

    // the same folder again only contains duplicates
    assert!(db.add_set(&folder, 999, false).is_none());
    assert_eq!(db.with_sets(|sets| sets.len()), 1);
}
