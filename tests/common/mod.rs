#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use beatdb::prelude::*;

/// A notifier that records everything it is told, for asserting on
/// collaborator traffic.
#[derive(Default)]
pub struct CollectingNotifier {
    pub toasts: Mutex<Vec<String>>,
    pub sets_added: Mutex<Vec<i32>>,
    pub saves: Mutex<Vec<bool>>,
    pub replays: Mutex<Vec<u64>>,
}

impl CollectingNotifier {
    pub fn new() -> Arc<CollectingNotifier> {
        Arc::new(CollectingNotifier::default())
    }
}

impl Notifier for CollectingNotifier {
    fn toast(&self, message: &str) {
        self.toasts.lock().push(message.to_owned());
    }

    fn beatmapset_added(&self, set_id: i32) {
        self.sets_added.lock().push(set_id);
    }

    fn save_finished(&self, success: bool) {
        self.saves.lock().push(success);
    }

    fn store_replay(&self, timestamp: u64, _data: &[u8]) {
        self.replays.lock().push(timestamp);
    }
}

/// Settings rooted in a temp directory, with the data dir created and the
/// stable paths pointing at a (nonexistent) sibling.
pub fn test_settings(root: &Path) -> Settings {
    let mut settings = Settings::with_data_dir(root.join("data"));
    settings.stable_folder = root.join("stable");
    std::fs::create_dir_all(&settings.data_dir).unwrap();
    settings
}

/// Poll until the engine reports a finished load, driving the raw scanner
/// along the way.
pub fn wait_for_load(db: &Arc<Database>) {
    let start = Instant::now();
    while db.progress() < 1.0 {
        db.update();
        assert!(
            start.elapsed() < Duration::from_secs(30),
            "load did not finish in time"
        );
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// A content hash with every byte set to `n`.
pub fn hash(n: u8) -> ContentHash {
    ContentHash([n; 16])
}

/// A fully populated native difficulty for round-trip comparisons.
pub fn sample_difficulty(h: ContentHash, map_id: i32, set_id: i32, name: &str) -> Difficulty {
    Difficulty {
        hash: h,
        map_id,
        set_id,
        title: format!("{} title", name),
        title_unicode: format!("{} タイトル", name),
        artist: "Some Artist".to_owned(),
        artist_unicode: "あーてぃすと".to_owned(),
        creator: "mapper".to_owned(),
        diff_name: name.to_owned(),
        source: "some game".to_owned(),
        tags: "tag1 tag2".to_owned(),
        audio_filename: "audio.mp3".to_owned(),
        background_filename: "bg.jpg".to_owned(),
        osu_filename: format!("{}.osu", name),
        folder: String::new(),
        length_ms: 183_000,
        preview_ms: 38_500,
        last_modification: 1_700_000_000,
        stack_leniency: 0.7,
        ar: 9.2,
        cs: 4.0,
        hp: 5.5,
        od: 8.7,
        slider_multiplier: 1.8,
        num_circles: 320,
        num_sliders: 180,
        num_spinners: 2,
        min_bpm: 120,
        max_bpm: 180,
        avg_bpm: 175,
        stars_nomod: 4.25,
        loudness: -12.3,
        local_offset: -15,
        online_offset: 4,
        draw_background: true,
        ppv2_version: 20220902,
        origin: Origin::Native,
    }
}

/// Assert two difficulties agree on every persisted field.
pub fn assert_difficulty_round_trips(expected: &Difficulty, got: &Difficulty) {
    assert_eq!(got.hash, expected.hash);
    assert_eq!(got.map_id, expected.map_id);
    assert_eq!(got.set_id, expected.set_id);
    assert_eq!(got.title, expected.title);
    assert_eq!(got.title_unicode, expected.title_unicode);
    assert_eq!(got.artist, expected.artist);
    assert_eq!(got.artist_unicode, expected.artist_unicode);
    assert_eq!(got.creator, expected.creator);
    assert_eq!(got.diff_name, expected.diff_name);
    assert_eq!(got.source, expected.source);
    assert_eq!(got.tags, expected.tags);
    assert_eq!(got.audio_filename, expected.audio_filename);
    assert_eq!(got.background_filename, expected.background_filename);
    assert_eq!(got.osu_filename, expected.osu_filename);
    assert_eq!(got.length_ms, expected.length_ms);
    assert_eq!(got.preview_ms, expected.preview_ms);
    assert_eq!(got.last_modification, expected.last_modification);
    assert_eq!(got.stack_leniency, expected.stack_leniency);
    assert_eq!(got.ar, expected.ar);
    assert_eq!(got.cs, expected.cs);
    assert_eq!(got.hp, expected.hp);
    assert_eq!(got.od, expected.od);
    assert_eq!(got.slider_multiplier, expected.slider_multiplier);
    assert_eq!(got.num_circles, expected.num_circles);
    assert_eq!(got.num_sliders, expected.num_sliders);
    assert_eq!(got.num_spinners, expected.num_spinners);
    assert_eq!(got.min_bpm, expected.min_bpm);
    assert_eq!(got.max_bpm, expected.max_bpm);
    assert_eq!(got.avg_bpm, expected.avg_bpm);
    assert_eq!(got.stars_nomod, expected.stars_nomod);
    assert_eq!(got.loudness, expected.loudness);
    assert_eq!(got.local_offset, expected.local_offset);
    assert_eq!(got.online_offset, expected.online_offset);
    assert_eq!(got.draw_background, expected.draw_background);
    assert_eq!(got.ppv2_version, expected.ppv2_version);
}

/// Write a minimal chart file the metadata parser accepts.
pub fn write_osu_file(folder: &Path, file_name: &str, title: &str, set_id: i32, map_id: i32) {
    std::fs::create_dir_all(folder).unwrap();
    let content = format!(
        r#"osu file format v14

[General]
AudioFilename: audio.mp3
PreviewTime: 1000
Mode: 0

[Metadata]
Title:{title}
Artist:Test Artist
Creator:tester
Version:{file_name}
BeatmapID:{map_id}
BeatmapSetID:{set_id}

[Difficulty]
HPDrainRate:5
CircleSize:4
OverallDifficulty:7
ApproachRate:9
SliderMultiplier:1.4

[TimingPoints]
0,500,4,1,0,60,1,0

[HitObjects]
100,100,500,1,0,0:0:0:0:
200,200,1000,1,0,0:0:0:0:
"#
    );
    std::fs::write(folder.join(file_name), content).unwrap();
}
