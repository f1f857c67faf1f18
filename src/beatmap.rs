use crate::hash::ContentHash;
use crate::overrides::MapOverrides;

/// Where a set or difficulty came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Locally mastered; persisted to the native map database.
    Native,
    /// Imported from the read-only legacy database or a legacy songs
    /// folder; adjustments go through the override map instead.
    Legacy,
}

/// One playable chart. Metadata only; gameplay data is loaded on demand by
/// the surrounding application.
#[derive(Clone, Debug)]
pub struct Difficulty {
    /// Content hash of the `.osu` file. Non-empty after a successful load
    /// (recomputed from disk when the stored form is corrupt).
    pub hash: ContentHash,
    /// Numeric map id, -1 if unknown.
    pub map_id: i32,
    /// Numeric id of the owning set, -1 if unknown. Always matches the
    /// parent [`BeatmapSet::set_id`].
    pub set_id: i32,

    /// Song title.
    pub title: String,
    /// Localized song title; falls back to `title` when the source had none.
    pub title_unicode: String,
    /// Song artist.
    pub artist: String,
    /// Localized song artist.
    pub artist_unicode: String,
    /// Chart author.
    pub creator: String,
    /// Difficulty name.
    pub diff_name: String,
    /// Source medium of the song.
    pub source: String,
    /// Search tags.
    pub tags: String,

    /// Name of the audio file, relative to the folder.
    pub audio_filename: String,
    /// Cached background image filename, empty if not yet known.
    pub background_filename: String,
    /// Name of the `.osu` file inside the folder.
    pub osu_filename: String,
    /// Owning directory path, with trailing separator.
    pub folder: String,

    /// Play length in milliseconds.
    pub length_ms: i32,
    /// Song-select preview point in milliseconds.
    pub preview_ms: u32,
    /// Unix timestamp of the last modification.
    pub last_modification: i64,
    /// Stacking leniency from the chart file.
    pub stack_leniency: f32,

    /// Approach rate.
    pub ar: f32,
    /// Circle size.
    pub cs: f32,
    /// HP drain rate.
    pub hp: f32,
    /// Overall difficulty.
    pub od: f32,
    /// Base slider velocity multiplier.
    pub slider_multiplier: f64,

    /// Number of circles.
    pub num_circles: u16,
    /// Number of sliders.
    pub num_sliders: u16,
    /// Number of spinners.
    pub num_spinners: u16,

    /// Lowest BPM, -1 if not computed yet.
    pub min_bpm: i32,
    /// Highest BPM, -1 if not computed yet.
    pub max_bpm: i32,
    /// Most common BPM, -1 if not computed yet.
    pub avg_bpm: i32,

    /// Star rating without mods.
    pub stars_nomod: f64,
    /// Perceptual loudness of the audio; 0.0 means "not computed".
    pub loudness: f32,

    /// Local audio offset in milliseconds.
    pub local_offset: i16,
    /// Crowd-sourced online audio offset in milliseconds.
    pub online_offset: i16,

    /// Whether the background image should be drawn.
    pub draw_background: bool,
    /// Version of the pp algorithm the cached values were computed with;
    /// 0 forces a recompute.
    pub ppv2_version: u32,

    /// Where this difficulty came from.
    pub origin: Origin,
}

impl Default for Difficulty {
    fn default() -> Difficulty {
        Difficulty {
            hash: ContentHash::ZERO,
            map_id: -1,
            set_id: -1,
            title: String::new(),
            title_unicode: String::new(),
            artist: String::new(),
            artist_unicode: String::new(),
            creator: String::new(),
            diff_name: String::new(),
            source: String::new(),
            tags: String::new(),
            audio_filename: String::new(),
            background_filename: String::new(),
            osu_filename: String::new(),
            folder: String::new(),
            length_ms: 0,
            preview_ms: 0,
            last_modification: 0,
            stack_leniency: 0.7,
            ar: 5.0,
            cs: 5.0,
            hp: 5.0,
            od: 5.0,
            slider_multiplier: 1.4,
            num_circles: 0,
            num_sliders: 0,
            num_spinners: 0,
            min_bpm: -1,
            max_bpm: -1,
            avg_bpm: -1,
            stars_nomod: 0.0,
            loudness: 0.0,
            local_offset: 0,
            online_offset: 0,
            draw_background: true,
            ppv2_version: 0,
            origin: Origin::Native,
        }
    }
}

impl Difficulty {
    /// Snapshot the adjustable fields into an override record.
    pub fn overrides(&self) -> MapOverrides {
        MapOverrides {
            local_offset: self.local_offset,
            online_offset: self.online_offset,
            star_rating: self.stars_nomod as f32,
            loudness: self.loudness,
            min_bpm: self.min_bpm,
            max_bpm: self.max_bpm,
            avg_bpm: self.avg_bpm,
            draw_background: self.draw_background,
            background_filename: self.background_filename.clone(),
            ppv2_version: self.ppv2_version,
        }
    }

    /// Apply a stored override record over the fields read from the
    /// read-only legacy database.
    pub fn apply_overrides(&mut self, over: &MapOverrides) {
        self.local_offset = over.local_offset;
        self.online_offset = over.online_offset;
        self.stars_nomod = f64::from(over.star_rating);
        self.loudness = over.loudness;
        self.draw_background = over.draw_background;
        self.background_filename = over.background_filename.clone();
        self.ppv2_version = over.ppv2_version;
    }
}

/// A group of difficulties sharing one song and folder.
///
/// Sets own their difficulties exclusively; every other structure refers to
/// a difficulty through [`DiffId`] arena indices or by content hash.
#[derive(Clone, Debug)]
pub struct BeatmapSet {
    /// Numeric set id, -1 if unknown.
    pub set_id: i32,
    /// Owning directory path, with trailing separator.
    pub folder: String,
    /// Where this set came from.
    pub origin: Origin,
    /// The contained difficulties. Never empty for a set attached to the
    /// catalog, and no two entries share a content hash.
    pub difficulties: Vec<Difficulty>,
}

impl BeatmapSet {
    /// Build a set from parsed difficulties, adopting folder/id/origin from
    /// the first entry.
    pub fn from_difficulties(difficulties: Vec<Difficulty>) -> Option<BeatmapSet> {
        let (set_id, folder, origin) = {
            let first = difficulties.first()?;
            (first.set_id, first.folder.clone(), first.origin)
        };
        Some(BeatmapSet {
            set_id,
            folder,
            origin,
            difficulties,
        })
    }

    /// Re-tag the set and all contained difficulties with a known id.
    pub fn assign_set_id(&mut self, set_id: i32) {
        self.set_id = set_id;
        for diff in self.difficulties.iter_mut() {
            diff.set_id = set_id;
        }
    }
}

/// Arena reference to a difficulty inside the catalog's set container.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DiffId {
    /// Index into the sets vector.
    pub set: usize,
    /// Index into that set's difficulty vector.
    pub diff: usize,
}
