/// Per-map adjustments layered on top of the read-only legacy database.
///
/// Keyed by content hash in the catalog. BPM fields use -1 as a "not set"
/// sentinel: the next load recomputes them from the map's timing points
/// instead of trusting the stored value.
#[derive(Clone, Debug, PartialEq)]
pub struct MapOverrides {
    /// Local audio offset in milliseconds.
    pub local_offset: i16,
    /// Online audio offset in milliseconds.
    pub online_offset: i16,
    /// Authoritative nomod star rating.
    pub star_rating: f32,
    /// Perceptual loudness; 0.0 means "not computed".
    pub loudness: f32,
    /// Lowest BPM, -1 for "recompute on next load".
    pub min_bpm: i32,
    /// Highest BPM, -1 for "recompute on next load".
    pub max_bpm: i32,
    /// Most common BPM, -1 for "recompute on next load".
    pub avg_bpm: i32,
    /// Whether the background image should be drawn.
    pub draw_background: bool,
    /// Cached background image filename.
    pub background_filename: String,
    /// pp algorithm version of the cached values.
    pub ppv2_version: u32,
}

impl Default for MapOverrides {
    fn default() -> MapOverrides {
        MapOverrides {
            local_offset: 0,
            online_offset: 0,
            star_rating: 0.0,
            loudness: 0.0,
            min_bpm: -1,
            max_bpm: -1,
            avg_bpm: -1,
            draw_background: true,
            background_filename: String::new(),
            ppv2_version: 0,
        }
    }
}

impl MapOverrides {
    /// Whether the stored BPM triple can be trusted (no sentinel present).
    pub fn has_bpm(&self) -> bool {
        self.min_bpm != -1
    }
}
