//! Tick-epoch timestamp conversion and BPM derivation from timing points.

/// Ticks per second in the proprietary tick epoch.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks from year 1 to the unix epoch.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Stored timestamps above this are assumed to still be in tick form;
/// smaller values are treated as already-unix.
pub const TICK_FORM_THRESHOLD: i64 = 1_000_000_000_000_000;

/// Convert a tick-epoch timestamp to unix seconds.
pub fn ticks_to_unix(ticks: i64) -> i64 {
    (ticks - UNIX_EPOCH_TICKS) / TICKS_PER_SECOND
}

/// Interpret a stored modification timestamp, converting tick-form values
/// left behind by older database versions.
pub fn unix_from_stored(value: i64) -> i64 {
    if value > TICK_FORM_THRESHOLD {
        ticks_to_unix(value)
    } else {
        value
    }
}

/// One timing point as stored in the legacy map database.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TimingEntry {
    /// Milliseconds per beat; negative values are inherited (velocity)
    /// points.
    pub ms_per_beat: f64,
    /// Offset of the point in milliseconds.
    pub offset_ms: f64,
    /// Whether the point sets a new tempo rather than inheriting one.
    pub uninherited: bool,
}

/// Size in bytes of one serialized timing point in the legacy map database.
pub const TIMING_ENTRY_BYTES: u64 = 17;

/// Min/max/most-common BPM of a chart. -1 sentinels mean "not computed".
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BpmInfo {
    /// Lowest BPM.
    pub min: i32,
    /// Highest BPM.
    pub max: i32,
    /// BPM active for the longest total duration.
    pub most_common: i32,
}

impl Default for BpmInfo {
    fn default() -> BpmInfo {
        BpmInfo {
            min: -1,
            max: -1,
            most_common: -1,
        }
    }
}

/// Derive BPM statistics from a chart's timing points. The most-common BPM
/// weights each tempo by the time until the next tempo change (or the end
/// of the chart for the last one).
pub fn compute_bpm(entries: &[TimingEntry], length_ms: f64) -> BpmInfo {
    let mut tempos: Vec<(f64, f64)> = Vec::new(); // (bpm, start offset)
    for entry in entries {
        if entry.uninherited && entry.ms_per_beat > 0.0 {
            tempos.push((60_000.0 / entry.ms_per_beat, entry.offset_ms));
        }
    }
    if tempos.is_empty() {
        return BpmInfo::default();
    }
    tempos.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut min = i32::MAX;
    let mut max = i32::MIN;
    let mut durations: Vec<(i32, f64)> = Vec::new(); // (rounded bpm, total ms)
    for (i, &(bpm, start)) in tempos.iter().enumerate() {
        let rounded = bpm.round() as i32;
        min = min.min(rounded);
        max = max.max(rounded);

        let end = tempos
            .get(i + 1)
            .map(|&(_, next_start)| next_start)
            .unwrap_or_else(|| length_ms.max(start));
        let duration = (end - start).max(0.0);
        match durations.iter_mut().find(|(b, _)| *b == rounded) {
            Some((_, total)) => *total += duration,
            None => durations.push((rounded, duration)),
        }
    }

    let most_common = durations
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|&(bpm, _)| bpm)
        .unwrap_or(-1);

    BpmInfo {
        min,
        max,
        most_common,
    }
}
