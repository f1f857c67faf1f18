use std::cmp::Ordering;

use ordered_float::OrderedFloat;

use crate::hash::ContentHash;
use crate::mods::{ModFlags, Mods};

/// Rank grades, in the order they are persisted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
#[allow(missing_docs)]
pub enum Grade {
    XH = 0,
    SH,
    X,
    S,
    A,
    B,
    C,
    D,
    F,
    /// No grade (unplayed / corrupt record).
    N,
}

/// One completed attempt on a map.
#[derive(Clone, Debug)]
pub struct FinishedScore {
    /// Content hash of the map this score was set on.
    pub beatmap_hash: ContentHash,
    /// Mod selection the score was set with.
    pub mods: Mods,

    /// Total score.
    pub score: u64,
    /// Bonus score accumulated from spinners.
    pub spinner_bonus: u64,
    /// When the score was set (unix seconds).
    pub unix_timestamp: u64,
    /// Wall-clock play duration in milliseconds.
    pub play_time_ms: u64,

    /// Player name.
    pub player_name: String,
    /// Numeric player id, 0 if unknown.
    pub player_id: i32,

    /// Identifier of the client the score was set on.
    pub client: String,
    /// Identifier of the server the score was submitted to.
    pub server: String,

    /// Score id assigned by a foreign server, 0 if none.
    pub foreign_score_id: i64,
    /// Timestamp key of a replay stored by a foreign client, 0 if none.
    pub foreign_replay_ts: u64,

    /// Achieved grade.
    pub grade: Grade,

    /// Count of 300s.
    pub num_300s: u16,
    /// Count of 100s.
    pub num_100s: u16,
    /// Count of 50s.
    pub num_50s: u16,
    /// Count of gekis (all-300 combo ends).
    pub num_gekis: u16,
    /// Count of katus (all-300/100 combo ends).
    pub num_katus: u16,
    /// Count of misses.
    pub num_misses: u16,
    /// Highest combo achieved.
    pub combo_max: u16,
    /// Count of slider breaks.
    pub num_slider_breaks: u16,

    /// Version of the pp algorithm the pp fields were computed with.
    pub ppv2_version: u32,
    /// Computed pp value.
    pub pp: f32,
    /// Total star rating at the score's mods.
    pub stars_total: f32,
    /// Aim star component.
    pub stars_aim: f32,
    /// Speed star component.
    pub stars_speed: f32,

    /// Unstable rate.
    pub unstable_rate: f32,
    /// Mean negative hit error.
    pub hit_error_min: f32,
    /// Mean positive hit error.
    pub hit_error_max: f32,

    /// Maximum combo the map allows, -1 if unknown.
    pub max_possible_combo: i32,
    /// Number of hit objects in the map, -1 if unknown.
    pub num_hit_objects: i32,
    /// Number of circles in the map, -1 if unknown.
    pub num_circles: i32,

    /// Whether the maximum possible combo was achieved.
    pub perfect: bool,

    /// Compressed replay bytes attached to a freshly set score. Handed to
    /// the external replay sink on save; never persisted in the score
    /// database itself.
    pub replay: Option<Vec<u8>>,
}

impl Default for FinishedScore {
    fn default() -> FinishedScore {
        FinishedScore {
            beatmap_hash: ContentHash::ZERO,
            mods: Mods::default(),
            score: 0,
            spinner_bonus: 0,
            unix_timestamp: 0,
            play_time_ms: 0,
            player_name: String::new(),
            player_id: 0,
            client: String::new(),
            server: String::new(),
            foreign_score_id: 0,
            foreign_replay_ts: 0,
            grade: Grade::N,
            num_300s: 0,
            num_100s: 0,
            num_50s: 0,
            num_gekis: 0,
            num_katus: 0,
            num_misses: 0,
            combo_max: 0,
            num_slider_breaks: 0,
            ppv2_version: 0,
            pp: 0.0,
            stars_total: 0.0,
            stars_aim: 0.0,
            stars_speed: 0.0,
            unstable_rate: 0.0,
            hit_error_min: 0.0,
            hit_error_max: 0.0,
            max_possible_combo: -1,
            num_hit_objects: -1,
            num_circles: -1,
            perfect: false,
            replay: None,
        }
    }
}

impl PartialEq for FinishedScore {
    fn eq(&self, other: &FinishedScore) -> bool {
        self.unix_timestamp == other.unix_timestamp
            && self.score == other.score
            && self.mods == other.mods
            && self.beatmap_hash == other.beatmap_hash
            && self.foreign_score_id == other.foreign_score_id
            && self.player_id == other.player_id
            && self.num_300s == other.num_300s
            && self.num_100s == other.num_100s
            && self.num_50s == other.num_50s
            && self.num_misses == other.num_misses
            && self.combo_max == other.combo_max
            && self.player_name == other.player_name
    }
}

/// Weighted hit accuracy in [0, 1].
pub fn calculate_accuracy(num_300s: u16, num_100s: u16, num_50s: u16, num_misses: u16) -> f32 {
    let total = num_300s as u32 + num_100s as u32 + num_50s as u32 + num_misses as u32;
    if total == 0 {
        return 0.0;
    }
    let points = 300 * num_300s as u32 + 100 * num_100s as u32 + 50 * num_50s as u32;
    points as f32 / (300 * total) as f32
}

impl FinishedScore {
    /// Hit accuracy of this score in [0, 1].
    pub fn accuracy(&self) -> f32 {
        calculate_accuracy(self.num_300s, self.num_100s, self.num_50s, self.num_misses)
    }

    /// pp value used for sorting and statistics.
    pub fn get_pp(&self) -> f64 {
        f64::from(self.pp)
    }

    /// Derive the grade from hit counts and visibility mods.
    pub fn calculate_grade(&self) -> Grade {
        let total =
            self.num_300s as u32 + self.num_100s as u32 + self.num_50s as u32 + self.num_misses as u32;
        if total == 0 {
            return Grade::N;
        }

        let hidden = self
            .mods
            .flags
            .intersects(ModFlags::Hidden | ModFlags::Flashlight);
        let ratio_300 = self.num_300s as f32 / total as f32;
        let ratio_50 = self.num_50s as f32 / total as f32;

        if self.num_300s as u32 == total {
            return if hidden { Grade::XH } else { Grade::X };
        }
        if ratio_300 > 0.9 && self.num_misses == 0 && ratio_50 <= 0.01 {
            return if hidden { Grade::SH } else { Grade::S };
        }
        if (ratio_300 > 0.8 && self.num_misses == 0) || ratio_300 > 0.9 {
            return Grade::A;
        }
        if (ratio_300 > 0.7 && self.num_misses == 0) || ratio_300 > 0.8 {
            return Grade::B;
        }
        if ratio_300 > 0.6 {
            return Grade::C;
        }
        Grade::D
    }

    /// Whether a replay could exist for this score. Scores imported from
    /// the legacy variant-A database never carry replays; everything else
    /// is assumed to.
    pub fn has_possible_replay(&self) -> bool {
        !self.client.starts_with("mcosu")
    }
}

/// The available score sort orders. Each is a strict weak order with a
/// deterministic tie-break chain so a sorted list is stable across runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SortOrder {
    /// By total score.
    Score,
    /// By maximum combo.
    Combo,
    /// By date set.
    Date,
    /// By fewest misses.
    Misses,
    /// By accuracy.
    Accuracy,
    /// By pp.
    Pp,
}

impl SortOrder {
    /// Look up a sort order by its user-facing name; `None` for unknown
    /// names (callers fall back to [`SortOrder::Pp`]).
    pub fn from_name(name: &str) -> Option<SortOrder> {
        match name {
            "By score" => Some(SortOrder::Score),
            "By combo" => Some(SortOrder::Combo),
            "By date" => Some(SortOrder::Date),
            "By misses" => Some(SortOrder::Misses),
            "By accuracy" => Some(SortOrder::Accuracy),
            "By pp" => Some(SortOrder::Pp),
            _ => None,
        }
    }

    /// Compare two scores under this order. Better scores sort first.
    pub fn compare(&self, a: &FinishedScore, b: &FinishedScore) -> Ordering {
        let primary = match self {
            SortOrder::Score => b.score.cmp(&a.score),
            SortOrder::Combo => b.combo_max.cmp(&a.combo_max),
            SortOrder::Date => Ordering::Equal,
            SortOrder::Misses => a.num_misses.cmp(&b.num_misses),
            SortOrder::Accuracy => {
                OrderedFloat(b.accuracy()).cmp(&OrderedFloat(a.accuracy()))
            }
            SortOrder::Pp => {
                let a_pp = (a.get_pp() * 1000.0).max(0.0);
                let b_pp = (b.get_pp() * 1000.0).max(0.0);
                OrderedFloat(b_pp).cmp(&OrderedFloat(a_pp))
            }
        };

        primary
            .then_with(|| match self {
                // score is already the primary key here
                SortOrder::Score | SortOrder::Date => Ordering::Equal,
                _ => b.score.cmp(&a.score),
            })
            .then_with(|| b.unix_timestamp.cmp(&a.unix_timestamp))
            .then_with(|| b.player_id.cmp(&a.player_id))
            .then_with(|| b.play_time_ms.cmp(&a.play_time_ms))
    }
}

/// Sort a score list in place under the given order.
pub fn sort_scores_in_place(scores: &mut [FinishedScore], order: SortOrder) {
    if scores.len() < 2 {
        return;
    }
    scores.sort_by(|a, b| order.compare(a, b));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(pp: f32, total: u64, ts: u64) -> FinishedScore {
        FinishedScore {
            pp,
            score: total,
            unix_timestamp: ts,
            ..FinishedScore::default()
        }
    }

    #[test]
    fn test_accuracy() {
        assert_eq!(calculate_accuracy(10, 0, 0, 0), 1.0);
        assert_eq!(calculate_accuracy(0, 0, 0, 10), 0.0);
        // 1x300 + 1x100 over 2 objects
        let acc = calculate_accuracy(1, 1, 0, 0);
        assert!((acc - 400.0 / 600.0).abs() < 1e-6);
    }

    #[test]
    fn test_grade_ss() {
        let mut s = FinishedScore {
            num_300s: 100,
            ..FinishedScore::default()
        };
        assert_eq!(s.calculate_grade(), Grade::X);
        s.mods.flags |= ModFlags::Hidden;
        assert_eq!(s.calculate_grade(), Grade::XH);
    }

    #[test]
    fn test_grade_s_requires_no_misses() {
        let s = FinishedScore {
            num_300s: 95,
            num_100s: 5,
            ..FinishedScore::default()
        };
        assert_eq!(s.calculate_grade(), Grade::S);

        let s = FinishedScore {
            num_300s: 95,
            num_100s: 4,
            num_misses: 1,
            ..FinishedScore::default()
        };
        assert_eq!(s.calculate_grade(), Grade::A);
    }

    #[test]
    fn test_sort_by_pp_ties_on_score() {
        let mut scores = vec![score(100.0, 500, 5), score(100.0, 900, 1), score(200.0, 1, 9)];
        sort_scores_in_place(&mut scores, SortOrder::Pp);
        assert_eq!(scores[0].pp, 200.0);
        assert_eq!(scores[1].score, 900);
        assert_eq!(scores[2].score, 500);
    }

    #[test]
    fn test_sort_by_date() {
        let mut scores = vec![score(1.0, 1, 100), score(2.0, 2, 300), score(3.0, 3, 200)];
        sort_scores_in_place(&mut scores, SortOrder::Date);
        assert_eq!(scores[0].unix_timestamp, 300);
        assert_eq!(scores[2].unix_timestamp, 100);
    }

    #[test]
    fn test_sort_determinism() {
        // identical primaries fall through the whole tie-break chain
        let a = FinishedScore {
            player_id: 2,
            ..score(50.0, 1000, 10)
        };
        let b = FinishedScore {
            player_id: 7,
            ..score(50.0, 1000, 10)
        };
        let mut v1 = vec![a.clone(), b.clone()];
        let mut v2 = vec![b, a];
        sort_scores_in_place(&mut v1, SortOrder::Score);
        sort_scores_in_place(&mut v2, SortOrder::Score);
        assert_eq!(v1[0].player_id, v2[0].player_id);
        assert_eq!(v1[0].player_id, 7);
    }

    #[test]
    fn test_replay_possibility() {
        let mut s = FinishedScore::default();
        s.client = "mcosu-20190226".to_owned();
        assert!(!s.has_possible_replay());
        s.client = "beatdb-win64-release-35.10".to_owned();
        assert!(s.has_possible_replay());
    }
}
