//! The in-memory catalog and the engine facade around it.
//!
//! [`Catalog`] is the data model: difficulties grouped into sets, plus the
//! score, override and star-rating indices, each behind its own
//! reader/writer lock. [`Database`] owns a catalog and adds the load/save
//! machinery, the query surface and player statistics.
//!
//! Lock order, where multiple locks are held at once:
//! scores → overrides → star ratings → difficulty index → sets.

pub mod loader;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::beatmap::{BeatmapSet, DiffId, Difficulty, Origin};
use crate::db::scores::ScoreSink;
use crate::db::{LoadContext, Settings};
use crate::hash::ContentHash;
use crate::mods::ModFlags;
use crate::notify::Notifier;
use crate::overrides::MapOverrides;
use crate::score::{sort_scores_in_place, FinishedScore, SortOrder};
use crate::stars::{bucket_index, SrGrid};

/// The in-memory data model: sets of difficulties plus the hash-keyed
/// score, override and star-rating indices.
///
/// Sets own their difficulties exclusively; the difficulty index holds
/// arena references into the set container. Each index is covered by its
/// own lock so readers never wait on unrelated mutations.
pub struct Catalog {
    pub(crate) sets: RwLock<Vec<BeatmapSet>>,
    pub(crate) diff_index: RwLock<HashMap<ContentHash, DiffId>>,
    pub(crate) scores: RwLock<HashMap<ContentHash, Vec<FinishedScore>>>,
    pub(crate) overrides: RwLock<HashMap<ContentHash, MapOverrides>>,
    pub(crate) star_ratings: RwLock<HashMap<ContentHash, Box<SrGrid>>>,

    /// Set whenever the score index changes; player statistics caches key
    /// off this.
    pub(crate) scores_changed: AtomicBool,
    /// The sort order applied to per-map score lists.
    pub(crate) sort_order: Mutex<SortOrder>,
}

impl Default for Catalog {
    fn default() -> Catalog {
        Catalog {
            sets: RwLock::new(Vec::new()),
            diff_index: RwLock::new(HashMap::new()),
            scores: RwLock::new(HashMap::new()),
            overrides: RwLock::new(HashMap::new()),
            star_ratings: RwLock::new(HashMap::new()),
            scores_changed: AtomicBool::new(true),
            sort_order: Mutex::new(SortOrder::Pp),
        }
    }
}

impl Catalog {
    /// Position of a score with this identity in its map's score list.
    fn find_score_position(
        scores: &HashMap<ContentHash, Vec<FinishedScore>>,
        hash: &ContentHash,
        unix_timestamp: u64,
        player_name: &str,
    ) -> Option<usize> {
        scores.get(hash)?.iter().position(|existing| {
            existing.unix_timestamp == unix_timestamp && existing.player_name == player_name
        })
    }

    /// Insert a score, deduplicating on (map hash, timestamp, player name).
    ///
    /// An existing entry without a replay may be overwritten by an incoming
    /// one that has a replay; all other duplicates are dropped. Returns
    /// whether the score list changed.
    pub(crate) fn add_score_raw(&self, score: &FinishedScore) -> bool {
        let new_might_have_replay = score.has_possible_replay();

        // cheap shared probe first; most imports are either fresh or
        // clearly droppable duplicates
        {
            let scores = self.scores.read();
            if let Some(pos) = Self::find_score_position(
                &scores,
                &score.beatmap_hash,
                score.unix_timestamp,
                &score.player_name,
            ) {
                if !new_might_have_replay {
                    return false;
                }
                if scores[&score.beatmap_hash][pos].has_possible_replay() {
                    return false;
                }
            }
        }

        // the shared lock was dropped above, so another thread may have
        // inserted the same score in the meantime; re-check under the
        // exclusive lock before committing
        let mut scores = self.scores.write();
        let list = scores.entry(score.beatmap_hash).or_default();
        match list.iter().position(|existing| {
            existing.unix_timestamp == score.unix_timestamp
                && existing.player_name == score.player_name
        }) {
            Some(pos) => {
                if new_might_have_replay && !list[pos].has_possible_replay() {
                    list[pos] = score.clone();
                    true
                } else {
                    false
                }
            }
            None => {
                list.push(score.clone());
                true
            }
        }
    }

    /// Re-sort one map's score list under the configured order.
    pub(crate) fn sort_scores(&self, hash: &ContentHash) {
        let order = *self.sort_order.lock();
        let mut scores = self.scores.write();
        if let Some(list) = scores.get_mut(hash) {
            sort_scores_in_place(list, order);
        }
    }

    /// Star rating lookup against the precomputed grid; 0.0 when the map
    /// or the bucket has no entry.
    pub(crate) fn star_rating(&self, hash: &ContentHash, flags: ModFlags, speed: f32) -> f32 {
        let idx = match bucket_index(flags, speed) {
            Some(idx) => idx,
            None => return 0.0,
        };
        let ratings = self.star_ratings.read();
        ratings.get(hash).map(|grid| grid[idx]).unwrap_or(0.0)
    }

    /// Replace the live set container and rebuild the difficulty index.
    /// This is the loader's publish step; everything stays staged until
    /// here, so a cancelled load can never leave stale index entries.
    pub(crate) fn publish_sets(&self, new_sets: Vec<BeatmapSet>) {
        let mut new_index = HashMap::new();
        for (set_idx, set) in new_sets.iter().enumerate() {
            for (diff_idx, diff) in set.difficulties.iter().enumerate() {
                new_index.insert(
                    diff.hash,
                    DiffId {
                        set: set_idx,
                        diff: diff_idx,
                    },
                );
            }
        }

        let mut index = self.diff_index.write();
        let mut sets = self.sets.write();
        *index = new_index;
        *sets = new_sets;
    }

    /// Drop all sets and index entries (full reload).
    pub(crate) fn clear_sets(&self) {
        let mut index = self.diff_index.write();
        let mut sets = self.sets.write();
        index.clear();
        sets.clear();
    }

    /// Attach one parsed set to the live catalog, deduplicating its
    /// difficulties against the index. When a duplicate is found and a
    /// positive id override is supplied, an id-less existing parent set
    /// adopts the id. Returns the attached set's id, or `None` when every
    /// difficulty was a duplicate.
    pub(crate) fn attach_set(&self, mut set: BeatmapSet, set_id_override: i32) -> Option<i32> {
        let mut index = self.diff_index.write();
        let mut sets = self.sets.write();

        let mut kept = Vec::with_capacity(set.difficulties.len());
        for diff in set.difficulties.drain(..) {
            match index.get(&diff.hash) {
                Some(&existing) => {
                    if set_id_override > 0 {
                        if let Some(parent) = sets.get_mut(existing.set) {
                            if parent.set_id == -1 {
                                debug!(
                                    "updating set {} id -1 -> {}",
                                    parent.folder, set_id_override
                                );
                                parent.assign_set_id(set_id_override);
                            }
                        }
                    }
                    debug!("skipping raw {} (already indexed)", diff.hash);
                }
                None => kept.push(diff),
            }
        }
        if kept.is_empty() {
            return None;
        }
        set.difficulties = kept;

        // some chart files carry no ids at all, but the caller may know
        // the set id from where the folder came from
        if set_id_override != -1 {
            set.assign_set_id(set_id_override);
        }

        let set_idx = sets.len();
        for (diff_idx, diff) in set.difficulties.iter().enumerate() {
            index.insert(
                diff.hash,
                DiffId {
                    set: set_idx,
                    diff: diff_idx,
                },
            );
        }
        let set_id = set.set_id;
        sets.push(set);
        Some(set_id)
    }
}

impl ScoreSink for Catalog {
    fn add_score(&self, score: FinishedScore) -> bool {
        let added = self.add_score_raw(&score);
        if added {
            self.scores_changed.store(true, Ordering::Release);
        }
        added
    }

    fn contains_score(&self, hash: &ContentHash, unix_timestamp: u64, player_name: &str) -> bool {
        let scores = self.scores.read();
        Self::find_score_position(&scores, hash, unix_timestamp, player_name).is_some()
    }
}

/// A player's best scores, one per map, picked by pp.
#[derive(Default)]
pub struct PlayerPpScores {
    /// The selected scores, sorted by pp descending.
    pub scores: Vec<FinishedScore>,
    /// Sum of the raw score values of every counted play.
    pub total_score: u64,
}

/// Aggregated player statistics.
#[derive(Clone, Debug, Default)]
pub struct PlayerStats {
    /// Player name the statistics belong to.
    pub name: String,
    /// Weighted total pp.
    pub pp: f32,
    /// Weighted overall accuracy in [0, 1].
    pub accuracy: f32,
    /// Level derived from the total score.
    pub level: i32,
    /// Progress towards the next level in [0, 1].
    pub percent_to_next_level: f32,
    /// Sum of all raw scores.
    pub total_score: u64,
}

/// Per-set and per-folder state of the raw scanner.
#[derive(Default)]
pub(crate) struct RawScanState {
    pub(crate) song_folder: PathBuf,
    pub(crate) pending_folders: Vec<String>,
    pub(crate) loaded_folders: Vec<String>,
    pub(crate) cur_idx: usize,
    pub(crate) total: usize,
    pub(crate) scanning: bool,
}

/// The database engine: a [`Catalog`] plus loading, saving and statistics.
///
/// Constructed behind an `Arc` so the loader and saver tasks can share it.
pub struct Database {
    pub(crate) catalog: Catalog,
    pub(crate) settings: Settings,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) ctx: Arc<LoadContext>,

    pub(crate) loader_thread: Mutex<Option<JoinHandle<()>>>,
    pub(crate) score_saver: Mutex<Option<JoinHandle<()>>>,

    /// Paths dropped onto the application, imported by the next load.
    pub(crate) import_queue: Mutex<Vec<PathBuf>>,
    /// Snapshot of the import queue taken at load start, cleared only
    /// after the imports actually succeeded.
    pub(crate) import_queue_async: Mutex<Vec<PathBuf>>,

    pub(crate) raw: Mutex<RawScanState>,
    pub(crate) is_first_load: AtomicBool,
    pub(crate) raw_found_changes: AtomicBool,
    pub(crate) needs_raw_load: AtomicBool,
    pub(crate) raw_scan_pending: AtomicBool,

    pub(crate) scores_loaded: AtomicBool,
    pub(crate) maps_loaded: AtomicBool,

    pub(crate) stats_cache: Mutex<PlayerStats>,
    /// Hashes of difficulties whose loudness still needs computing, for
    /// the external loudness calculator.
    pub(crate) loudness_pending: Mutex<Vec<ContentHash>>,
}

impl Database {
    /// Create an engine over the given settings and collaborator hooks.
    pub fn new(settings: Settings, notifier: Arc<dyn Notifier>) -> Arc<Database> {
        Arc::new(Database {
            catalog: Catalog::default(),
            settings,
            notifier,
            ctx: Arc::new(LoadContext::default()),
            loader_thread: Mutex::new(None),
            score_saver: Mutex::new(None),
            import_queue: Mutex::new(Vec::new()),
            import_queue_async: Mutex::new(Vec::new()),
            raw: Mutex::new(RawScanState::default()),
            is_first_load: AtomicBool::new(true),
            raw_found_changes: AtomicBool::new(true),
            needs_raw_load: AtomicBool::new(false),
            raw_scan_pending: AtomicBool::new(false),
            scores_loaded: AtomicBool::new(false),
            maps_loaded: AtomicBool::new(false),
            stats_cache: Mutex::new(PlayerStats::default()),
            loudness_pending: Mutex::new(Vec::new()),
        })
    }

    /// Fractional load progress in [0, 1].
    pub fn progress(&self) -> f32 {
        self.ctx.progress()
    }

    /// Whether a load is currently in flight.
    pub fn is_loading(&self) -> bool {
        let progress = self.progress();
        progress > 0.0 && progress < 1.0
    }

    /// Whether the last load ran to completion.
    pub fn is_finished(&self) -> bool {
        self.progress() >= 1.0
    }

    /// Whether the current/last load was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    /// Whether the last rescan found new folders.
    pub fn found_changes(&self) -> bool {
        self.raw_found_changes.load(Ordering::Acquire)
    }

    /// Queue an externally dropped database file for import on the next
    /// load.
    pub fn add_path_to_import(&self, path: impl Into<PathBuf>) {
        self.import_queue.lock().push(path.into());
    }

    /// Look up a difficulty by content hash. `None` while a load is in
    /// flight or when the hash is unknown.
    pub fn difficulty_by_hash(&self, hash: &ContentHash) -> Option<Difficulty> {
        if self.is_loading() {
            debug!("load in progress ({}), lookups return nothing", self.progress());
            return None;
        }

        let index = self.catalog.diff_index.read();
        let id = *index.get(hash)?;
        let sets = self.catalog.sets.read();
        sets.get(id.set)?.difficulties.get(id.diff).cloned()
    }

    /// Look up a difficulty by numeric map id. Id lookups are rare, so
    /// this is a linear scan rather than another index.
    pub fn difficulty_by_id(&self, map_id: i32) -> Option<Difficulty> {
        if self.is_loading() {
            return None;
        }

        let sets = self.catalog.sets.read();
        sets.iter()
            .flat_map(|set| set.difficulties.iter())
            .find(|diff| diff.map_id == map_id)
            .cloned()
    }

    /// Look up a set by id (linear scan). `None` during a load.
    pub fn set_by_id(&self, set_id: i32) -> Option<BeatmapSet> {
        if self.is_loading() {
            return None;
        }

        let sets = self.catalog.sets.read();
        sets.iter().find(|set| set.set_id == set_id).cloned()
    }

    /// Run a closure over the live set container under the shared lock.
    pub fn with_sets<R>(&self, f: impl FnOnce(&[BeatmapSet]) -> R) -> R {
        let sets = self.catalog.sets.read();
        f(&sets)
    }

    /// All scores stored for a map, in the configured sort order.
    pub fn scores_for(&self, hash: &ContentHash) -> Vec<FinishedScore> {
        let scores = self.catalog.scores.read();
        scores.get(hash).cloned().unwrap_or_default()
    }

    /// Change the per-map score sort order by its user-facing name,
    /// falling back to pp for unknown names, and re-sort every list.
    pub fn set_score_sort_order(&self, name: &str) {
        let order = SortOrder::from_name(name).unwrap_or(SortOrder::Pp);
        *self.catalog.sort_order.lock() = order;

        let mut scores = self.catalog.scores.write();
        for list in scores.values_mut() {
            sort_scores_in_place(list, order);
        }
    }

    /// Add a freshly set score. Returns whether it was newly added; if so,
    /// the map's score list is re-sorted and an asynchronous save of the
    /// replay and the score database is kicked off.
    pub fn add_score(self: &Arc<Self>, score: FinishedScore) -> bool {
        let added = self.catalog.add_score_raw(&score);
        if !added {
            return false;
        }

        self.catalog.sort_scores(&score.beatmap_hash);
        self.catalog.scores_changed.store(true, Ordering::Release);

        // wait for a previous save before starting the next one
        let mut saver = self.score_saver.lock();
        if let Some(handle) = saver.take() {
            let _ = handle.join();
        }

        let db = Arc::clone(self);
        *saver = Some(std::thread::spawn(move || {
            if let Some(replay) = score.replay.as_deref() {
                db.notifier.store_replay(score.unix_timestamp, replay);
            }
            loader::save_scores(&db);
        }));

        true
    }

    /// Block until any in-flight asynchronous score save has completed.
    /// Called before teardown so a short-lived save task is never dropped
    /// mid-write.
    pub fn wait_for_pending_saves(&self) {
        if let Some(handle) = self.score_saver.lock().take() {
            let _ = handle.join();
        }
    }

    /// Remove matching score entries. The catalog is marked dirty so
    /// statistics get recomputed.
    pub fn delete_score(&self, score: &FinishedScore) {
        if score.beatmap_hash.is_suspicious() {
            return;
        }

        let mut scores = self.catalog.scores.write();
        if let Some(list) = scores.get_mut(&score.beatmap_hash) {
            let before = list.len();
            list.retain(|existing| existing != score);
            if list.len() != before {
                self.catalog.scores_changed.store(true, Ordering::Release);
            }
        }
    }

    /// Parse a beatmap folder and attach it to the live catalog,
    /// deduplicating against the difficulty index. Notifies the browser
    /// collaborator when loading has already finished.
    pub fn add_set(
        self: &Arc<Self>,
        folder: &Path,
        set_id_override: i32,
        is_legacy: bool,
    ) -> Option<i32> {
        let origin = if is_legacy {
            Origin::Legacy
        } else {
            Origin::Native
        };
        let set = loader::load_raw_set(folder, origin)?;
        let set_id = self.catalog.attach_set(set, set_id_override)?;

        if self.is_finished() {
            self.notifier.beatmapset_added(set_id);
        }
        Some(set_id)
    }

    /// Star rating for a map at the given mods and speed, from the
    /// precomputed grid. 0.0 when absent.
    pub fn star_rating(&self, hash: &ContentHash, flags: ModFlags, speed: f32) -> f32 {
        self.catalog.star_rating(hash, flags, speed)
    }

    /// Store an override snapshot of a legacy difficulty's adjustable
    /// fields, so they survive the read-only legacy database.
    pub fn update_overrides(&self, hash: &ContentHash) {
        if hash.is_suspicious() {
            return;
        }
        let over = {
            let index = self.catalog.diff_index.read();
            let id = match index.get(hash) {
                Some(&id) => id,
                None => return,
            };
            let sets = self.catalog.sets.read();
            match sets.get(id.set).and_then(|set| set.difficulties.get(id.diff)) {
                Some(diff) if diff.origin == Origin::Legacy => diff.overrides(),
                _ => return,
            }
        };
        self.catalog.overrides.write().insert(*hash, over);
    }

    /// Drop the player statistics cache. The background pp recalculator
    /// calls this when a batch finishes, since it rewrites stored pp
    /// values in place.
    pub fn invalidate_stats(&self) {
        self.catalog.scores_changed.store(true, Ordering::Release);
    }

    /// Hashes still waiting for a loudness value, for the external
    /// loudness calculator.
    pub fn pending_loudness(&self) -> Vec<ContentHash> {
        self.loudness_pending.lock().clone()
    }

    /// Record a computed loudness value for a difficulty.
    pub fn set_loudness(&self, hash: &ContentHash, loudness: f32) {
        let mut is_legacy = false;
        {
            let index = self.catalog.diff_index.read();
            if let Some(&id) = index.get(hash) {
                let mut sets = self.catalog.sets.write();
                if let Some(diff) = sets
                    .get_mut(id.set)
                    .and_then(|set| set.difficulties.get_mut(id.diff))
                {
                    diff.loudness = loudness;
                    is_legacy = diff.origin == Origin::Legacy;
                }
            }
        }
        if is_legacy {
            self.update_overrides(hash);
        }
        self.loudness_pending.lock().retain(|h| h != hash);
    }

    /// The 0.95-based weight of the i-th best score.
    pub fn weight_for_index(i: usize) -> f32 {
        0.95_f32.powi(i as i32)
    }

    /// Bonus pp awarded for the number of counted scores.
    pub fn bonus_pp_for_num_scores(num_scores: usize) -> f32 {
        ((417.0 - 1.0 / 3.0) * (1.0 - 0.995_f64.powf(1000.0_f64.min(num_scores as f64)))) as f32
    }

    /// Total score required to reach a level.
    pub fn required_score_for_level(level: i32) -> u64 {
        if level <= 100 {
            if level > 1 {
                let l = f64::from(level);
                return (5000.0 / 3.0 * (4.0 * l.powi(3) - 3.0 * l.powi(2) - l)
                    + (1.25 * 1.8_f64.powf(l - 60.0)).floor())
                .floor() as u64;
            }
            return 1;
        }

        26_931_190_829_u64 + 100_000_000_000_u64 * (level as u64 - 100)
    }

    /// Level reached for a total score, capped at `max_level`.
    pub fn level_for_score_capped(score: u64, max_level: i32) -> i32 {
        let mut i = 0;
        loop {
            if max_level > 0 && i >= max_level {
                return i;
            }
            if score < Self::required_score_for_level(i) {
                return i - 1;
            }
            i += 1;
        }
    }

    /// Level reached for a total score, with the default cap.
    pub fn level_for_score(score: u64) -> i32 {
        Self::level_for_score_capped(score, 120)
    }

    /// A player's best pp score per map, plus their total raw score.
    /// Empty until loading has finished.
    pub fn player_pp_scores(
        &self,
        player_name: &str,
        include_relax_autopilot: bool,
    ) -> PlayerPpScores {
        let mut result = PlayerPpScores::default();
        if self.progress() < 1.0 {
            return result;
        }

        {
            let scores = self.catalog.scores.read();
            for list in scores.values() {
                let mut best: Option<&FinishedScore> = None;
                for score in list.iter() {
                    if score.player_name != player_name {
                        continue;
                    }
                    if !include_relax_autopilot
                        && score
                            .mods
                            .flags
                            .intersects(ModFlags::Relax | ModFlags::Autopilot)
                    {
                        continue;
                    }

                    result.total_score += score.score;
                    if best.map_or(true, |b| score.get_pp() > b.get_pp()) {
                        best = Some(score);
                    }
                }
                if let Some(best) = best {
                    result.scores.push(best.clone());
                }
            }
        }

        result
            .scores
            .sort_by(|a, b| SortOrder::Pp.compare(a, b));
        result
    }

    /// Weighted pp/accuracy/level/total-score statistics for a player.
    /// Cached until the score set changes.
    pub fn calculate_player_stats(&self, player_name: &str) -> PlayerStats {
        {
            let cached = self.stats_cache.lock();
            let scores_changed = self.catalog.scores_changed.load(Ordering::Acquire);
            if cached.name == player_name && !scores_changed {
                return cached.clone();
            }
        }

        let ps = self.player_pp_scores(player_name, false);

        // only latch the cache once scores are actually available
        if !ps.scores.is_empty() || self.is_finished() {
            self.catalog.scores_changed.store(false, Ordering::Release);
        }

        // "If n is the amount of scores giving more pp than a given score,
        // then the score's weight is 0.95^n"
        let mut pp = 0.0_f32;
        let mut accuracy = 0.0_f32;
        for (i, score) in ps.scores.iter().enumerate() {
            let weight = Self::weight_for_index(i);
            pp += score.get_pp() as f32 * weight;
            accuracy += score.accuracy() * weight;
        }

        pp += Self::bonus_pp_for_num_scores(ps.scores.len());

        if !ps.scores.is_empty() {
            accuracy /= 20.0 * (1.0 - Self::weight_for_index(ps.scores.len()));
        }

        let mut stats = PlayerStats {
            name: player_name.to_owned(),
            pp,
            accuracy,
            total_score: ps.total_score,
            ..PlayerStats::default()
        };

        stats.level = Self::level_for_score(ps.total_score);
        let current = Self::required_score_for_level(stats.level);
        let next = Self::required_score_for_level(stats.level + 1);
        if next > current && ps.total_score >= current {
            stats.percent_to_next_level =
                (ps.total_score - current) as f32 / (next - current) as f32;
        }

        *self.stats_cache.lock() = stats.clone();
        stats
    }
}
