//! Load and save orchestration.
//!
//! A full load runs on a dedicated background task:
//!
//! ```text
//! Idle → Discover → ReadScores → ReadLegacyScoresA → ReadLegacyScoresB
//!      → ReadMaps → ImportExternals → Publish → Idle
//! ```
//!
//! Phases are strictly serial, scores before maps and native before legacy.
//! Sets are staged in task-local containers and only published at the end,
//! so a cancelled load never leaves partial entries in the difficulty
//! index. Scores go live incrementally (they deduplicate against existing
//! entries), with the score lock held only per insertion.
//!
//! When the legacy map database is absent or unreadable, the raw folder
//! scanner takes over: [`Database::update`] processes songs-folder
//! subdirectories on the caller's thread in ~33 ms slices so the UI never
//! stalls.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::beatmap::{BeatmapSet, Origin};
use crate::db::{self, legacy_maps, maps, scores, DbKind};
use crate::errors::{DbError, DbResult};
use crate::hash::ContentHash;
use crate::osu_file;

use super::Database;

/// Per-tick time budget of the raw folder scanner.
const RAW_SCAN_BUDGET: Duration = Duration::from_millis(33);

impl Database {
    /// Start loading the catalog. Any in-flight load is cancelled and
    /// fully unwound first.
    pub fn load(self: &Arc<Self>) {
        if let Some(handle) = self.loader_thread.lock().take() {
            self.ctx.request_cancel();
            let _ = handle.join();
        }

        self.ctx.reset();
        self.raw_scan_pending.store(false, Ordering::Release);
        {
            let mut raw = self.raw.lock();
            raw.scanning = false;
            raw.pending_folders.clear();
        }

        let legacy_maps_path = db::path_for(DbKind::StableMaps, &self.settings);
        let needs_raw = self.settings.songs_folder().is_dir()
            && (!self.settings.legacy_db_enabled
                || !db::is_legacy_maps_readable(&legacy_maps_path));
        self.needs_raw_load.store(needs_raw, Ordering::Release);

        // full load on the first load since process start, or whenever the
        // map databases need re-reading; otherwise only newly appeared
        // folders are scanned and unioned into the existing catalog
        let full = self.is_first_load.load(Ordering::Acquire) || !needs_raw;
        if full {
            self.catalog.clear_sets();
            self.loudness_pending.lock().clear();
            self.raw.lock().loaded_folders.clear();
            self.maps_loaded.store(false, Ordering::Release);
        }

        // snapshot the import queue; the copy is only cleared once the
        // imports actually loaded, so a cancelled load retries them
        {
            let mut queue = self.import_queue.lock();
            self.import_queue_async.lock().append(&mut queue);
        }

        if full {
            let db = Arc::clone(self);
            *self.loader_thread.lock() = Some(std::thread::spawn(move || run_load(db)));
        } else {
            self.raw_scan_pending.store(true, Ordering::Release);
        }
    }

    /// Request cooperative cancellation of the in-flight load. The loader
    /// stops at its next granularity point and cleans up partial state.
    pub fn cancel(&self) {
        self.ctx.request_cancel();
        self.ctx.set_progress(1.0); // force finished
        self.raw_found_changes.store(true, Ordering::Release);
    }

    /// Drive the raw folder scanner. Call once per application tick; each
    /// call processes as many folders as fit in the frame budget.
    pub fn update(self: &Arc<Self>) {
        if !self.raw_scan_pending.load(Ordering::Acquire) {
            return;
        }

        // one-time folder discovery for this scan
        {
            let mut raw = self.raw.lock();
            if !raw.scanning {
                let song_folder = self.settings.songs_folder();
                let mut folders = list_subfolders(&song_folder);

                let first_scan = raw.loaded_folders.is_empty();
                if !first_scan {
                    // rescans only look at folders that appeared since
                    folders.retain(|name| !raw.loaded_folders.contains(name));
                    let found = folders.len();
                    self.raw_found_changes.store(found > 0, Ordering::Release);
                    if found > 0 {
                        self.notifier.toast(&format!(
                            "Adding {} new beatmap{}.",
                            found,
                            if found == 1 { "" } else { "s" }
                        ));
                    } else {
                        self.notifier.toast("No new beatmaps detected.");
                    }
                }

                info!(
                    "raw load: found {} folders in {}",
                    folders.len(),
                    song_folder.display()
                );
                raw.song_folder = song_folder;
                raw.total = folders.len();
                raw.cur_idx = 0;
                raw.pending_folders = folders;
                raw.scanning = true;

                if raw.total == 0 {
                    raw.scanning = false;
                    drop(raw);
                    self.raw_scan_pending.store(false, Ordering::Release);
                    self.is_first_load.store(false, Ordering::Release);
                    self.ctx.set_progress(1.0);
                    return;
                }
            }
        }

        let start = Instant::now();
        while start.elapsed() < RAW_SCAN_BUDGET {
            if self.ctx.is_cancelled() {
                let mut raw = self.raw.lock();
                raw.scanning = false;
                raw.pending_folders.clear();
                self.raw_scan_pending.store(false, Ordering::Release);
                break;
            }

            let next = {
                let mut raw = self.raw.lock();
                if raw.cur_idx < raw.pending_folders.len() {
                    let name = raw.pending_folders[raw.cur_idx].clone();
                    raw.cur_idx += 1;
                    // remembered so later rescans can diff against it
                    raw.loaded_folders.push(name.clone());
                    Some((raw.song_folder.join(name), raw.cur_idx, raw.total))
                } else {
                    None
                }
            };

            match next {
                Some((folder, cur, total)) => {
                    let _ = self.add_set(&folder, -1, true);
                    self.ctx
                        .set_progress((cur as f32 / total as f32).clamp(0.01, 0.99));
                }
                None => {
                    let nb_sets = self.with_sets(|sets| sets.len());
                    info!("refresh finished, {} beatmap sets in catalog", nb_sets);
                    {
                        let mut raw = self.raw.lock();
                        raw.scanning = false;
                        raw.pending_folders.clear();
                    }
                    self.raw_scan_pending.store(false, Ordering::Release);
                    self.is_first_load.store(false, Ordering::Release);
                    self.ctx.set_progress(1.0);
                    break;
                }
            }
        }
    }

    /// Persist the native map and score databases. Refused while a load is
    /// in progress or has been cancelled.
    pub fn save(&self) {
        if self.is_loading() || self.is_cancelled() {
            debug!("not saving while a load is in flight or cancelled");
            return;
        }
        save_maps(self);
        save_scores(self);
    }
}

fn run_load(db: Arc<Database>) {
    info!("database load started");
    match run_load_inner(&db) {
        Ok(()) => info!("database load finished"),
        // staged state unwinds with the task; re-pin the finished state in
        // case a reader's progress report raced the cancel
        Err(DbError::Cancelled) => {
            db.ctx.set_progress(1.0);
            info!("database load cancelled");
        }
        Err(err) => warn!("database load failed: {}", err),
    }
}

fn run_load_inner(db: &Arc<Database>) -> DbResult<()> {
    let ctx = &*db.ctx;

    // Discover
    let externals = find_databases(db);
    if ctx.is_cancelled() {
        return Err(DbError::Cancelled);
    }

    // ReadScores: native first, then the legacy variants
    tolerate(scores::read_native(
        &db::path_for(DbKind::NativeScores, &db.settings),
        &db.catalog,
        ctx,
        &*db.notifier,
    ))?;
    if ctx.is_cancelled() {
        return Err(DbError::Cancelled);
    }

    tolerate(scores::read_legacy(
        &db::path_for(DbKind::LegacyScores, &db.settings),
        &db.catalog,
        ctx,
    ))?;
    if ctx.is_cancelled() {
        return Err(DbError::Cancelled);
    }

    tolerate(scores::read_stable(
        &db::path_for(DbKind::StableScores, &db.settings),
        &db.catalog,
        ctx,
    ))?;
    db.scores_loaded.store(true, Ordering::Release);

    // imports append in file order; bring every list into the configured
    // sort order once instead of re-sorting per insertion
    {
        let order = *db.catalog.sort_order.lock();
        let mut scores = db.catalog.scores.write();
        for list in scores.values_mut() {
            crate::score::sort_scores_in_place(list, order);
        }
    }
    if ctx.is_cancelled() {
        return Err(DbError::Cancelled);
    }

    // ReadMaps: the native database, then the legacy one
    let mut staging: Vec<BeatmapSet> = Vec::new();
    let mut loudness_pending: Vec<ContentHash> = Vec::new();

    match maps::read(
        &db::path_for(DbKind::NativeMaps, &db.settings),
        &db.settings,
        ctx,
        &*db.notifier,
    ) {
        Ok(native) => {
            // overrides and star ratings merge into the live indices;
            // values computed since the last save win over stored ones
            {
                let mut overrides = db.catalog.overrides.write();
                for (hash, over) in native.overrides {
                    overrides.entry(hash).or_insert(over);
                }
            }
            {
                let mut stars = db.catalog.star_ratings.write();
                for (hash, grid) in native.star_ratings {
                    stars.entry(hash).or_insert(grid);
                }
            }
            staging.extend(native.sets);
            loudness_pending.extend(native.loudness_pending);
            db.maps_loaded.store(true, Ordering::Release);
        }
        Err(DbError::Cancelled) => return Err(DbError::Cancelled),
        // keep maps_loaded false: a file we refused to read must not be
        // overwritten by the next save
        Err(err) => warn!("native map database skipped: {}", err),
    }
    if ctx.is_cancelled() {
        return Err(DbError::Cancelled);
    }

    if !db.needs_raw_load.load(Ordering::Acquire) && db.settings.legacy_db_enabled {
        let overrides_snapshot = db.catalog.overrides.read().clone();
        match legacy_maps::read(
            &db::path_for(DbKind::StableMaps, &db.settings),
            &db.settings,
            &overrides_snapshot,
            ctx,
            &*db.notifier,
        ) {
            Ok(legacy) => {
                staging.extend(legacy.sets);
                loudness_pending.extend(legacy.loudness_pending);
            }
            Err(DbError::Cancelled) => return Err(DbError::Cancelled),
            Err(err) => warn!("legacy map database skipped: {}", err),
        }
    }
    if ctx.is_cancelled() {
        return Err(DbError::Cancelled);
    }

    // ImportExternals: files dropped onto the application
    for (kind, path) in externals {
        if ctx.is_cancelled() {
            return Err(DbError::Cancelled);
        }
        import_database(db, kind, &path)?;
    }
    db.import_queue_async.lock().clear();

    // merge: a difficulty may appear in several sources; first one wins
    dedup_staged(&mut staging);

    // Publish
    db.catalog.publish_sets(staging);
    *db.loudness_pending.lock() = loudness_pending;
    db.is_first_load.store(false, Ordering::Release);

    if db.needs_raw_load.load(Ordering::Acquire) {
        // hand over to the raw folder scanner on the main thread
        db.raw_scan_pending.store(true, Ordering::Release);
    } else {
        db.ctx.set_progress(1.0);
    }

    Ok(())
}

/// Resolve every known database path, sum file sizes for progress
/// reporting, and classify externally dropped files.
fn find_databases(db: &Database) -> Vec<(DbKind, PathBuf)> {
    let mut known = vec![
        db::path_for(DbKind::StableScores, &db.settings),
        db::path_for(DbKind::NativeScores, &db.settings),
        db::path_for(DbKind::LegacyScores, &db.settings),
        db::path_for(DbKind::NativeMaps, &db.settings),
        db::path_for(DbKind::StableCollections, &db.settings),
        db::path_for(DbKind::Collections, &db.settings),
    ];
    if db.settings.legacy_db_enabled {
        known.push(db::path_for(DbKind::StableMaps, &db.settings));
    }
    for path in known {
        if let Ok(meta) = fs::metadata(&path) {
            db.ctx.add_total_bytes(meta.len());
        }
    }

    let mut externals: Vec<(DbKind, PathBuf)> = Vec::new();
    for path in db.import_queue_async.lock().iter() {
        match db::kind_of(path) {
            Ok(kind) => {
                if externals.iter().any(|(k, p)| *k == kind && p == path) {
                    debug!("ignored duplicate database {}", path.display());
                    continue;
                }
                debug!("external {:?} database queued: {}", kind, path.display());
                if let Ok(meta) = fs::metadata(path) {
                    db.ctx.add_total_bytes(meta.len());
                }
                externals.push((kind, path.clone()));
            }
            Err(err) => warn!("invalid external database: {}", err),
        }
    }
    externals
}

/// Import one externally dropped database by its sniffed kind.
fn import_database(db: &Database, kind: DbKind, path: &Path) -> DbResult<()> {
    match kind {
        DbKind::NativeScores => tolerate(scores::read_native(
            path,
            &db.catalog,
            &db.ctx,
            &*db.notifier,
        )),
        DbKind::LegacyScores => tolerate(scores::read_legacy(path, &db.catalog, &db.ctx)),
        DbKind::StableScores => tolerate(scores::read_stable(path, &db.catalog, &db.ctx)),
        DbKind::Collections | DbKind::StableCollections => {
            // collection contents belong to the collections collaborator
            debug!("leaving collection import to the collections collaborator");
            Ok(())
        }
        DbKind::NativeMaps | DbKind::StableMaps => {
            debug!("importing external map databases is not supported");
            Ok(())
        }
    }
}

/// Downgrade per-file errors to warnings; only cancellation unwinds the
/// whole load.
fn tolerate<T>(result: DbResult<T>) -> DbResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(DbError::Cancelled) => Err(DbError::Cancelled),
        Err(err) => {
            warn!("database source skipped: {}", err);
            Ok(())
        }
    }
}

/// Drop difficulties that appear in more than one staged source, then any
/// sets left empty.
fn dedup_staged(staging: &mut Vec<BeatmapSet>) {
    let mut seen: HashSet<ContentHash> = HashSet::new();
    for set in staging.iter_mut() {
        set.difficulties.retain(|diff| seen.insert(diff.hash));
    }
    staging.retain(|set| !set.difficulties.is_empty());
}

/// Names of the direct subdirectories of a folder, sorted for stable scan
/// order across runs.
fn list_subfolders(folder: &Path) -> Vec<String> {
    let mut out = Vec::new();
    if let Ok(entries) = fs::read_dir(folder) {
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                out.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }
    out.sort();
    out
}

/// Parse every chart file in a beatmap folder into a set. Used by the raw
/// scanner and by `add_set`.
pub(crate) fn load_raw_set(folder: &Path, origin: Origin) -> Option<BeatmapSet> {
    let mut folder_str = folder.display().to_string();
    if !folder_str.ends_with('/') {
        folder_str.push('/');
    }

    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("can't read beatmap folder {}: {}", folder.display(), err);
            return None;
        }
    };

    let mut difficulties = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != "osu") {
            continue;
        }
        match osu_file::parse_metadata(&path, &folder_str, origin) {
            Ok(diff) => difficulties.push(diff),
            Err(err) => debug!("couldn't load metadata from {}: {}", path.display(), err),
        }
    }

    let mut set = BeatmapSet::from_difficulties(difficulties)?;
    // charts inside one folder can disagree about their set id; the first
    // one wins and the rest are retagged for consistency
    set.assign_set_id(set.set_id);
    Some(set)
}

/// Write the native map database. Requires a prior successful read of it
/// (a file this build refused to read is never overwritten).
pub(crate) fn save_maps(db: &Database) {
    if !db.maps_loaded.load(Ordering::Acquire) {
        warn!("cannot save maps since they weren't loaded properly first");
        return;
    }
    if db.with_sets(|sets| sets.is_empty()) {
        return;
    }

    let path = db::path_for(DbKind::NativeMaps, &db.settings);

    // lock order: overrides → star ratings → sets
    let overrides = db.catalog.overrides.read();
    let stars = db.catalog.star_ratings.read();
    let sets = db.catalog.sets.read();
    if let Err(err) = maps::write(&path, &sets, &overrides, &stars) {
        warn!("failed to save maps to {}: {}", path.display(), err);
    }
}

/// Write the native score database and report the outcome through the
/// notifier. Failures are retried on the next save.
pub(crate) fn save_scores(db: &Database) {
    if !db.scores_loaded.load(Ordering::Acquire) {
        warn!("cannot save scores since they weren't loaded properly first");
        return;
    }

    let path = db::path_for(DbKind::NativeScores, &db.settings);
    let result = {
        let scores = db.catalog.scores.read();
        scores::write_native(&path, &scores)
    };
    if let Err(err) = &result {
        warn!("failed to save scores to {}: {}", path.display(), err);
    }
    db.notifier.save_finished(result.is_ok());
}
