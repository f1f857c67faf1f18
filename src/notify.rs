/// Hooks into the engine's external collaborators. Every method defaults to
/// a no-op so headless use needs no wiring.
///
/// Implementations must be callable from the loader and saver tasks.
pub trait Notifier: Send + Sync {
    /// Show a user-visible toast (load failures, import summaries).
    fn toast(&self, _message: &str) {}

    /// A beatmap set was attached to the live catalog after loading had
    /// already finished (the song browser rebuilds itself from this).
    fn beatmapset_added(&self, _set_id: i32) {}

    /// An asynchronous score save completed.
    fn save_finished(&self, _success: bool) {}

    /// Compressed replay bytes to persist, keyed by the score's timestamp.
    fn store_replay(&self, _timestamp: u64, _data: &[u8]) {}
}

/// A [`Notifier`] that drops everything.
#[derive(Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {}
