use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::models::WidgetSyncState;
use crate::storage::widget::WidgetStore;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);
pub const DEFAULT_MIN_PROGRESS_DELTA: u8 = 5;

/// The platform's "reload the widget" signal. Fire-and-forget.
pub trait WidgetReloader: Send + Sync + 'static {
    fn reload(&self);
}

/// Pokes the widget process by rewriting a signal file it watches.
pub struct SignalFileReloader {
    path: PathBuf,
}

impl SignalFileReloader {
    pub fn new(shared_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: shared_dir.into().join("widgetReload"),
        }
    }
}

impl WidgetReloader for SignalFileReloader {
    fn reload(&self) {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
            .to_string();
        if let Err(e) = std::fs::write(&self.path, stamp) {
            tracing::warn!(path = %self.path.display(), "Failed to signal widget reload: {e}");
        } else {
            tracing::info!("Widget reload signalled");
        }
    }
}

#[derive(Debug)]
enum WidgetEvent {
    ChapterChange { chapter: u32, progress: u8 },
    ProgressChange { progress: u8 },
}

/// Handle to the notifier task. Cloneable; the task exits (flushing any
/// pending debounce) once every handle is dropped.
#[derive(Clone)]
pub struct WidgetNotifier {
    tx: mpsc::Sender<WidgetEvent>,
}

impl WidgetNotifier {
    pub fn spawn(
        store: WidgetStore,
        reloader: Arc<dyn WidgetReloader>,
        debounce: Duration,
        min_delta: u8,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let handle = tokio::spawn(run(rx, store, reloader, debounce, min_delta));
        (Self { tx }, handle)
    }

    /// A chapter switch is always significant: it cancels any pending
    /// progress debounce and reloads unconditionally.
    pub async fn notify_chapter_change(&self, chapter: u32, progress: u8) {
        let _ = self
            .tx
            .send(WidgetEvent::ChapterChange { chapter, progress })
            .await;
    }

    /// (Re)arms the debounce window; only the latest value in a burst is
    /// ever evaluated.
    pub async fn notify_progress_change(&self, progress: u8) {
        let _ = self.tx.send(WidgetEvent::ProgressChange { progress }).await;
    }
}

async fn run(
    mut rx: mpsc::Receiver<WidgetEvent>,
    store: WidgetStore,
    reloader: Arc<dyn WidgetReloader>,
    debounce: Duration,
    min_delta: u8,
) {
    let timer = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(timer);
    // Latest progress value waiting out the debounce window, if any.
    let mut pending: Option<u8> = None;

    loop {
        select! {
            event = rx.recv() => match event {
                Some(WidgetEvent::ChapterChange { chapter, progress }) => {
                    pending = None;
                    let target = WidgetSyncState { chapter, progress };
                    evaluate(&store, reloader.as_ref(), target, true, min_delta).await;
                }
                Some(WidgetEvent::ProgressChange { progress }) => {
                    pending = Some(progress);
                    timer.as_mut().reset(Instant::now() + debounce);
                }
                None => {
                    // All senders gone: flush a still-pending update so a
                    // short-lived caller never loses its last event.
                    if let Some(progress) = pending.take() {
                        fire(&store, reloader.as_ref(), progress, min_delta).await;
                    }
                    break;
                }
            },
            () = &mut timer, if pending.is_some() => {
                if let Some(progress) = pending.take() {
                    fire(&store, reloader.as_ref(), progress, min_delta).await;
                }
            }
        }
    }
}

/// Debounce expiry. The chapter is read from the store *now*, not at event
/// time, so a chapter switch during the window is picked up automatically.
async fn fire(store: &WidgetStore, reloader: &dyn WidgetReloader, progress: u8, min_delta: u8) {
    match store.load_current_chapter().await {
        Some(mut current) => {
            // Keep the record the widget renders in step with the fresh
            // value; a reload into cover-time progress would be stale.
            if current.progress != progress {
                current.progress = progress;
                if let Err(e) = store.save_current_chapter(&current).await {
                    tracing::error!("Failed to update current chapter progress: {e}");
                }
            }
            let target = WidgetSyncState {
                chapter: current.number,
                progress,
            };
            evaluate(store, reloader, target, false, min_delta).await;
        }
        None => {
            tracing::debug!("No current chapter recorded, skipping widget refresh");
        }
    }
}

async fn evaluate(
    store: &WidgetStore,
    reloader: &dyn WidgetReloader,
    target: WidgetSyncState,
    force: bool,
    min_delta: u8,
) {
    let cached = store.load_sync_state().await;
    let reload = force
        || match cached {
            None => true,
            Some(cached) => {
                cached.chapter != target.chapter
                    || target.progress == 100
                    || cached.progress.abs_diff(target.progress) >= min_delta
            }
        };

    if !reload {
        tracing::debug!(
            chapter = target.chapter,
            progress = target.progress,
            "Progress change below threshold, widget not reloaded"
        );
        return;
    }

    // Persist first so an identical follow-up value never re-triggers.
    if let Err(e) = store.save_sync_state(&target).await {
        tracing::error!("Failed to persist widget sync state: {e}");
    }
    reloader.reload();
    tracing::info!(
        chapter = target.chapter,
        progress = target.progress,
        force,
        "Widget reload triggered"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CurrentChapterData;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct CountingReloader {
        count: AtomicUsize,
    }

    impl CountingReloader {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                count: AtomicUsize::new(0),
            })
        }

        fn reloads(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    impl WidgetReloader for CountingReloader {
        fn reload(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn seed_current_chapter(store: &WidgetStore, number: u32) {
        store
            .save_current_chapter(&CurrentChapterData {
                number,
                name: "test".to_string(),
                progress: 0,
                cover_image_path: String::new(),
            })
            .await
            .unwrap();
    }

    // Past the 2s debounce window, with slack for the task to run.
    async fn settle() {
        tokio::time::sleep(DEFAULT_DEBOUNCE + Duration::from_millis(100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_progress_events_coalesces_to_one_reload() {
        let dir = tempdir().unwrap();
        let store = WidgetStore::new(dir.path());
        seed_current_chapter(&store, 7).await;
        let reloader = CountingReloader::new();
        let (notifier, handle) = WidgetNotifier::spawn(
            store.clone(),
            reloader.clone(),
            DEFAULT_DEBOUNCE,
            DEFAULT_MIN_PROGRESS_DELTA,
        );

        for progress in [10, 20, 30, 40] {
            notifier.notify_progress_change(progress).await;
        }
        settle().await;

        assert_eq!(reloader.reloads(), 1);
        // Only the last value of the burst was evaluated and persisted.
        assert_eq!(
            store.load_sync_state().await,
            Some(WidgetSyncState { chapter: 7, progress: 40 })
        );

        drop(notifier);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn small_delta_does_not_reload_large_delta_does() {
        let dir = tempdir().unwrap();
        let store = WidgetStore::new(dir.path());
        seed_current_chapter(&store, 1).await;
        store
            .save_sync_state(&WidgetSyncState { chapter: 1, progress: 50 })
            .await
            .unwrap();
        let reloader = CountingReloader::new();
        let (notifier, handle) = WidgetNotifier::spawn(
            store.clone(),
            reloader.clone(),
            DEFAULT_DEBOUNCE,
            DEFAULT_MIN_PROGRESS_DELTA,
        );

        notifier.notify_progress_change(53).await;
        settle().await;
        assert_eq!(reloader.reloads(), 0);
        assert_eq!(
            store.load_sync_state().await,
            Some(WidgetSyncState { chapter: 1, progress: 50 })
        );

        notifier.notify_progress_change(56).await;
        settle().await;
        assert_eq!(reloader.reloads(), 1);
        assert_eq!(
            store.load_sync_state().await,
            Some(WidgetSyncState { chapter: 1, progress: 56 })
        );

        drop(notifier);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_progress_rewrites_the_shared_chapter_record() {
        let dir = tempdir().unwrap();
        let store = WidgetStore::new(dir.path());
        seed_current_chapter(&store, 4).await;
        let reloader = CountingReloader::new();
        let (notifier, handle) = WidgetNotifier::spawn(
            store.clone(),
            reloader.clone(),
            DEFAULT_DEBOUNCE,
            DEFAULT_MIN_PROGRESS_DELTA,
        );

        notifier.notify_progress_change(75).await;
        settle().await;

        assert_eq!(reloader.reloads(), 1);
        // The record the widget renders carries the fired value, not the
        // progress it was seeded with.
        let current = store.load_current_chapter().await.unwrap();
        assert_eq!(current.progress, 75);
        assert_eq!(current.number, 4);

        drop(notifier);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn full_progress_always_reloads_regardless_of_delta() {
        let dir = tempdir().unwrap();
        let store = WidgetStore::new(dir.path());
        seed_current_chapter(&store, 1).await;
        store
            .save_sync_state(&WidgetSyncState { chapter: 1, progress: 98 })
            .await
            .unwrap();
        let reloader = CountingReloader::new();
        let (notifier, handle) = WidgetNotifier::spawn(
            store.clone(),
            reloader.clone(),
            DEFAULT_DEBOUNCE,
            DEFAULT_MIN_PROGRESS_DELTA,
        );

        notifier.notify_progress_change(100).await;
        settle().await;
        assert_eq!(reloader.reloads(), 1);

        drop(notifier);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn chapter_change_cancels_pending_debounce_and_forces_reload() {
        let dir = tempdir().unwrap();
        let store = WidgetStore::new(dir.path());
        seed_current_chapter(&store, 1).await;
        store
            .save_sync_state(&WidgetSyncState { chapter: 1, progress: 50 })
            .await
            .unwrap();
        let reloader = CountingReloader::new();
        let (notifier, handle) = WidgetNotifier::spawn(
            store.clone(),
            reloader.clone(),
            DEFAULT_DEBOUNCE,
            DEFAULT_MIN_PROGRESS_DELTA,
        );

        // Below-threshold progress event, immediately superseded by a
        // chapter switch mid-debounce.
        notifier.notify_progress_change(52).await;
        notifier.notify_chapter_change(2, 0).await;
        settle().await;

        // Exactly one reload: the forced chapter change. The pending
        // progress debounce was cancelled, not fired.
        assert_eq!(reloader.reloads(), 1);
        assert_eq!(
            store.load_sync_state().await,
            Some(WidgetSyncState { chapter: 2, progress: 0 })
        );

        drop(notifier);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn first_observation_always_reloads() {
        let dir = tempdir().unwrap();
        let store = WidgetStore::new(dir.path());
        seed_current_chapter(&store, 3).await;
        let reloader = CountingReloader::new();
        let (notifier, handle) = WidgetNotifier::spawn(
            store.clone(),
            reloader.clone(),
            DEFAULT_DEBOUNCE,
            DEFAULT_MIN_PROGRESS_DELTA,
        );

        notifier.notify_progress_change(1).await;
        settle().await;
        assert_eq!(reloader.reloads(), 1);

        drop(notifier);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn without_current_chapter_the_debounce_fires_into_nothing() {
        let dir = tempdir().unwrap();
        let store = WidgetStore::new(dir.path());
        let reloader = CountingReloader::new();
        let (notifier, handle) = WidgetNotifier::spawn(
            store.clone(),
            reloader.clone(),
            DEFAULT_DEBOUNCE,
            DEFAULT_MIN_PROGRESS_DELTA,
        );

        notifier.notify_progress_change(42).await;
        settle().await;
        assert_eq!(reloader.reloads(), 0);
        assert!(store.load_sync_state().await.is_none());

        drop(notifier);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_all_handles_flushes_a_pending_event() {
        let dir = tempdir().unwrap();
        let store = WidgetStore::new(dir.path());
        seed_current_chapter(&store, 9).await;
        let reloader = CountingReloader::new();
        let (notifier, handle) = WidgetNotifier::spawn(
            store.clone(),
            reloader.clone(),
            DEFAULT_DEBOUNCE,
            DEFAULT_MIN_PROGRESS_DELTA,
        );

        notifier.notify_progress_change(33).await;
        drop(notifier);
        handle.await.unwrap();

        assert_eq!(reloader.reloads(), 1);
        assert_eq!(
            store.load_sync_state().await,
            Some(WidgetSyncState { chapter: 9, progress: 33 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sync_state_survives_restart_and_suppresses_duplicates() {
        let dir = tempdir().unwrap();
        let store = WidgetStore::new(dir.path());
        seed_current_chapter(&store, 5).await;
        let reloader = CountingReloader::new();

        {
            let (notifier, handle) = WidgetNotifier::spawn(
                store.clone(),
                reloader.clone(),
                DEFAULT_DEBOUNCE,
                DEFAULT_MIN_PROGRESS_DELTA,
            );
            notifier.notify_progress_change(50).await;
            settle().await;
            drop(notifier);
            handle.await.unwrap();
        }
        assert_eq!(reloader.reloads(), 1);

        // A fresh notifier over the same store sees the persisted snapshot
        // and stays quiet for a below-threshold repeat.
        let (notifier, handle) = WidgetNotifier::spawn(
            store.clone(),
            reloader.clone(),
            DEFAULT_DEBOUNCE,
            DEFAULT_MIN_PROGRESS_DELTA,
        );
        notifier.notify_progress_change(52).await;
        settle().await;
        assert_eq!(reloader.reloads(), 1);

        drop(notifier);
        handle.await.unwrap();
    }
}
