use anyhow::Result;

use crate::fetch::PageFetcher;
use crate::models::{Chapter, ChapterCoverMetadata, CurrentChapterData, Page, SpreadTable};
use crate::notifier::WidgetNotifier;
use crate::progress::ChapterProgressHandler;
use crate::storage::pages::PageStore;
use crate::storage::widget::WidgetStore;

/// Orchestrates one chapter-reading session: serves pages cache-first,
/// fetches and persists misses, and derives the progress and completion
/// signals the widget pipeline consumes.
pub struct ChapterReader<F, H> {
    chapter: Chapter,
    spreads: SpreadTable,
    store: PageStore,
    widget_store: WidgetStore,
    fetcher: F,
    progress_handler: H,
    notifier: WidgetNotifier,
}

impl<F: PageFetcher, H: ChapterProgressHandler> ChapterReader<F, H> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chapter: Chapter,
        spreads: SpreadTable,
        store: PageStore,
        widget_store: WidgetStore,
        fetcher: F,
        progress_handler: H,
        notifier: WidgetNotifier,
    ) -> Self {
        Self {
            chapter,
            spreads,
            store,
            widget_store,
            fetcher,
            progress_handler,
            notifier,
        }
    }

    pub fn chapter(&self) -> &Chapter {
        &self.chapter
    }

    /// Produce the requested pages in order, cache-first. Second halves of
    /// known spreads are skipped outright; pages that fail to fetch are
    /// omitted, so a shorter result is a soft-fail the caller retries later
    /// by asking again.
    pub async fn load_pages(&self, pages: &[u32]) -> Vec<Page> {
        let mut result = Vec::with_capacity(pages.len());

        for &number in pages {
            if self.spreads.is_second_page(number) {
                tracing::debug!(page = number, "Second half of a spread, skipping");
                continue;
            }

            let cached = match self.store.load(self.chapter.number, number).await {
                Ok(cached) => cached,
                Err(e) => {
                    tracing::warn!(
                        chapter = self.chapter.number,
                        page = number,
                        "Cache read failed, falling back to fetch: {e:#}"
                    );
                    None
                }
            };
            if let Some(page) = cached {
                result.push(page);
                continue;
            }

            match self.fetcher.fetch(self.chapter.number, number).await {
                Ok(image_data) => {
                    let page = Page {
                        chapter: self.chapter.number,
                        page_number: number,
                        second_page_number: self.spreads.second_page_of(number),
                        image_data,
                    };
                    // Serve the page even if persisting it failed.
                    if let Err(e) = self.store.save(&page).await {
                        tracing::error!(
                            chapter = self.chapter.number,
                            page = number,
                            "Failed to cache fetched page: {e:#}"
                        );
                    }
                    result.push(page);
                }
                Err(e) => {
                    tracing::warn!(
                        chapter = self.chapter.number,
                        page = number,
                        "Page unavailable this round: {e:#}"
                    );
                }
            }
        }

        result
    }

    /// Batch variant for downloading a chapter ahead of reading. The cover
    /// is saved (and the widget force-reloaded) only the first time the
    /// start page comes in from the network; a fully cached chapter leaves
    /// the widget alone.
    pub async fn prefetch(&self, pages: &[u32]) -> Result<Vec<Page>> {
        let cover_cached = matches!(
            self.store
                .load(self.chapter.number, self.chapter.start_page)
                .await,
            Ok(Some(_))
        );

        let result = self.load_pages(pages).await;

        if !cover_cached {
            if let Some(cover) = result
                .iter()
                .find(|p| p.page_number == self.chapter.start_page)
            {
                self.save_chapter_cover_page(cover).await?;
            }
        }
        Ok(result)
    }

    /// Record that the user is looking at `page`: update the external
    /// chapter list, mark the chapter read on its last page, and hand the
    /// new progress to the notifier (which owns all throttling).
    pub async fn update_current_page_number(&self, page: u32) -> Result<()> {
        let progress = self.chapter.progress_at(page);

        let persisted = async {
            self.progress_handler
                .update_last_read_page(self.chapter.number, page)
                .await?;
            if page == self.chapter.end_page {
                tracing::info!(chapter = self.chapter.number, "Chapter finished");
                self.progress_handler
                    .mark_chapter_as_read(self.chapter.number)
                    .await?;
            }
            Ok(())
        }
        .await;

        self.notifier.notify_progress_change(progress).await;
        persisted
    }

    /// Persist the chapter's cover page for the widget and force a reload;
    /// a chapter switch bypasses all debounce and delta gating.
    pub async fn save_chapter_cover_page(&self, page: &Page) -> Result<()> {
        let metadata = ChapterCoverMetadata {
            chapter_name: self.chapter.name.clone(),
            chapter_number: self.chapter.number,
            read_progress: self.chapter.progress_at(page.page_number),
        };

        let cover_path = self.widget_store.save_cover_image(&page.image_data).await?;
        self.widget_store
            .save_current_chapter(&CurrentChapterData {
                number: metadata.chapter_number,
                name: metadata.chapter_name,
                progress: metadata.read_progress,
                cover_image_path: cover_path.display().to_string(),
            })
            .await?;

        self.notifier
            .notify_chapter_change(self.chapter.number, metadata.read_progress)
            .await;
        Ok(())
    }
}
