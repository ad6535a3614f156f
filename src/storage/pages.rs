use anyhow::Result;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;

use crate::models::{Page, PageIndex, PageIndexEntry};

const INDEX_FILE: &str = "metadata.json";

/// File-backed store for page images, keyed by chapter and primary page
/// number. Single pages resolve by deterministic file name; double-page
/// spreads go through the chapter's sidecar index.
#[derive(Clone)]
pub struct PageStore {
    root: PathBuf,
}

impl PageStore {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            root: cache_root.into(),
        }
    }

    fn chapter_dir(&self, chapter: u32) -> PathBuf {
        self.root.join("Chapters").join(format!("Chapter_{chapter}"))
    }

    /// Look up a cached page. `Ok(None)` is a plain cache miss, not a
    /// failure; only real I/O trouble surfaces as an error.
    pub async fn load(&self, chapter: u32, page: u32) -> Result<Option<Page>> {
        let dir = self.chapter_dir(chapter);

        // Hot path: single pages need no index at all.
        match fs::read(dir.join(format!("Page_{page}.jpg"))).await {
            Ok(data) => {
                return Ok(Some(Page {
                    chapter,
                    page_number: page,
                    second_page_number: None,
                    image_data: data,
                }));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // Fall back to the sidecar index for double-page spreads.
        let index = self.load_index(chapter).await;
        let Some(entry) = index.pages.iter().find(|e| e.page_number == page) else {
            return Ok(None);
        };

        match fs::read(dir.join(&entry.file_name)).await {
            Ok(data) => Ok(Some(Page {
                chapter,
                page_number: entry.page_number,
                second_page_number: Some(entry.second_page_number),
                image_data: data,
            })),
            // Index entry without its image file: orphaned metadata from a
            // partial write. Treat as a miss so the page gets re-fetched.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(
                    chapter,
                    page,
                    file = %entry.file_name,
                    "Index entry has no backing image, treating as cache miss"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a page image; for spreads, also record it in the chapter's
    /// sidecar index. The two writes are not transactional; a crash in
    /// between leaves an orphan image that self-heals on the next save.
    pub async fn save(&self, page: &Page) -> Result<()> {
        let dir = self.chapter_dir(page.chapter);
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
        }

        let file_name = page.file_name();
        fs::write(dir.join(&file_name), &page.image_data).await?;

        if let Some(second) = page.second_page_number {
            let mut index = self.load_index(page.chapter).await;
            index.pages.retain(|e| e.page_number != page.page_number);
            index.pages.push(PageIndexEntry {
                page_number: page.page_number,
                second_page_number: second,
                file_name,
            });
            self.save_index(page.chapter, &index).await?;
        }

        Ok(())
    }

    /// Delete every cached chapter. User-initiated; the only way pages are
    /// ever removed.
    pub async fn clear(&self) -> Result<()> {
        let chapters = self.root.join("Chapters");
        match fs::remove_dir_all(&chapters).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// A missing or corrupt index reads as empty. Corruption loses any
    /// spread entries it held, which then show up as cache misses and get
    /// re-fetched.
    async fn load_index(&self, chapter: u32) -> PageIndex {
        let path = self.chapter_dir(chapter).join(INDEX_FILE);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), "Failed to read page index: {e}");
                }
                return PageIndex::default();
            }
        };
        match serde_json::from_slice(&data) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Corrupt page index, starting empty: {e}");
                PageIndex::default()
            }
        }
    }

    async fn save_index(&self, chapter: u32, index: &PageIndex) -> Result<()> {
        let path = self.chapter_dir(chapter).join(INDEX_FILE);
        let data = serde_json::to_vec(index)?;
        fs::write(&path, data).await?;
        Ok(())
    }
}
