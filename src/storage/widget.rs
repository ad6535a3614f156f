use anyhow::Result;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;

use crate::models::{CurrentChapterData, WidgetSyncState};

const CURRENT_CHAPTER_FILE: &str = "currentChapterData.json";
const SYNC_STATE_FILE: &str = "widgetSyncState.json";
const COVER_IMAGE_FILE: &str = "chapterCoverImage.jpg";

/// Store for the small files shared with the home-screen widget: the
/// current-chapter record, its cover image, and the notifier's private
/// last-reloaded snapshot.
#[derive(Clone)]
pub struct WidgetStore {
    dir: PathBuf,
}

impl WidgetStore {
    pub fn new(shared_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: shared_dir.into(),
        }
    }

    pub async fn load_current_chapter(&self) -> Option<CurrentChapterData> {
        self.load_json(CURRENT_CHAPTER_FILE).await
    }

    pub async fn save_current_chapter(&self, data: &CurrentChapterData) -> Result<()> {
        self.save_json(CURRENT_CHAPTER_FILE, data).await
    }

    pub async fn load_sync_state(&self) -> Option<WidgetSyncState> {
        self.load_json(SYNC_STATE_FILE).await
    }

    pub async fn save_sync_state(&self, state: &WidgetSyncState) -> Result<()> {
        self.save_json(SYNC_STATE_FILE, state).await
    }

    /// Write the cover image and return the path the widget should render.
    pub async fn save_cover_image(&self, image_data: &[u8]) -> Result<PathBuf> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await?;
        }
        let path = self.dir.join(COVER_IMAGE_FILE);
        fs::write(&path, image_data).await?;
        Ok(path)
    }

    /// Missing or unreadable records read as absent; corruption is logged
    /// and treated the same way.
    async fn load_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.dir.join(name);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), "Failed to read widget state: {e}");
                }
                return None;
            }
        };
        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Corrupt widget state, ignoring: {e}");
                None
            }
        }
    }

    async fn save_json<T: serde::Serialize>(&self, name: &str, value: &T) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await?;
        }
        let data = serde_json::to_vec(value)?;
        fs::write(self.dir.join(name), data).await?;
        Ok(())
    }
}
