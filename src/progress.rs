use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;

/// Seam to whatever owns the chapter list. The reader only reports; it
/// never reads back through this interface.
#[async_trait]
pub trait ChapterProgressHandler: Send + Sync {
    async fn update_last_read_page(&self, chapter: u32, page: u32) -> Result<()>;
    async fn mark_chapter_as_read(&self, chapter: u32) -> Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct ReadingLogData {
    last_read: Option<LastRead>,
    read_chapters: Vec<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct LastRead {
    chapter: u32,
    page: u32,
}

/// JSON-file progress log backing the CLI binary.
pub struct ReadingLog {
    path: PathBuf,
}

impl ReadingLog {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join("readingLog.json"),
        }
    }

    async fn load(&self) -> ReadingLogData {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), "Failed to read log: {e}");
                }
                return ReadingLogData::default();
            }
        };
        serde_json::from_slice(&data).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), "Corrupt reading log, starting fresh: {e}");
            ReadingLogData::default()
        })
    }

    async fn save(&self, data: &ReadingLogData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(&self.path, serde_json::to_vec(data)?).await?;
        Ok(())
    }
}

#[async_trait]
impl ChapterProgressHandler for ReadingLog {
    async fn update_last_read_page(&self, chapter: u32, page: u32) -> Result<()> {
        let mut data = self.load().await;
        data.last_read = Some(LastRead { chapter, page });
        self.save(&data).await
    }

    async fn mark_chapter_as_read(&self, chapter: u32) -> Result<()> {
        let mut data = self.load().await;
        if !data.read_chapters.contains(&chapter) {
            data.read_chapters.push(chapter);
        }
        self.save(&data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn records_last_read_and_completion() {
        let dir = tempdir().unwrap();
        let log = ReadingLog::new(dir.path());

        log.update_last_read_page(4, 11).await.unwrap();
        log.update_last_read_page(4, 12).await.unwrap();
        log.mark_chapter_as_read(4).await.unwrap();
        log.mark_chapter_as_read(4).await.unwrap();

        let data = log.load().await;
        assert_eq!(data.last_read, Some(LastRead { chapter: 4, page: 12 }));
        assert_eq!(data.read_chapters, vec![4]);
    }
}
