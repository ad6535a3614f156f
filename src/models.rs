use serde::{Deserialize, Serialize};

/// One unit of persisted comic content. A double-page spread carries both
/// logical page numbers but is stored as a single artifact keyed by the
/// lower one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub chapter: u32,
    pub page_number: u32,
    pub second_page_number: Option<u32>,
    pub image_data: Vec<u8>,
}

impl Page {
    pub fn file_name(&self) -> String {
        match self.second_page_number {
            Some(second) => format!("Page_{}-{}.jpg", self.page_number, second),
            None => format!("Page_{}.jpg", self.page_number),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub number: u32,
    pub name: String,
    pub start_page: u32,
    pub end_page: u32,
}

impl Chapter {
    /// Reading progress at `page`, clamped to 0..=100. Pages before the
    /// chapter start count as 0, the last page is always exactly 100.
    pub fn progress_at(&self, page: u32) -> u8 {
        let start = i64::from(self.start_page);
        let end = i64::from(self.end_page);
        let total = end - start + 1;
        if total <= 0 {
            return 0;
        }
        let read = i64::from(page) - start + 1;
        let progress = read * 100 / total;
        progress.clamp(0, 100) as u8
    }
}

/// Produced when a chapter's cover page is fetched or its progress changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChapterCoverMetadata {
    pub chapter_name: String,
    pub chapter_number: u32,
    pub read_progress: u8,
}

/// The single "chapter the user is currently reading" record shared with
/// the home-screen widget. Overwritten in place, never a history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentChapterData {
    pub number: u32,
    pub name: String,
    pub progress: u8,
    pub cover_image_path: String,
}

/// Snapshot of the last state that actually triggered a widget reload.
/// Internal to the notifier, distinct from [`CurrentChapterData`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WidgetSyncState {
    pub chapter: u32,
    pub progress: u8,
}

/// Sidecar index for one chapter folder. Only double-page spreads need an
/// entry; single pages resolve to `Page_{p}.jpg` with no lookup at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageIndex {
    pub pages: Vec<PageIndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageIndexEntry {
    pub page_number: u32,
    pub second_page_number: u32,
    pub file_name: String,
}

/// Which consecutive page pairs the comic renders as one combined image.
/// These are quirks of this specific comic's pagination (8/9 and 20/21 at
/// the time of writing), so the table is data handed in at construction,
/// not a rule inferred from page numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadTable {
    pairs: Vec<(u32, u32)>,
}

impl Default for SpreadTable {
    fn default() -> Self {
        Self::from_pairs(vec![(8, 9), (20, 21)])
    }
}

impl SpreadTable {
    pub fn from_pairs(pairs: Vec<(u32, u32)>) -> Self {
        Self { pairs }
    }

    /// The second half of the spread starting at `primary`, if any.
    pub fn second_page_of(&self, primary: u32) -> Option<u32> {
        self.pairs
            .iter()
            .find(|(first, _)| *first == primary)
            .map(|(_, second)| *second)
    }

    /// True for page numbers that are the second half of a spread; these
    /// are never fetched or stored independently.
    pub fn is_second_page(&self, page: u32) -> bool {
        self.pairs.iter().any(|(_, second)| *second == page)
    }
}
