//! Bookkeeping of files written by the documents writer.
//!
//! Doc store files stay open across flushes until the doc store is closed.
//! The commit layer uses these lists to decide what to keep or delete.

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct FileLists {
    open: Vec<String>,
    closed: Vec<String>,
    aborted: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FileTracker {
    lists: Mutex<FileLists>,
}

impl FileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_open(&self, name: impl Into<String>) {
        let name = name.into();
        let mut lists = self.lists.lock();
        debug_assert!(!lists.open.contains(&name));
        lists.open.push(name);
    }

    /// Moves `name` from the open list to the closed list.
    pub fn close(&self, name: &str) {
        let mut lists = self.lists.lock();
        if let Some(pos) = lists.open.iter().position(|f| f == name) {
            lists.open.remove(pos);
        }
        lists.closed.push(name.to_string());
    }

    pub fn clear_closed(&self) {
        self.lists.lock().closed.clear();
    }

    /// Everything still open becomes aborted.
    pub fn abort(&self) {
        let mut lists = self.lists.lock();
        lists.aborted = std::mem::take(&mut lists.open);
    }

    pub fn open_files(&self) -> Vec<String> {
        self.lists.lock().open.clone()
    }

    pub fn closed_files(&self) -> Vec<String> {
        self.lists.lock().closed.clone()
    }

    pub fn aborted_files(&self) -> Vec<String> {
        self.lists.lock().aborted.clone()
    }

    pub fn has_open_files(&self) -> bool {
        !self.lists.lock().open.is_empty()
    }
}
