use common::Result;
use endpoint::RemoteEndpoint;
use std::collections::VecDeque;

/// Forward-only iterator over the names in one remote directory.
///
/// The listing is fetched on the first call to [`next_entry`](Self::next_entry).
/// Once drained it keeps returning `None`; a new cursor is needed to start
/// over.
#[derive(Debug)]
pub struct DirectoryCursor {
    path: String,
    entries: Option<VecDeque<String>>,
}

impl DirectoryCursor {
    pub fn new(path: String) -> Self {
        Self {
            path,
            entries: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.entries.is_some()
    }

    pub async fn next_entry(&mut self, endpoint: &dyn RemoteEndpoint) -> Result<Option<String>> {
        if self.entries.is_none() {
            let listing = endpoint.dir_list(&self.path).await?;
            tracing::debug!(path = %self.path, entries = listing.len(), "directory listed");
            self.entries = Some(listing.into_iter().map(|entry| entry.name).collect());
        }
        Ok(self.entries.as_mut().and_then(VecDeque::pop_front))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use endpoint::memory::MemoryEndpoint;

    #[tokio::test]
    async fn test_entries_once_then_end() {
        let ep = MemoryEndpoint::new("localhost:1094");
        ep.put_file("/d/b", b"").await.unwrap();
        ep.put_file("/d/a", b"").await.unwrap();

        let mut cursor = DirectoryCursor::new("/d".to_string());
        assert!(!cursor.is_loaded());
        assert_eq!(cursor.next_entry(&ep).await.unwrap().as_deref(), Some("a"));
        assert_eq!(cursor.next_entry(&ep).await.unwrap().as_deref(), Some("b"));
        let calls = ep.calls();
        assert_eq!(cursor.next_entry(&ep).await.unwrap(), None);
        assert_eq!(cursor.next_entry(&ep).await.unwrap(), None);
        assert_eq!(ep.calls(), calls);
    }

    #[tokio::test]
    async fn test_failed_listing_stays_unloaded() {
        let ep = MemoryEndpoint::new("localhost:1094");
        let mut cursor = DirectoryCursor::new("/missing".to_string());
        assert!(cursor.next_entry(&ep).await.is_err());
        assert!(!cursor.is_loaded());
    }
}
