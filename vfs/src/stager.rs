//! Staging of offline files and bulk location lookup.

use crate::system::RemoteFilesystem;
use common::{runtime_config, RemoteUrl, Result};
use endpoint::RemoteEndpoint;
use std::sync::Arc;

/// Put in front of an entry that could not be located.
pub const PLACEHOLDER_UNRESOLVED: &str = "noop://none";
/// Put in front of an entry served by the entry point itself.
pub const PLACEHOLDER_REDIRECT: &str = "noop://redir";

/// Extract the priority from a stage option string.
///
/// Tokens are separated by space, comma or `|`. Only `priority=<digits>`
/// fitting in a byte counts; the last one wins. Anything else yields 0.
pub fn parse_stage_priority(options: &str) -> u8 {
    let mut priority = 0;
    for token in options.split([' ', ',', '|']) {
        let Some(value) = token.strip_prefix("priority=") else {
            continue;
        };
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if let Ok(parsed) = value.parse::<u8>() {
            priority = parsed;
        }
    }
    priority
}

/// One entry of a [`FileCollection`]: its candidate URLs, current first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    urls: Vec<RemoteUrl>,
    staged: bool,
}

impl FileInfo {
    pub fn new(url: RemoteUrl) -> Self {
        Self {
            urls: vec![url],
            staged: false,
        }
    }

    pub fn current_url(&self) -> &RemoteUrl {
        &self.urls[0]
    }

    pub fn urls(&self) -> &[RemoteUrl] {
        &self.urls
    }

    /// Add a URL, in front (becoming current) or at the back.
    pub fn add_url(&mut self, url: RemoteUrl, in_front: bool) {
        if in_front {
            self.urls.insert(0, url);
        } else {
            self.urls.push(url);
        }
    }

    pub fn is_staged(&self) -> bool {
        self.staged
    }

    pub fn set_staged(&mut self, staged: bool) {
        self.staged = staged;
    }
}

/// Named, ordered set of files, e.g. the inputs of one dataset.
#[derive(Debug, Clone, Default)]
pub struct FileCollection {
    name: String,
    files: Vec<FileInfo>,
}

impl FileCollection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push(&mut self, info: FileInfo) {
        self.files.push(info);
    }

    pub fn files(&self) -> &[FileInfo] {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut [FileInfo] {
        &mut self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Current paths of all entries.
    pub fn paths(&self) -> Vec<String> {
        self.files
            .iter()
            .map(|info| info.current_url().path().to_string())
            .collect()
    }
}

/// Stager front end over a [`RemoteFilesystem`].
pub struct FileStager {
    name: String,
    system: RemoteFilesystem,
}

impl FileStager {
    pub fn new(endpoint: Arc<dyn RemoteEndpoint>, url: RemoteUrl) -> Self {
        Self::with_name(endpoint, url, &runtime_config().stager_name)
    }

    pub fn with_name(endpoint: Arc<dyn RemoteEndpoint>, url: RemoteUrl, name: &str) -> Self {
        Self {
            name: name.to_string(),
            system: RemoteFilesystem::new(endpoint, url),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system(&self) -> &RemoteFilesystem {
        &self.system
    }

    /// Whether this stager handles the stager type `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.name == name
    }

    /// A path is staged when it exists and is online.
    pub async fn is_staged(&self, path: &str) -> bool {
        match self.system.stat(path).await {
            Ok(status) => !status.is_offline(),
            Err(_) => false,
        }
    }

    pub async fn locate(&self, path: &str) -> Result<RemoteUrl> {
        self.system.locate(path).await
    }

    pub async fn locate_collection(
        &self,
        collection: Option<&mut FileCollection>,
        add_placeholder: bool,
    ) -> Result<usize> {
        self.system.locate_collection(collection, add_placeholder).await
    }

    pub async fn stage(&self, path: &str, options: &str) -> Result<()> {
        self.system.stage(path, options).await
    }

    /// Stage every entry of `collection` in one request.
    pub async fn stage_collection(&self, collection: &FileCollection, options: &str) -> Result<()> {
        self.system.stage_collection(&collection.paths(), options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use endpoint::memory::MemoryEndpoint;

    #[test]
    fn test_priority_parsing() {
        assert_eq!(parse_stage_priority("option=x priority=3"), 3);
        assert_eq!(parse_stage_priority("priority=7,other"), 7);
        assert_eq!(parse_stage_priority("a|priority=12|b"), 12);
        assert_eq!(parse_stage_priority("priority=1 priority=2"), 2);
        assert_eq!(parse_stage_priority("priority=2 priority=bad"), 2);
        assert_eq!(parse_stage_priority("priority=256"), 0);
        assert_eq!(parse_stage_priority("priority=-1"), 0);
        assert_eq!(parse_stage_priority("priority="), 0);
        assert_eq!(parse_stage_priority("xpriority=4"), 0);
        assert_eq!(parse_stage_priority(""), 0);
    }

    #[test]
    fn test_file_info_urls() {
        let mut info = FileInfo::new(RemoteUrl::parse("root://a:1094//f").unwrap());
        info.add_url(RemoteUrl::parse("root://b:1094//f").unwrap(), false);
        assert_eq!(info.current_url().host_id(), "a:1094");
        info.add_url(RemoteUrl::parse(PLACEHOLDER_REDIRECT).unwrap(), true);
        assert_eq!(info.current_url().scheme(), "noop");
        assert_eq!(info.urls().len(), 3);
    }

    async fn stager() -> (Arc<MemoryEndpoint>, FileStager) {
        let ep = MemoryEndpoint::new("localhost:1094");
        ep.put_file("/store/one.root", b"1").await.unwrap();
        ep.put_file("/store/two.root", b"22").await.unwrap();
        ep.set_offline("/store/two.root", true).await.unwrap();
        let ep = Arc::new(ep);
        let url = RemoteUrl::parse("root://localhost:1094/").unwrap();
        (ep.clone(), FileStager::with_name(ep, url, "xrd"))
    }

    #[tokio::test]
    async fn test_is_staged_and_matches() {
        let (_ep, stager) = stager().await;
        assert!(stager.matches("xrd"));
        assert!(!stager.matches("castor"));
        assert!(stager.is_staged("/store/one.root").await);
        assert!(!stager.is_staged("/store/two.root").await);
        assert!(!stager.is_staged("/store/missing.root").await);
    }

    #[tokio::test]
    async fn test_stage_collection_brings_files_online() {
        let (ep, stager) = stager().await;
        let mut collection = FileCollection::new("dataset");
        for path in ["/store/one.root", "/store/two.root"] {
            collection.push(FileInfo::new(
                RemoteUrl::from_parts("root", "localhost:1094", path).unwrap(),
            ));
        }

        stager.stage_collection(&collection, "priority=5").await.unwrap();
        let prepared = ep.prepared().await;
        assert_eq!(prepared[0].paths, collection.paths());
        assert_eq!(prepared[0].priority, 5);
        assert!(stager.is_staged("/store/two.root").await);

        assert_eq!(stager.locate_collection(Some(&mut collection), false).await.unwrap(), 2);
        assert!(collection.files().iter().all(FileInfo::is_staged));
    }

    #[tokio::test]
    async fn test_default_name_from_config() {
        let ep: Arc<dyn RemoteEndpoint> = Arc::new(MemoryEndpoint::new("localhost:1094"));
        let stager = FileStager::new(ep, RemoteUrl::parse("root://localhost:1094/").unwrap());
        assert_eq!(stager.name(), runtime_config().stager_name);
        let located = stager.locate("/").await;
        assert!(located.is_ok());
    }
}
