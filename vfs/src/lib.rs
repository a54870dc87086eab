//! Remote file access layer
//!
//! Presents files and directories held by a [`RemoteEndpoint`] through a
//! local-style interface:
//! - [`RemoteFile`]: offset-based reads and writes, scatter reads, reopen
//! - [`RemoteFilesystem`]: stat, directory listing, mkdir, unlink, locate
//! - [`FileStager`]: staging and bulk location of file collections
//!
//! [`RemoteEndpoint`]: endpoint::RemoteEndpoint

use common::Result;

pub mod chunk;
pub mod counters;
pub mod dir_cursor;
pub mod file;
pub mod stager;
pub mod stat;
pub mod system;

pub use chunk::ReadSegment;
pub use counters::IoCounters;
pub use dir_cursor::DirectoryCursor;
pub use file::{OpenOptions, RemoteFile, ReopenOutcome, Whence, WriteOutcome};
pub use stager::{FileCollection, FileInfo, FileStager};
pub use stat::{FileMode, FileStatus};
pub use system::{DirHandle, RemoteFilesystem};

/// Integer status for callers that speak return codes: 0 on success, -1 on
/// failure.
pub fn status_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(_) => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Error;

    #[test]
    fn test_status_code() {
        assert_eq!(status_code(&Ok::<_, Error>(5)), 0);
        assert_eq!(status_code::<()>(&Err(Error::InvalidDirHandle)), -1);
    }
}
