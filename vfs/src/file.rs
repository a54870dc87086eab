//! Remote file handle.
//!
//! A [`RemoteFile`] owns one open file on an endpoint together with its
//! logical offset and transfer counters. Failures never panic and never
//! roll the offset back: the operation returns `Err` and, for connection
//! failures, the handle stays a zombie until it is reopened.

use crate::chunk::{self, ReadSegment};
use crate::counters::IoCounters;
use common::{runtime_config, Error, OpenMode, RemoteUrl, Result};
use endpoint::{QueryCode, RemoteEndpoint, RemoteFileIo};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Reference point for [`RemoteFile::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Begin,
    Current,
    End,
}

/// Result of a write that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(usize),
    /// The handle was not opened for writing; nothing was sent.
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReopenOutcome {
    Changed,
    /// Same mode, a mode that cannot be reopened into, or CREATE to UPDATE.
    Unchanged,
}

impl ReopenOutcome {
    /// 0 when the file was reopened, 1 otherwise. A failed reopen is -1.
    pub fn code(self) -> i32 {
        match self {
            ReopenOutcome::Changed => 0,
            ReopenOutcome::Unchanged => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Return from `open` at once; the first I/O call waits for the result.
    pub parallel: bool,
    pub compression: i32,
    pub readv_query_key: String,
}

impl Default for OpenOptions {
    fn default() -> Self {
        let cfg = runtime_config();
        Self {
            parallel: cfg.parallel_open,
            compression: cfg.compression,
            readv_query_key: cfg.readv_query_key.clone(),
        }
    }
}

struct Opened {
    io: Box<dyn RemoteFileIo>,
    size: u64,
}

enum OpenState {
    Pending(oneshot::Receiver<Result<Opened>>),
    Open(Box<dyn RemoteFileIo>),
    Closed,
    Zombie(String),
}

async fn open_remote(endpoint: &dyn RemoteEndpoint, url: &RemoteUrl, mode: OpenMode) -> Result<Opened> {
    let io = endpoint.open(url, mode).await?;
    let size = match io.stat().await {
        Ok(info) => info.size,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "cannot stat freshly opened file");
            0
        }
    };
    Ok(Opened { io, size })
}

pub struct RemoteFile {
    endpoint: Arc<dyn RemoteEndpoint>,
    url: RemoteUrl,
    mode: OpenMode,
    compression: i32,
    readv_query_key: String,
    state: OpenState,
    offset: i64,
    end: u64,
    bytes_read: u64,
    bytes_written: u64,
    read_calls: u64,
    counters: Arc<IoCounters>,
}

impl RemoteFile {
    /// Open `url` with a textual mode (`READ`, `UPDATE`, `NEW`/`CREATE`,
    /// `RECREATE`). A failed open does not return an error: the handle comes
    /// back as a zombie and every I/O call on it fails.
    pub async fn open(
        endpoint: Arc<dyn RemoteEndpoint>,
        url: RemoteUrl,
        mode: &str,
        options: OpenOptions,
        counters: Arc<IoCounters>,
    ) -> Self {
        let mode = OpenMode::parse(mode);
        let mut file = Self {
            endpoint,
            url,
            mode,
            compression: options.compression,
            readv_query_key: options.readv_query_key,
            state: OpenState::Closed,
            offset: 0,
            end: 0,
            bytes_read: 0,
            bytes_written: 0,
            read_calls: 0,
            counters,
        };

        if options.parallel {
            let (tx, rx) = oneshot::channel();
            let endpoint = file.endpoint.clone();
            let url = file.url.clone();
            tokio::spawn(async move {
                let result = open_remote(endpoint.as_ref(), &url, mode).await;
                // Nobody is waiting any more; don't leak the remote handle.
                if let Err(Ok(mut opened)) = tx.send(result) {
                    if let Err(e) = opened.io.close().await {
                        tracing::warn!(url = %url, error = %e, "failed to close abandoned file");
                    }
                }
            });
            file.state = OpenState::Pending(rx);
            tracing::debug!(url = %file.url, mode = %mode, "open started in background");
        } else {
            let result = open_remote(file.endpoint.as_ref(), &file.url, mode).await;
            file.state = file.settle(result);
        }
        file
    }

    fn settle(&mut self, result: Result<Opened>) -> OpenState {
        match result {
            Ok(opened) => {
                self.end = opened.size;
                tracing::info!(url = %self.url, mode = %self.mode, size = opened.size, "remote file opened");
                OpenState::Open(opened.io)
            }
            Err(e) => {
                tracing::error!(op = "open", url = %self.url, error = %e, "remote file operation failed");
                OpenState::Zombie(e.to_string())
            }
        }
    }

    /// Wait for a background open to finish. A no-op for any other state.
    pub async fn wait_for_open(&mut self) {
        if !matches!(self.state, OpenState::Pending(_)) {
            return;
        }
        let next = match std::mem::replace(&mut self.state, OpenState::Closed) {
            OpenState::Pending(rx) => match rx.await {
                Ok(result) => self.settle(result),
                Err(_) => OpenState::Zombie("open task ended without a result".to_string()),
            },
            other => other,
        };
        self.state = next;
    }

    fn report(&self, op: &str, err: Error) -> Error {
        tracing::error!(op, url = %self.url, error = %err, "remote file operation failed");
        err
    }

    fn open_io(&self) -> Result<&dyn RemoteFileIo> {
        match &self.state {
            OpenState::Open(io) if io.is_open() => Ok(&**io),
            OpenState::Zombie(reason) => Err(Error::Zombie(reason.clone())),
            _ => Err(Error::NotOpen(self.url.to_string())),
        }
    }

    /// Waits for a pending open, then reports whether I/O is possible.
    pub async fn is_usable(&mut self) -> bool {
        self.wait_for_open().await;
        self.open_io().is_ok()
    }

    pub fn is_open(&self) -> bool {
        matches!(&self.state, OpenState::Open(io) if io.is_open())
    }

    pub fn is_zombie(&self) -> bool {
        matches!(self.state, OpenState::Zombie(_))
    }

    /// Why the last open failed, for a zombie handle.
    pub fn zombie_reason(&self) -> Option<&str> {
        match &self.state {
            OpenState::Zombie(reason) => Some(reason),
            _ => None,
        }
    }

    fn position(&self, op: &str) -> Result<u64> {
        u64::try_from(self.offset).map_err(|_| {
            self.report(
                op,
                Error::InvalidArgument(format!("negative file offset {}", self.offset)),
            )
        })
    }

    /// Offset after moving `len` bytes forward, checked before any I/O.
    fn advanced(&self, op: &str, len: usize) -> Result<i64> {
        i64::try_from(len)
            .ok()
            .and_then(|len| self.offset.checked_add(len))
            .ok_or_else(|| {
                self.report(
                    op,
                    Error::InvalidArgument(format!(
                        "moving {} bytes from offset {} overflows",
                        len, self.offset
                    )),
                )
            })
    }

    /// Read at an absolute position without moving the offset.
    pub async fn read_at(&mut self, buf: &mut [u8], position: u64) -> Result<usize> {
        self.wait_for_open().await;
        let io = self.open_io().map_err(|e| self.report("read_at", e))?;
        let result = io.read(position, buf).await;

        match result {
            Ok(n) => {
                let n = n as u64;
                self.bytes_read += n;
                self.read_calls += 1;
                self.counters.record_read(n);
                tracing::debug!(url = %self.url, position, requested = buf.len(), read = n, "read");
                Ok(n as usize)
            }
            Err(e) => Err(self.report("read_at", e)),
        }
    }

    /// Read at the current offset, then advance the offset by the requested
    /// length even when fewer bytes came back.
    pub async fn read_sequential(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.wait_for_open().await;
        self.open_io().map_err(|e| self.report("read_sequential", e))?;
        let position = self.position("read_sequential")?;
        let next = self.advanced("read_sequential", buf.len())?;
        let n = self.read_at(buf, position).await?;
        self.offset = next;
        Ok(n)
    }

    /// Fill `buf` with the listed segments, back to back, using a single
    /// vector read. Returns the number of bytes the endpoint transferred.
    ///
    /// The chunk limit is asked of the endpoint the file was opened through.
    /// A redirecting endpoint has to answer for the data server it chose.
    pub async fn read_scatter(&mut self, buf: &mut [u8], segments: &[ReadSegment]) -> Result<u64> {
        self.wait_for_open().await;
        self.open_io().map_err(|e| self.report("read_scatter", e))?;

        let needed = chunk::total_length(segments);
        if (buf.len() as u64) < needed {
            return Err(self.report(
                "read_scatter",
                Error::InvalidArgument(format!(
                    "scatter read needs {} bytes, buffer holds {}",
                    needed,
                    buf.len()
                )),
            ));
        }

        let max_chunk = match self.endpoint.query(QueryCode::Config, &self.readv_query_key).await {
            Ok(reply) => chunk::parse_readv_max(&reply),
            Err(e) => Err(Error::Protocol(format!(
                "cannot query {}: {}",
                self.readv_query_key, e
            ))),
        }
        .map_err(|e| self.report("read_scatter", e))?;
        let chunks = chunk::plan_chunks(segments, max_chunk).map_err(|e| self.report("read_scatter", e))?;

        let io = self.open_io().map_err(|e| self.report("read_scatter", e))?;
        let result = io.vector_read(&chunks, &mut buf[..needed as usize]).await;

        match result {
            Ok(info) => {
                self.bytes_read += info.size;
                self.read_calls += 1;
                self.counters.record_read(info.size);
                tracing::debug!(
                    url = %self.url,
                    segments = segments.len(),
                    chunks = chunks.len(),
                    max_chunk,
                    read = info.size,
                    "vector read"
                );
                Ok(info.size)
            }
            Err(e) => Err(self.report("read_scatter", e)),
        }
    }

    /// Write at the current offset and advance it by `data.len()`.
    pub async fn write(&mut self, data: &[u8]) -> Result<WriteOutcome> {
        self.wait_for_open().await;
        self.open_io().map_err(|e| self.report("write", e))?;
        if !self.mode.is_writable() {
            tracing::debug!(url = %self.url, mode = %self.mode, "write ignored on read-only handle");
            return Ok(WriteOutcome::ReadOnly);
        }

        let position = self.position("write")?;
        let next = self.advanced("write", data.len())?;
        let io = self.open_io().map_err(|e| self.report("write", e))?;
        let result = io.write(position, data).await;

        match result {
            Ok(()) => {
                let n = data.len();
                self.offset = next;
                self.end = self.end.max(next as u64);
                self.bytes_written += n as u64;
                self.counters.record_write(n as u64);
                tracing::debug!(url = %self.url, position, written = n, "write");
                Ok(WriteOutcome::Written(n))
            }
            Err(e) => Err(self.report("write", e)),
        }
    }

    /// Move the logical offset. No I/O is done, but a pending open is waited
    /// for so that `End` refers to the size it reported.
    pub async fn seek(&mut self, offset: i64, whence: Whence) -> i64 {
        self.wait_for_open().await;
        let base = match whence {
            Whence::Begin => 0,
            Whence::Current => self.offset,
            Whence::End => i64::try_from(self.end).unwrap_or(i64::MAX),
        };
        self.offset = base.saturating_add(offset);
        self.offset
    }

    /// Current size as reported by the endpoint.
    pub async fn size(&mut self) -> Result<u64> {
        self.wait_for_open().await;
        let io = self.open_io().map_err(|e| self.report("size", e))?;
        let result = io.stat().await;
        match result {
            Ok(info) => {
                self.end = info.size;
                Ok(info.size)
            }
            Err(e) => Err(self.report("size", e)),
        }
    }

    /// Reopen the same URL in `READ` or `UPDATE` mode.
    ///
    /// Nothing is sent to the endpoint unless the mode really changes. An
    /// `Err` means the old handle is gone and the new open failed; the
    /// handle is a zombie afterwards.
    pub async fn reopen(&mut self, mode: &str) -> Result<ReopenOutcome> {
        let new_mode = OpenMode::parse(mode);
        if !matches!(new_mode, OpenMode::Read | OpenMode::Update) {
            tracing::debug!(url = %self.url, requested = mode, "reopen only accepts READ or UPDATE");
            return Ok(ReopenOutcome::Unchanged);
        }
        if new_mode == self.mode || (self.mode == OpenMode::Create && new_mode == OpenMode::Update) {
            return Ok(ReopenOutcome::Unchanged);
        }

        self.wait_for_open().await;
        if let OpenState::Open(mut io) = std::mem::replace(&mut self.state, OpenState::Closed) {
            if let Err(e) = io.close().await {
                tracing::warn!(url = %self.url, error = %e, "close before reopen failed");
            }
        }

        tracing::info!(url = %self.url, from = %self.mode, to = %new_mode, "reopening remote file");
        self.mode = new_mode;
        let result = open_remote(self.endpoint.as_ref(), &self.url, new_mode).await;
        match result {
            Ok(opened) => {
                self.state = self.settle(Ok(opened));
                Ok(ReopenOutcome::Changed)
            }
            Err(e) => {
                self.state = OpenState::Zombie(e.to_string());
                Err(self.report("reopen", e))
            }
        }
    }

    /// Close the remote file. Closing twice is harmless.
    pub async fn close(&mut self) -> Result<()> {
        self.wait_for_open().await;
        match std::mem::replace(&mut self.state, OpenState::Closed) {
            OpenState::Open(mut io) => {
                let result = io.close().await;
                tracing::info!(
                    url = %self.url,
                    bytes_read = self.bytes_read,
                    bytes_written = self.bytes_written,
                    read_calls = self.read_calls,
                    "remote file closed"
                );
                result.map_err(|e| self.report("close", e))
            }
            OpenState::Zombie(reason) => {
                self.state = OpenState::Zombie(reason);
                Ok(())
            }
            OpenState::Closed | OpenState::Pending(_) => Ok(()),
        }
    }

    pub fn url(&self) -> &RemoteUrl {
        &self.url
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn compression(&self) -> i32 {
        self.compression
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn read_calls(&self) -> u64 {
        self.read_calls
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        if self.read_calls > 0 || self.bytes_written > 0 {
            tracing::info!(
                url = %self.url,
                bytes_read = self.bytes_read,
                bytes_written = self.bytes_written,
                read_calls = self.read_calls,
                "remote file transfer summary"
            );
        }

        // A pending open notices the dropped receiver and closes by itself.
        if let OpenState::Open(mut io) = std::mem::replace(&mut self.state, OpenState::Closed) {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let url = self.url.clone();
                    handle.spawn(async move {
                        if let Err(e) = io.close().await {
                            tracing::warn!(url = %url, error = %e, "close on drop failed");
                        }
                    });
                }
                Err(_) => {
                    tracing::warn!(url = %self.url, "remote file dropped outside a runtime, not closed");
                }
            }
        }
    }
}
