//! Read-only listing and streaming access
//!
//! [`ResourceReader`] never acquires locks: validation reads and listings
//! are side-effect-free, so concurrent reads of a locked change are always
//! permitted. Large files stream in bounded-memory chunks with progress
//! reporting; a consumer that stalls past the configured window gets
//! `MEMORY_LIMIT_EXCEEDED` instead of unbounded buffering or silent
//! truncation.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::response::{ChangePage, ChangeStatus, ChangeSummary};
use crate::summary::load_summary;
use chrono::Utc;
use futures::Stream;
use sha2::{Digest, Sha256};
use specflow_lock::LockManager;
use specflow_sandbox::{PathSandbox, Slug};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// Per-session progress snapshot passed to the progress callback
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamProgress {
    /// Bytes read from disk so far
    pub bytes_read: u64,
    /// File size
    pub total_bytes: u64,
    /// `bytes_read / total_bytes` as a percentage
    pub percentage: f64,
    /// 1-based index of the chunk just read
    pub chunk_number: u64,
    /// Total chunks the file will produce
    pub total_chunks: u64,
    /// Bytes currently buffered but not yet delivered
    pub memory_usage: usize,
}

/// Observer invoked every `progress_interval` chunks and on the final chunk
pub type ProgressCallback = Arc<dyn Fn(StreamProgress) + Send + Sync>;

/// Listing parameters
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// 1-based page index; ignored when a token is supplied
    pub page: Option<i64>,
    /// Items per page; defaults to the configured page size
    pub page_size: Option<i64>,
    /// Continuation token from a previous page
    pub next_page_token: Option<String>,
    /// Include archived changes in the listing
    pub include_archived: bool,
}

/// Content of a change member
#[derive(Debug)]
pub enum FileContent {
    /// Small file, read whole
    Full(Vec<u8>),
    /// Large file, delivered in chunks
    Stream(FileStream),
}

/// State shared between the producer task and the consumer
#[derive(Debug)]
struct StreamShared {
    /// Bytes sitting in the channel, for progress reporting
    buffered: AtomicUsize,
    /// Terminal failure to hand the consumer after the channel drains
    error: parking_lot::Mutex<Option<EngineError>>,
    /// Consumer-requested cancellation
    cancelled: AtomicBool,
}

/// Chunked reader over one large file
///
/// Dropping or [`FileStream::cancel`]-ing the stream stops the producer
/// promptly; already-buffered chunks are discarded. A cancelled or failed
/// stream reports `!is_complete()` so the caller knows it saw a prefix,
/// not the whole file.
#[derive(Debug)]
pub struct FileStream {
    rx: mpsc::Receiver<Vec<u8>>,
    shared: Arc<StreamShared>,
    total_bytes: u64,
    total_chunks: u64,
    delivered_bytes: u64,
    error_taken: bool,
}

impl FileStream {
    /// File size in bytes
    #[inline]
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Number of chunks the file produces
    #[inline]
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Whether every byte has been delivered
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.delivered_bytes == self.total_bytes
    }

    /// Stop the read; buffered chunks are released and the producer halts
    pub fn cancel(&mut self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.rx.close();
    }

    /// Next chunk, `None` once the stream ends (complete or cancelled)
    pub async fn next_chunk(&mut self) -> Option<Result<Vec<u8>, EngineError>> {
        futures::future::poll_fn(|cx| self.poll_chunk(cx)).await
    }

    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Vec<u8>, EngineError>>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                self.shared.buffered.fetch_sub(chunk.len(), Ordering::AcqRel);
                self.delivered_bytes += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                if self.error_taken {
                    return Poll::Ready(None);
                }
                match self.shared.error.lock().take() {
                    Some(error) => {
                        self.error_taken = true;
                        Poll::Ready(Some(Err(error)))
                    }
                    None => Poll::Ready(None),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Stream for FileStream {
    type Item = Result<Vec<u8>, EngineError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_chunk(cx)
    }
}

/// Paginated listings and streaming reads over one sandbox root
pub struct ResourceReader {
    config: EngineConfig,
    sandbox: PathSandbox,
    locks: LockManager,
}

impl ResourceReader {
    /// Create a reader; the sandbox must already be rooted
    #[must_use]
    pub fn new(config: EngineConfig, sandbox: PathSandbox) -> Self {
        Self {
            config,
            sandbox,
            locks: LockManager::new(),
        }
    }

    /// Create a reader straight from configuration
    ///
    /// # Errors
    /// Fails when the sandbox root does not exist.
    pub fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        let sandbox = PathSandbox::new(&config.root)?;
        Ok(Self::new(config, sandbox))
    }

    /// List changes with a stable order and resumable continuation tokens
    ///
    /// Sort: `modified_at` desc, `created_at` desc, `slug` asc — ties break
    /// deterministically, and pages stay consistent while new changes
    /// arrive. A token always wins over `page` when both are supplied.
    ///
    /// # Errors
    /// `INVALID_PAGE`, `INVALID_PAGE_SIZE`, `PAGE_SIZE_TOO_LARGE`,
    /// `INVALID_TOKEN` (restart from page 1).
    pub fn list(&self, options: &ListOptions) -> Result<ChangePage, EngineError> {
        let page = options.page.unwrap_or(1);
        if page < 1 {
            return Err(EngineError::InvalidPage(page));
        }
        let page_size = match options.page_size {
            None => self.config.default_page_size,
            Some(size) if size < 1 => return Err(EngineError::InvalidPageSize(size)),
            Some(size) if size as usize > self.config.max_page_size => {
                return Err(EngineError::PageSizeTooLarge {
                    size: size as usize,
                    max: self.config.max_page_size,
                })
            }
            Some(size) => size as usize,
        };

        let mut summaries = self.scan(options.include_archived)?;
        summaries.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.slug.cmp(&b.slug))
        });
        let total = summaries.len();

        let start = match &options.next_page_token {
            Some(token) => {
                let position = summaries
                    .iter()
                    .position(|s| page_token(s) == *token)
                    .ok_or(EngineError::InvalidToken)?;
                position + 1
            }
            None => (page as usize - 1).saturating_mul(page_size),
        };

        let changes: Vec<ChangeSummary> = summaries
            .into_iter()
            .skip(start)
            .take(page_size)
            .collect();
        let has_next_page = start + changes.len() < total;
        let next_page_token = if has_next_page {
            changes.last().map(page_token)
        } else {
            None
        };

        Ok(ChangePage {
            changes,
            total,
            has_next_page,
            next_page_token,
            generated: Utc::now(),
        })
    }

    /// Read one change member, whole or streamed
    ///
    /// Members: `proposal`, `tasks`, or `delta/<path>` under `specs/`.
    /// Files at or below the streaming threshold are returned whole;
    /// larger files stream in `chunk_size` pieces with at most
    /// `max_memory` buffered ahead of the consumer.
    ///
    /// # Errors
    /// `EBADSLUG`, `ENOCHANGE`, `INVALID_MEMBER`, `EPATH_ESCAPE`, or IO
    /// for a missing member.
    pub async fn read_file(
        &self,
        slug: &str,
        member: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<FileContent, EngineError> {
        let slug = Slug::parse(slug)?;
        let dir = self.sandbox.change_dir(&slug);
        if !dir.is_dir() {
            return Err(EngineError::NoChange {
                slug: slug.to_string(),
            });
        }

        let relative = member_path(member)?;
        let path = self.sandbox.resolve_member(&dir, &relative)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| EngineError::io(&path, e))?;
        if !metadata.is_file() {
            return Err(EngineError::InvalidMember {
                member: member.to_string(),
            });
        }

        let size = metadata.len();
        if size <= self.config.streaming_threshold {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| EngineError::io(&path, e))?;
            return Ok(FileContent::Full(bytes));
        }

        tracing::debug!(path = %path.display(), size, "streaming large member");
        Ok(FileContent::Stream(self.spawn_stream(path, size, progress)))
    }

    /// Start the producer task for one streaming read
    fn spawn_stream(
        &self,
        path: PathBuf,
        size: u64,
        progress: Option<ProgressCallback>,
    ) -> FileStream {
        let chunk_size = self.config.chunk_size.max(1);
        let total_chunks = size.div_ceil(chunk_size as u64);
        let capacity = (self.config.max_memory / chunk_size).max(1);
        let stall_timeout = self.config.stall_timeout;
        let progress_interval = self.config.progress_interval.max(1);
        let max_memory = self.config.max_memory;

        let (tx, rx) = mpsc::channel::<Vec<u8>>(capacity);
        let shared = Arc::new(StreamShared {
            buffered: AtomicUsize::new(0),
            error: parking_lot::Mutex::new(None),
            cancelled: AtomicBool::new(false),
        });
        let producer_shared = Arc::clone(&shared);

        tokio::spawn(async move {
            let mut file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    *producer_shared.error.lock() = Some(EngineError::io(&path, e));
                    return;
                }
            };

            let mut bytes_read: u64 = 0;
            let mut chunk_number: u64 = 0;
            loop {
                if producer_shared.cancelled.load(Ordering::Acquire) {
                    tracing::debug!(path = %path.display(), "stream cancelled");
                    return;
                }

                let mut buffer = vec![0u8; chunk_size];
                let n = match file.read(&mut buffer).await {
                    Ok(0) => return,
                    Ok(n) => n,
                    Err(e) => {
                        *producer_shared.error.lock() = Some(EngineError::io(&path, e));
                        return;
                    }
                };
                buffer.truncate(n);
                bytes_read += n as u64;
                chunk_number += 1;

                producer_shared.buffered.fetch_add(n, Ordering::AcqRel);
                let send = tokio::time::timeout(stall_timeout, tx.send(buffer));
                match send.await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        // Consumer dropped the stream.
                        producer_shared.buffered.fetch_sub(n, Ordering::AcqRel);
                        return;
                    }
                    Err(_) => {
                        // Buffer full past the stall window: the consumer is
                        // too slow. Abort rather than grow without bound.
                        producer_shared.buffered.fetch_sub(n, Ordering::AcqRel);
                        *producer_shared.error.lock() =
                            Some(EngineError::MemoryLimitExceeded { limit: max_memory });
                        tracing::warn!(path = %path.display(), "stream aborted: memory limit");
                        return;
                    }
                }

                if let Some(callback) = &progress {
                    let is_final = bytes_read >= size || chunk_number == total_chunks;
                    if chunk_number % progress_interval == 0 || is_final {
                        callback(StreamProgress {
                            bytes_read,
                            total_bytes: size,
                            percentage: (bytes_read as f64 / size as f64) * 100.0,
                            chunk_number,
                            total_chunks,
                            memory_usage: producer_shared.buffered.load(Ordering::Acquire),
                        });
                    }
                }
            }
        });

        FileStream {
            rx,
            shared,
            total_bytes: size,
            total_chunks,
            delivered_bytes: 0,
            error_taken: false,
        }
    }

    /// Collect summaries for every directory whose name is a valid slug
    fn scan(&self, include_archived: bool) -> Result<Vec<ChangeSummary>, EngineError> {
        let root = self.sandbox.root();
        let entries = std::fs::read_dir(root).map_err(|e| EngineError::io(root, e))?;

        let mut summaries = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let Ok(slug) = Slug::parse(&name.to_string_lossy()) else {
                tracing::debug!(name = %name.to_string_lossy(), "skipping non-slug entry");
                continue;
            };
            match load_summary(&self.sandbox, &self.locks, &slug) {
                Ok(summary) => {
                    if include_archived || summary.status != ChangeStatus::Archived {
                        summaries.push(summary);
                    }
                }
                Err(e) => {
                    tracing::debug!(slug = %slug, error = %e, "skipping unreadable change");
                }
            }
        }
        Ok(summaries)
    }
}

/// Opaque continuation token: 16 hex chars of the item's content hash
fn page_token(summary: &ChangeSummary) -> String {
    let input = format!(
        "{}|{}|{}",
        summary.slug,
        summary.modified_at.timestamp_millis(),
        summary.created_at.timestamp_millis()
    );
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

/// Map a member name onto its relative path inside the change directory
fn member_path(member: &str) -> Result<PathBuf, EngineError> {
    match member {
        "proposal" => Ok(PathBuf::from("proposal.md")),
        "tasks" => Ok(PathBuf::from("tasks.md")),
        _ => match member.strip_prefix("delta/") {
            Some(rest) if !rest.is_empty() => Ok(PathBuf::from("specs").join(rest)),
            _ => Err(EngineError::InvalidMember {
                member: member.to_string(),
            }),
        },
    }
}
