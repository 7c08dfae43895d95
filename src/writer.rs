//! Task writer: per-task byte pipe with resumable progress accounting.
//!
//! A [`TaskWriter`] owns a byte source (what the content provider streams) and a
//! byte sink (where the task store persists the resource). [`TaskWriter::do_write`]
//! copies one into the other until the source is exhausted or the writer is
//! paused. The writer is cheaply cloneable; clones share state, so the pipeline
//! can run the copy while the queue holds another handle to pause it.
//!
//! Progress is tracked twice:
//! - the sink counter is updated after every chunk and is the live value while
//!   a transfer runs;
//! - `bytes_written` is a snapshot taken when the transfer pauses or finishes.
//!   It is the only trustworthy value while the task is paused, because the
//!   next run starts with a fresh sink.

use crate::error::TransferError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Bytes read from the source per iteration
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Byte stream produced by a content provider
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// Byte sink a resource is written to
pub type ByteSink = Box<dyn AsyncWrite + Send + Unpin>;

/// How a call to [`TaskWriter::do_write`] ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The source was exhausted and the sink finalized
    Finish,
    /// The writer was paused; the sink was finalized with a partial resource
    Pause,
}

#[derive(Default)]
struct WriterInner {
    bytes_sum: AtomicU64,
    bytes_written: AtomicU64,
    sink_counter: AtomicU64,
    finished: AtomicBool,
    pause: Mutex<CancellationToken>,
    source: Mutex<Option<ByteSource>>,
    sink: Mutex<Option<ByteSink>>,
}

/// Per-task byte transfer controller
#[derive(Clone, Default)]
pub struct TaskWriter {
    inner: Arc<WriterInner>,
}

impl std::fmt::Debug for TaskWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWriter")
            .field("bytes_sum", &self.bytes_sum())
            .field("bytes_written", &self.bytes_written())
            .field("live_bytes", &self.live_bytes())
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl TaskWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the byte source and the expected total size
    pub fn set_source(&self, source: ByteSource, bytes_sum: u64) {
        *self.inner.source.lock() = Some(source);
        self.inner.bytes_sum.store(bytes_sum, Ordering::SeqCst);
    }

    /// Attach the byte sink
    ///
    /// `already_written` is the number of bytes the sink holds before this run
    /// (non-zero when continuing a partial resource).
    pub fn set_sink(&self, sink: ByteSink, already_written: u64) {
        *self.inner.sink.lock() = Some(sink);
        self.inner
            .sink_counter
            .store(already_written, Ordering::SeqCst);
        self.inner
            .bytes_written
            .store(already_written, Ordering::SeqCst);
    }

    /// Total expected size in bytes (0 if unknown)
    pub fn bytes_sum(&self) -> u64 {
        self.inner.bytes_sum.load(Ordering::SeqCst)
    }

    /// Bytes written as of the last pause or finish
    pub fn bytes_written(&self) -> u64 {
        self.inner.bytes_written.load(Ordering::SeqCst)
    }

    /// Bytes the sink has accepted so far in the current run
    pub fn live_bytes(&self) -> u64 {
        self.inner.sink_counter.load(Ordering::SeqCst)
    }

    /// Progress for a snapshot: the live counter while transferring, the snapshot otherwise
    pub fn progress(&self, transferring: bool) -> u64 {
        if transferring {
            self.live_bytes()
        } else {
            self.bytes_written()
        }
    }

    /// Whether the source has been read to the end
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Whether `pause()` has been called since the last `rearm()`
    pub fn is_paused(&self) -> bool {
        self.inner.pause.lock().is_cancelled()
    }

    /// Replace a consumed pause signal so the writer can run again
    ///
    /// Also clears the finished flag left by a previous run.
    pub fn rearm(&self) {
        *self.inner.pause.lock() = CancellationToken::new();
        self.inner.finished.store(false, Ordering::SeqCst);
    }

    /// Copy the source into the sink
    ///
    /// A sink passed here replaces any sink attached with [`set_sink`](Self::set_sink)
    /// without resetting the counter. Resolves to [`WriteOutcome::Finish`] when the
    /// source is exhausted, [`WriteOutcome::Pause`] when [`pause`](Self::pause) is
    /// called mid-transfer (or was called before the transfer began).
    pub async fn do_write(&self, sink: Option<ByteSink>) -> Result<WriteOutcome, TransferError> {
        if let Some(sink) = sink {
            *self.inner.sink.lock() = Some(sink);
        }
        let mut source = self
            .inner
            .source
            .lock()
            .take()
            .ok_or(TransferError::NoSource)?;
        let mut sink = self.inner.sink.lock().take().ok_or(TransferError::NoSink)?;
        let pause = self.inner.pause.lock().clone();
        self.inner.finished.store(false, Ordering::SeqCst);

        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let outcome = 'copy: loop {
            let read = tokio::select! {
                biased;
                _ = pause.cancelled() => break WriteOutcome::Pause,
                read = source.read(&mut buf) => read,
            };
            let n = read.map_err(TransferError::Source)?;
            if n == 0 {
                self.inner.finished.store(true, Ordering::SeqCst);
                break WriteOutcome::Finish;
            }

            // A stalled sink must not hold off a pause
            let mut pos = 0;
            while pos < n {
                let wrote = tokio::select! {
                    biased;
                    _ = pause.cancelled() => break 'copy WriteOutcome::Pause,
                    wrote = sink.write(&buf[pos..n]) => wrote.map_err(TransferError::Sink)?,
                };
                if wrote == 0 {
                    return Err(TransferError::Sink(std::io::ErrorKind::WriteZero.into()));
                }
                pos += wrote;
                self.inner
                    .sink_counter
                    .fetch_add(wrote as u64, Ordering::SeqCst);
            }
        };

        // Disconnect: the source is dropped on return, the sink is finalized here
        sink.flush().await.map_err(TransferError::Sink)?;
        sink.shutdown().await.map_err(TransferError::Sink)?;

        let written = self.live_bytes();
        self.inner.bytes_written.store(written, Ordering::SeqCst);
        if outcome == WriteOutcome::Finish && self.bytes_sum() == 0 {
            // Size was unknown up front
            self.inner.bytes_sum.store(written, Ordering::SeqCst);
        }

        tracing::debug!(bytes = written, ?outcome, "Byte pipe closed");
        Ok(outcome)
    }

    /// Pause the transfer
    ///
    /// Returns `true` if the source had already been read to the end, in which
    /// case nothing is interrupted and the caller should let the run finish.
    /// Otherwise signals the copy loop to stop and snapshots `bytes_written`.
    pub fn pause(&self) -> bool {
        if self.is_finished() {
            return true;
        }
        self.inner.pause.lock().cancel();
        self.inner
            .bytes_written
            .store(self.live_bytes(), Ordering::SeqCst);
        false
    }
}
