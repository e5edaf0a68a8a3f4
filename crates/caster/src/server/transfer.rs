/// Bounded-buffer file transfer for response bodies
///
/// Every span, full or partial, goes through this buffer. Hyper owns the
/// connection socket, so there is no sendfile-style zero-copy path; see
/// "Zero-copy transfer" under the decisions in DESIGN.md.
use super::range::RangeRequest;
use axum::body::Body;
use bytes::{Bytes, BytesMut};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

/// Open a private read-only handle positioned at the start of the span
pub async fn open_span(path: &Path, range: &RangeRequest) -> std::io::Result<File> {
    let mut file = File::open(path).await?;
    if range.start > 0 {
        file.seek(SeekFrom::Start(range.start)).await?;
    }
    Ok(file)
}

/// Stream `range.len()` bytes from `file`, at most `buffer_size` at a time
///
/// Hyper drops the body when the client goes away; that ends the
/// transfer quietly and is only logged.
pub fn stream_span(file: File, range: RangeRequest, buffer_size: usize, label: String) -> Body {
    let stream = async_stream::stream! {
        let mut file = file;
        let mut progress = TransferProgress::new(label, range.len());
        let mut remaining = range.len();

        while remaining > 0 {
            let want = remaining.min(buffer_size as u64) as usize;
            let mut chunk = BytesMut::zeroed(want);

            match file.read(&mut chunk).await {
                Ok(0) => {
                    warn!(
                        "{} ended early: {} bytes short of the advertised length",
                        progress.label, remaining
                    );
                    yield Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
                    break;
                }
                Ok(n) => {
                    chunk.truncate(n);
                    remaining -= n as u64;
                    progress.sent += n as u64;
                    yield Ok::<Bytes, std::io::Error>(chunk.freeze());
                }
                Err(e) => {
                    warn!("Read error while serving {}: {}", progress.label, e);
                    yield Err(e);
                    break;
                }
            }
        }

        progress.finished = remaining == 0;
    };

    Body::from_stream(stream)
}

/// Logs how a transfer ended when the body stream is dropped
struct TransferProgress {
    label: String,
    expected: u64,
    sent: u64,
    finished: bool,
}

impl TransferProgress {
    fn new(label: String, expected: u64) -> Self {
        Self {
            label,
            expected,
            sent: 0,
            finished: false,
        }
    }
}

impl Drop for TransferProgress {
    fn drop(&mut self) {
        if self.finished {
            debug!("Finished sending {} ({} bytes)", self.label, self.sent);
        } else {
            debug!(
                "Client disconnected from {} after {} of {} bytes",
                self.label, self.sent, self.expected
            );
        }
    }
}
