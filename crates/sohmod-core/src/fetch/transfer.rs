//! One streaming HTTP GET attempt into the temp archive.

use std::cell::Cell;
use std::path::Path;
use std::str;

use tokio_util::sync::CancellationToken;

use super::{FetchError, FetchOptions, TransferCounters};
use crate::storage::{ArchiveWriter, SinkError, WrittenArchive};

const MAX_REDIRECTS: u32 = 10;

/// Reason a callback stopped the transfer. curl only reports "write error" or
/// "aborted by callback", so the real cause is stashed here.
enum Abort {
    Cancelled,
    TooLarge { limit: u64 },
    Storage(std::io::Error),
}

/// Runs a single GET of `url`, streaming the body into `dest` (truncated first).
/// Blocking; call from `spawn_blocking`.
pub(super) fn fetch_once(
    url: &str,
    dest: &Path,
    opts: &FetchOptions,
    cancel: &CancellationToken,
    counters: Option<&TransferCounters>,
) -> Result<WrittenArchive, FetchError> {
    let mut writer = ArchiveWriter::create(dest, opts.max_bytes, counters.map(|c| c.bytes_handle()))
        .map_err(FetchError::Storage)?;
    let content_length: Cell<Option<u64>> = Cell::new(None);
    let abort: Cell<Option<Abort>> = Cell::new(None);

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
    easy.follow_location(true).map_err(FetchError::Network)?;
    easy.max_redirections(MAX_REDIRECTS)
        .map_err(FetchError::Network)?;
    easy.useragent(concat!("sohmod/", env!("CARGO_PKG_VERSION")))
        .map_err(FetchError::Network)?;
    easy.connect_timeout(opts.connect_timeout)
        .map_err(FetchError::Network)?;
    // Stall detection: abort if throughput stays under the limit for low_speed_time.
    easy.low_speed_limit(opts.low_speed_limit)
        .map_err(FetchError::Network)?;
    easy.low_speed_time(opts.low_speed_time)
        .map_err(FetchError::Network)?;
    easy.timeout(opts.attempt_timeout)
        .map_err(FetchError::Network)?;
    easy.progress(true).map_err(FetchError::Network)?;

    let performed = {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|line| {
                let Ok(line) = str::from_utf8(line) else {
                    return true;
                };
                let line = line.trim();
                // A new status line starts a new header block (redirect hop).
                if line.starts_with("HTTP/") {
                    content_length.set(None);
                    if let Some(c) = counters {
                        c.set_total(0);
                    }
                    return true;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.trim().eq_ignore_ascii_case("content-length") {
                        let len = value.trim().parse::<u64>().ok();
                        if let Some(n) = len.filter(|n| *n > opts.max_bytes) {
                            tracing::debug!(declared = n, limit = opts.max_bytes, "Content-Length over limit");
                            abort.set(Some(Abort::TooLarge {
                                limit: opts.max_bytes,
                            }));
                            return false;
                        }
                        if let (Some(c), Some(n)) = (counters, len) {
                            c.set_total(n);
                        }
                        content_length.set(len);
                    }
                }
                true
            })
            .map_err(FetchError::Network)?;
        transfer
            .write_function(|data| {
                if cancel.is_cancelled() {
                    abort.set(Some(Abort::Cancelled));
                    return Ok(0);
                }
                match writer.write_chunk(data) {
                    Ok(()) => Ok(data.len()),
                    Err(SinkError::TooLarge { limit }) => {
                        abort.set(Some(Abort::TooLarge { limit }));
                        Ok(0)
                    }
                    Err(SinkError::Io(e)) => {
                        tracing::warn!("archive write failed: {}", e);
                        abort.set(Some(Abort::Storage(e)));
                        Ok(0)
                    }
                }
            })
            .map_err(FetchError::Network)?;
        transfer
            .progress_function(|dl_total, _dl_now, _ul_total, _ul_now| {
                if let Some(c) = counters {
                    if dl_total > 0.0 {
                        c.set_total(dl_total as u64);
                    }
                }
                !cancel.is_cancelled()
            })
            .map_err(FetchError::Network)?;
        transfer.perform()
    };

    if let Err(e) = performed {
        if let Some(reason) = abort.take() {
            return Err(match reason {
                Abort::Cancelled => FetchError::Cancelled,
                Abort::TooLarge { limit } => FetchError::TooLarge { limit },
                Abort::Storage(io) => FetchError::Storage(io),
            });
        }
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if e.is_operation_timedout() {
            return Err(FetchError::Timeout);
        }
        // Connection closed before the announced Content-Length arrived.
        if e.is_partial_file() {
            return Err(FetchError::PartialTransfer {
                expected: content_length.get().unwrap_or(0),
                received: writer.written(),
            });
        }
        if e.is_url_malformed() || e.is_unsupported_protocol() {
            return Err(FetchError::InvalidUrl(e.to_string()));
        }
        return Err(FetchError::Network(e));
    }

    let code = easy.response_code().map_err(FetchError::Network)?;
    if !(200..300).contains(&code) {
        return Err(FetchError::HttpStatus(code));
    }

    let received = writer.written();
    if let Some(expected) = content_length.get() {
        if received != expected {
            return Err(FetchError::PartialTransfer { expected, received });
        }
    }

    writer.finish().map_err(FetchError::Storage)
}
