//! NDJSON transport: line-framed reads from the host, one flushed JSON
//! line per reply.
//!
//! The loop is strictly sequential. Each line is fully processed, inference
//! included, before the next read. A malformed line produces one `error`
//! reply and the loop continues; a panic escaping a handler is caught at
//! the loop boundary and reported the same way. Only EOF or `shutdown` ends
//! the loop.

use crate::backend::InferenceBackend;
use crate::error::{Result, SidecarError};
use crate::protocol::Reply;
use crate::session::{Dispatcher, Flow, ReplySink};
use futures_util::FutureExt;
use serde_json::Value;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Reply sink writing compact JSON lines, flushed per reply.
pub struct WriteSink<W: Write> {
    writer: W,
}

impl<W: Write> WriteSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> ReplySink for WriteSink<W> {
    fn emit(&mut self, reply: &Reply) -> Result<()> {
        let line = serde_json::to_string(reply)
            .map_err(|e| SidecarError::Protocol(format!("Failed to encode reply: {e}")))?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Drive the dispatcher over a line-delimited JSON stream until EOF or
/// `shutdown`.
///
/// # Errors
///
/// Returns an error only when the reply channel itself fails; everything
/// else is reported in-band.
pub async fn run_loop<B, R, W>(
    dispatcher: &mut Dispatcher<B>,
    reader: R,
    writer: W,
) -> Result<()>
where
    B: InferenceBackend,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut sink = WriteSink::new(writer);
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let raw: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                sink.emit(&Reply::error(None, format!("Invalid JSON: {e}")))?;
                continue;
            }
        };
        let outcome = AssertUnwindSafe(dispatcher.dispatch(&raw, &mut sink))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(Flow::Continue)) => {}
            Ok(Ok(Flow::Shutdown)) => {
                tracing::info!("shutdown acknowledged, leaving read loop");
                break;
            }
            Ok(Err(e)) => return Err(e),
            Err(panic) => {
                let trace = panic_message(panic.as_ref());
                tracing::error!(trace = %trace, "handler panicked");
                sink.emit(&Reply::error_with_trace(
                    None,
                    format!("Internal fault: {trace}"),
                    trace,
                ))?;
            }
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
