// SPDX-License-Identifier: Apache-2.0

//! Writes each line event as one JSON document per line.

use crate::bounded_channel::BoundedReceiver;
use crate::receivers::tail::LineEvent;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConsoleExporterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct ConsoleExporter<W> {
    rx: BoundedReceiver<Vec<LineEvent>>,
    writer: W,
}

impl ConsoleExporter<Stdout> {
    pub fn new(rx: BoundedReceiver<Vec<LineEvent>>) -> Self {
        Self::with_writer(rx, tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin> ConsoleExporter<W> {
    pub fn with_writer(rx: BoundedReceiver<Vec<LineEvent>>, writer: W) -> Self {
        Self { rx, writer }
    }

    /// Run until the channel closes. On cancellation, batches already queued
    /// are still written before returning.
    pub async fn start(&mut self, cancel_token: CancellationToken) -> Result<(), ConsoleExporterError> {
        let mut written = 0u64;
        loop {
            select! {
                m = self.rx.next() => match m {
                    Some(batch) => written += self.write_batch(&batch).await?,
                    None => break,
                },
                _ = cancel_token.cancelled() => {
                    while let Some(batch) = self.rx.try_recv() {
                        written += self.write_batch(&batch).await?;
                    }
                    break;
                }
            }
        }
        self.writer.flush().await?;
        debug!(written, "exiting console exporter");
        Ok(())
    }

    async fn write_batch(&mut self, batch: &[LineEvent]) -> Result<u64, ConsoleExporterError> {
        let buf = encode_batch(batch)?;
        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(batch.len() as u64)
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}

fn encode_batch(batch: &[LineEvent]) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    for event in batch {
        serde_json::to_writer(&mut buf, event)?;
        buf.push(b'\n');
    }
    Ok(buf)
}
