// SPDX-License-Identifier: Apache-2.0

use crate::bounded_channel::BoundedReceiver;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Drains batches and drops them
pub struct BlackholeExporter<Item> {
    rx: BoundedReceiver<Vec<Item>>,
}

impl<Item> BlackholeExporter<Item> {
    pub fn new(rx: BoundedReceiver<Vec<Item>>) -> Self {
        BlackholeExporter { rx }
    }

    /// Run until the channel closes or the token is cancelled. Returns the
    /// number of items dropped.
    pub async fn start(&mut self, cancel_token: CancellationToken) -> u64 {
        let mut dropped = 0u64;
        loop {
            select! {
                m = self.rx.next() => match m {
                    Some(batch) => dropped += batch.len() as u64,
                    None => break,
                },
                _ = cancel_token.cancelled() => break,
            }
        }
        debug!(dropped, "exiting blackhole exporter");
        dropped
    }
}

#[cfg(test)]
mod tests {
    use crate::bounded_channel::bounded;
    use crate::exporters::blackhole::BlackholeExporter;
    use crate::receivers::tail::LineEvent;
    use std::path::PathBuf;
    use tokio::spawn;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn drains_until_closed() {
        let (tx, rx) = bounded(1);

        let mut exp = BlackholeExporter::new(rx);
        let jh = spawn(async move { exp.start(CancellationToken::new()).await });

        let event = LineEvent {
            path: PathBuf::from("/var/log/app.log"),
            file_name: None,
            line: "hello".to_string(),
            observed_time_unix_nano: 1,
        };
        assert!(tx.send(vec![event.clone(), event]).await.is_ok());
        drop(tx);

        assert_eq!(jh.await.unwrap(), 2);
    }
}
