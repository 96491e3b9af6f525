// SPDX-License-Identifier: Apache-2.0

//! Tail receiver event loop.
//!
//! A single task owns the detector and reader state. Each poll tick starts a
//! detect-then-read chain for every idle path; the chains run concurrently
//! as futures and are folded back into the state one completion at a time.

use std::path::PathBuf;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use opentelemetry::KeyValue;
use opentelemetry::metrics::Counter;
use tokio::select;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info};

use crate::bounded_channel::BoundedSender;
use crate::receivers::get_meter;
use crate::receivers::tail::config::TailReceiverConfig;
use crate::receivers::tail::detector::{ChangeDetector, Probe, probe_path};
use crate::receivers::tail::error::{Error, ReadError, Result};
use crate::receivers::tail::event::{CycleAck, LineEvent};
use crate::receivers::tail::reader::{ReadOutcome, ReadPlan, ReadRequest, TailReader, read_range};

/// File system operations used by the receiver.
pub trait FileAccess: Send + Sync + 'static {
    fn probe(&self, path: PathBuf) -> BoxFuture<'static, Probe>;

    fn read(&self, request: ReadRequest)
    -> BoxFuture<'static, std::result::Result<Vec<u8>, ReadError>>;
}

/// Non-blocking file access on the tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileAccess;

impl FileAccess for TokioFileAccess {
    fn probe(&self, path: PathBuf) -> BoxFuture<'static, Probe> {
        async move { probe_path(&path).await }.boxed()
    }

    fn read(
        &self,
        request: ReadRequest,
    ) -> BoxFuture<'static, std::result::Result<Vec<u8>, ReadError>> {
        async move { read_range(&request).await }.boxed()
    }
}

/// Error type for send operations with cancellation support.
#[derive(Debug)]
enum SendError {
    Cancelled,
    ChannelClosed,
}

pub struct TailReceiver<A = TokioFileAccess> {
    config: TailReceiverConfig,
    output: Option<BoundedSender<Vec<LineEvent>>>,
    detector: ChangeDetector,
    reader: TailReader,
    access: A,
}

impl TailReceiver<TokioFileAccess> {
    pub fn new(
        config: TailReceiverConfig,
        output: Option<BoundedSender<Vec<LineEvent>>>,
    ) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let detector = ChangeDetector::new(
            config.paths.clone(),
            config.chunk_size(),
            config.report_threshold,
            config.report_cooldown,
        );
        let reader = TailReader::new(&config)?;

        info!(
            paths = ?detector.paths(),
            poll_interval = ?config.poll_interval,
            start_at = ?config.start_at,
            max_read_size = config.max_read_size,
            read_in_chunks = config.read_in_chunks,
            encoding = %config.encoding,
            "Tail receiver initialized"
        );

        Ok(Self {
            config,
            output,
            detector,
            reader,
            access: TokioFileAccess,
        })
    }
}

impl<A: FileAccess> TailReceiver<A> {
    /// Replace the file access used by the event loop
    pub fn with_file_access<B: FileAccess>(self, access: B) -> TailReceiver<B> {
        TailReceiver {
            config: self.config,
            output: self.output,
            detector: self.detector,
            reader: self.reader,
            access,
        }
    }

    /// Start the tail receiver
    pub async fn start(
        self,
        task_set: &mut JoinSet<std::result::Result<(), BoxError>>,
        receivers_cancel: &CancellationToken,
    ) -> std::result::Result<(), BoxError> {
        info!(paths = ?self.detector.paths(), "Tail receiver starting");

        let cancel = receivers_cancel.clone();
        let handler = TailHandler {
            poll_interval: self.config.poll_interval,
            output: self.output,
            detector: self.detector,
            reader: self.reader,
            access: self.access,
            metrics: ReceiverMetrics::new(),
        };

        task_set.spawn(async move {
            let result = handler.run(cancel).await;
            if let Err(ref e) = result {
                error!("Tail receiver error: {}", e);
            }
            result
        });

        Ok(())
    }
}

/// Completion of one step of a per-path chain
enum Stage {
    Probed {
        path: PathBuf,
        probe: Probe,
    },
    Read {
        request: ReadRequest,
        result: std::result::Result<Vec<u8>, ReadError>,
    },
}

struct ReceiverMetrics {
    accepted: Counter<u64>,
    refused: Counter<u64>,
    skipped_bytes: Counter<u64>,
    tags: [KeyValue; 1],
}

impl ReceiverMetrics {
    fn new() -> Self {
        Self {
            accepted: get_meter()
                .u64_counter("hostlog_receiver_accepted_lines")
                .with_description("Number of lines successfully pushed to the output.")
                .with_unit("lines")
                .build(),
            refused: get_meter()
                .u64_counter("hostlog_receiver_refused_lines")
                .with_description("Number of lines that could not be pushed to the output.")
                .with_unit("lines")
                .build(),
            skipped_bytes: get_meter()
                .u64_counter("hostlog_receiver_skipped_bytes")
                .with_description("Number of bytes skipped because a file grew too fast.")
                .with_unit("bytes")
                .build(),
            tags: [KeyValue::new("receiver", "tail")],
        }
    }

    fn add_accepted(&self, count: u64) {
        if count > 0 {
            self.accepted.add(count, &self.tags);
        }
    }

    fn add_refused(&self, count: u64) {
        if count > 0 {
            self.refused.add(count, &self.tags);
        }
    }

    fn add_skipped_bytes(&self, count: u64) {
        if count > 0 {
            self.skipped_bytes.add(count, &self.tags);
        }
    }
}

struct TailHandler<A> {
    poll_interval: std::time::Duration,
    output: Option<BoundedSender<Vec<LineEvent>>>,
    detector: ChangeDetector,
    reader: TailReader,
    access: A,
    metrics: ReceiverMetrics,
}

impl<A: FileAccess> TailHandler<A> {
    async fn run(mut self, cancel: CancellationToken) -> std::result::Result<(), BoxError> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: FuturesUnordered<BoxFuture<'static, Stage>> = FuturesUnordered::new();

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Tail receiver cancelled, shutting down");
                    break;
                }

                Some(stage) = in_flight.next(), if !in_flight.is_empty() => {
                    let next = match stage {
                        Stage::Probed { path, probe } => self.on_probed(path, probe),
                        Stage::Read { request, result } => {
                            let path = request.path.clone();
                            let (outcome, ack) = self.reader.complete(&request, result);
                            let sent = self.emit(outcome, &cancel).await;
                            self.detector.complete(&path, ack);
                            if let Err(e) = sent {
                                match e {
                                    SendError::Cancelled => debug!("Send cancelled during shutdown"),
                                    SendError::ChannelClosed => {
                                        error!("Output channel closed, stopping tail receiver")
                                    }
                                }
                                break;
                            }
                            None
                        }
                    };
                    if let Some(fut) = next {
                        in_flight.push(fut);
                    }
                }

                _ = ticker.tick() => {
                    for path in self.detector.begin_cycle() {
                        let probe = self.access.probe(path.clone());
                        in_flight.push(async move {
                            Stage::Probed { path, probe: probe.await }
                        }.boxed());
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            debug!(in_flight = in_flight.len(), "Discarding in-flight file cycles");
        }

        info!("Tail receiver stopped");
        Ok(())
    }

    /// Decide the next step after a probe. Returns the read to run, if any.
    fn on_probed(&mut self, path: PathBuf, probe: Probe) -> Option<BoxFuture<'static, Stage>> {
        let Some(change) = self.detector.observe(&path, probe) else {
            self.detector.complete(&path, CycleAck::Done);
            return None;
        };

        match self.reader.plan(&change) {
            ReadPlan::Skip(ack) => {
                self.detector.complete(&path, ack);
                None
            }
            ReadPlan::Read(request) => {
                let read = self.access.read(request.clone());
                Some(
                    async move {
                        Stage::Read {
                            request,
                            result: read.await,
                        }
                    }
                    .boxed(),
                )
            }
        }
    }

    async fn emit(
        &self,
        outcome: ReadOutcome,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), SendError> {
        self.metrics.add_skipped_bytes(outcome.skipped_bytes);

        if outcome.events.is_empty() {
            return Ok(());
        }
        let count = outcome.events.len() as u64;

        let Some(output) = &self.output else {
            // No output configured, just discard
            return Ok(());
        };

        match send_with_cancellation(output, outcome.events, cancel).await {
            Ok(()) => {
                self.metrics.add_accepted(count);
                Ok(())
            }
            Err(e) => {
                self.metrics.add_refused(count);
                Err(e)
            }
        }
    }
}

/// Helper to send a batch with cancellation support.
async fn send_with_cancellation(
    output: &BoundedSender<Vec<LineEvent>>,
    batch: Vec<LineEvent>,
    cancel_token: &CancellationToken,
) -> std::result::Result<(), SendError> {
    let send_fut = output.send_async(batch);
    tokio::pin!(send_fut);

    select! {
        result = send_fut => {
            match result {
                Ok(()) => Ok(()),
                Err(_) => Err(SendError::ChannelClosed),
            }
        }
        _ = cancel_token.cancelled() => {
            Err(SendError::Cancelled)
        }
    }
}
