// SPDX-License-Identifier: Apache-2.0

use crate::bounded_channel::bounded;
use crate::exporters::blackhole::BlackholeExporter;
use crate::exporters::console::ConsoleExporter;
use crate::init::args::{AgentRun, Exporter};
use crate::init::wait;
use crate::receivers::tail::{LineEvent, TailReceiver};
use std::time::Duration;
use tokio::select;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

pub struct Agent {
    config: Box<AgentRun>,
}

impl Agent {
    pub fn new(config: Box<AgentRun>) -> Self {
        Self { config }
    }

    pub async fn run(self, agent_cancel: CancellationToken) -> Result<(), BoxError> {
        let config = self.config;

        info!("Starting hostlog.");

        let mut receivers_task_set = JoinSet::new();
        let mut exporters_task_set = JoinSet::new();

        let receivers_cancel = CancellationToken::new();
        let exporters_cancel = CancellationToken::new();

        let (output_tx, output_rx) = bounded::<Vec<LineEvent>>(config.output_queue_size.max(1));

        match config.exporter {
            Exporter::Blackhole => {
                let mut exp = BlackholeExporter::new(output_rx);
                let token = exporters_cancel.clone();
                exporters_task_set.spawn(async move {
                    exp.start(token).await;
                    Ok(())
                });
            }
            Exporter::Console => {
                let mut exp = ConsoleExporter::new(output_rx);
                let token = exporters_cancel.clone();
                exporters_task_set.spawn(async move {
                    if let Err(e) = exp.start(token).await {
                        error!(
                            error = %e,
                            exporter_type = "console",
                            "Console exporter returned from run loop with error."
                        );
                    }
                    Ok(())
                });
            }
        }

        // The receiver owns the only sender, so the exporter sees the channel
        // close once the receiver has stopped.
        let receiver = TailReceiver::new(config.tail_receiver.build_config(), Some(output_tx))?;
        receiver
            .start(&mut receivers_task_set, &receivers_cancel)
            .await?;

        let mut result = Ok(());
        select! {
            _ = agent_cancel.cancelled() => {
                debug!("Agent cancellation signaled.");
            },
            e = wait::wait_for_any_task(&mut receivers_task_set) => {
                match e {
                    Ok(()) => info!("Unexpected early exit of receiver."),
                    Err(e) => result = Err(e),
                }
            },
            e = wait::wait_for_any_task(&mut exporters_task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of exporter."),
                    Err(e) => result = Err(e),
                }
            }
        }
        result?;

        // Step one, cancel the receivers and wait for their termination.
        receivers_cancel.cancel();

        let res =
            wait::wait_for_tasks_with_timeout(&mut receivers_task_set, Duration::from_secs(1))
                .await;
        if let Err(e) = res {
            return Err(format!("timed out waiting for receiver exit: {}", e).into());
        }

        let exporters_hard_stop = Instant::now() + Duration::from_secs(3);

        // Exporters exit on their own once the channel is closed and drained
        let res =
            wait::wait_for_tasks_with_timeout(&mut exporters_task_set, Duration::from_millis(500))
                .await;
        if res.is_err() {
            warn!("Exporters did not exit on channel close, cancelling.");

            // force cancel
            exporters_cancel.cancel();

            let res =
                wait::wait_for_tasks_with_deadline(&mut exporters_task_set, exporters_hard_stop)
                    .await;
            if let Err(e) = res {
                return Err(format!("timed out waiting for exporters to exit: {}", e).into());
            }
        }

        info!("hostlog stopped.");
        Ok(())
    }
}
