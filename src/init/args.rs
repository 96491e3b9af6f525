// SPDX-License-Identifier: Apache-2.0

use crate::init::tail_receiver::TailReceiverArgs;
use clap::{Args, ValueEnum};

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    #[command(flatten)]
    pub tail_receiver: TailReceiverArgs,

    /// Where emitted lines are sent
    #[arg(value_enum, long, env = "HOSTLOG_EXPORTER", default_value = "console")]
    pub exporter: Exporter,

    /// Number of line batches buffered between the receiver and the exporter
    #[arg(long, env = "HOSTLOG_OUTPUT_QUEUE_SIZE", default_value = "1000")]
    pub output_queue_size: usize,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum Exporter {
    /// Drop every line
    Blackhole,
    /// Print each line as JSON to stdout
    Console,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestArgs {
        #[command(flatten)]
        agent: AgentRun,
    }

    #[test]
    fn test_exporter_defaults_to_console() {
        let args = TestArgs::try_parse_from(["hostlog", "--tail-paths", "/var/log/a.log"]).unwrap();
        assert_eq!(args.agent.exporter, Exporter::Console);
        assert_eq!(args.agent.output_queue_size, 1000);
    }

    #[test]
    fn test_select_blackhole() {
        let args = TestArgs::try_parse_from([
            "hostlog",
            "--tail-paths",
            "/var/log/a.log",
            "--exporter",
            "blackhole",
            "--output-queue-size",
            "10",
        ])
        .unwrap();
        assert_eq!(args.agent.exporter, Exporter::Blackhole);
        assert_eq!(args.agent.output_queue_size, 10);
    }
}
