// SPDX-License-Identifier: Apache-2.0

//! Tail receiver tests against real files.

use hostlog::bounded_channel::{BoundedReceiver, bounded};
use hostlog::receivers::tail::{LineEvent, StartAt, TailReceiver, TailReceiverConfig};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tower::BoxError;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

struct Harness {
    rx: BoundedReceiver<Vec<LineEvent>>,
    task_set: JoinSet<Result<(), BoxError>>,
    cancel: CancellationToken,
}

impl Harness {
    async fn start(config: TailReceiverConfig) -> Self {
        let (tx, rx) = bounded(100);
        let receiver = TailReceiver::new(config, Some(tx)).unwrap();

        let mut task_set = JoinSet::new();
        let cancel = CancellationToken::new();
        receiver.start(&mut task_set, &cancel).await.unwrap();

        // Let the first cycle capture the baselines
        tokio::time::sleep(POLL_INTERVAL * 3).await;

        Self {
            rx,
            task_set,
            cancel,
        }
    }

    async fn next_events(&mut self, want: usize) -> Vec<LineEvent> {
        let mut events = Vec::new();
        while events.len() < want {
            let batch = timeout(TEST_TIMEOUT, self.rx.next())
                .await
                .expect("timed out waiting for lines")
                .expect("receiver closed the channel");
            events.extend(batch);
        }
        events
    }

    async fn next_lines(&mut self, want: usize) -> Vec<String> {
        self.next_events(want)
            .await
            .into_iter()
            .map(|e| e.line)
            .collect()
    }

    async fn assert_quiet(&mut self, wait: Duration) {
        if let Ok(batch) = timeout(wait, self.rx.next()).await {
            panic!("unexpected output: {:?}", batch);
        }
    }

    async fn stop(mut self) {
        self.cancel.cancel();
        let res = timeout(TEST_TIMEOUT, self.task_set.join_next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(res.is_ok());
    }
}

fn config(paths: &[&Path]) -> TailReceiverConfig {
    TailReceiverConfig {
        paths: paths.iter().map(|p| p.to_path_buf()).collect(),
        poll_interval: POLL_INTERVAL,
        ..Default::default()
    }
}

fn append(path: &Path, content: &[u8]) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(content).unwrap();
    file.flush().unwrap();
}

fn log_path(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

#[tokio::test]
async fn test_appends_to_empty_file_are_emitted() {
    let dir = TempDir::new().unwrap();
    let path = log_path(&dir, "app.log");
    std::fs::write(&path, b"").unwrap();

    let mut harness = Harness::start(config(&[&path])).await;

    append(&path, b"a\nb\nc\n");
    let events = harness.next_events(3).await;

    let lines: Vec<&str> = events.iter().map(|e| e.line.as_str()).collect();
    assert_eq!(lines, vec!["a", "b", "c"]);
    for event in &events {
        assert_eq!(event.path, path);
        assert_eq!(event.file_name.as_deref(), Some("app.log"));
        assert!(event.observed_time_unix_nano > 0);
    }

    harness.assert_quiet(POLL_INTERVAL * 5).await;
    harness.stop().await;
}

#[tokio::test]
async fn test_existing_content_is_not_replayed() {
    let dir = TempDir::new().unwrap();
    let path = log_path(&dir, "app.log");
    std::fs::write(&path, b"before start 1\nbefore start 2\n").unwrap();

    let mut harness = Harness::start(config(&[&path])).await;
    harness.assert_quiet(POLL_INTERVAL * 5).await;

    append(&path, b"after start\n");
    assert_eq!(harness.next_lines(1).await, vec!["after start"]);

    harness.stop().await;
}

#[tokio::test]
async fn test_start_at_beginning_reads_existing_content() {
    let dir = TempDir::new().unwrap();
    let path = log_path(&dir, "app.log");
    std::fs::write(&path, b"one\ntwo\n").unwrap();

    let mut cfg = config(&[&path]);
    cfg.start_at = StartAt::Beginning;
    let mut harness = Harness::start(cfg).await;

    append(&path, b"three\n");
    assert_eq!(harness.next_lines(3).await, vec!["one", "two", "three"]);

    harness.stop().await;
}

#[tokio::test]
async fn test_appends_arrive_in_order() {
    let dir = TempDir::new().unwrap();
    let path = log_path(&dir, "app.log");
    std::fs::write(&path, b"").unwrap();

    let mut harness = Harness::start(config(&[&path])).await;

    let expected: Vec<String> = (0..200).map(|i| format!("line {}", i)).collect();
    for chunk in expected.chunks(25) {
        let mut buf = String::new();
        for line in chunk {
            buf.push_str(line);
            buf.push('\n');
        }
        append(&path, buf.as_bytes());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(harness.next_lines(expected.len()).await, expected);
    harness.stop().await;
}

#[tokio::test]
async fn test_partial_line_waits_for_delimiter() {
    let dir = TempDir::new().unwrap();
    let path = log_path(&dir, "app.log");
    std::fs::write(&path, b"").unwrap();

    let mut harness = Harness::start(config(&[&path])).await;

    append(&path, b"complete\npar");
    assert_eq!(harness.next_lines(1).await, vec!["complete"]);
    harness.assert_quiet(POLL_INTERVAL * 5).await;

    append(&path, b"tial\n");
    assert_eq!(harness.next_lines(1).await, vec!["partial"]);

    harness.stop().await;
}

#[tokio::test]
async fn test_rotation_with_same_size_is_detected() {
    let dir = TempDir::new().unwrap();
    let path = log_path(&dir, "app.log");
    std::fs::write(&path, b"").unwrap();

    let mut harness = Harness::start(config(&[&path])).await;

    append(&path, b"first\n");
    assert_eq!(harness.next_lines(1).await, vec!["first"]);

    // Replace the file with new content of the same length
    let rotated = log_path(&dir, "app.log.new");
    std::fs::write(&rotated, b"again\n").unwrap();
    std::fs::rename(&rotated, &path).unwrap();

    assert_eq!(harness.next_lines(1).await, vec!["again"]);
    harness.stop().await;
}

#[tokio::test]
async fn test_multiple_files_are_tailed_independently() {
    let dir = TempDir::new().unwrap();
    let first = log_path(&dir, "first.log");
    let second = log_path(&dir, "second.log");
    std::fs::write(&first, b"").unwrap();
    std::fs::write(&second, b"").unwrap();

    let mut harness = Harness::start(config(&[&first, &second])).await;

    append(&first, b"from first\n");
    append(&second, b"from second\n");

    let mut events = harness.next_events(2).await;
    events.sort_by(|a, b| a.path.cmp(&b.path));
    assert_eq!(events[0].path, first);
    assert_eq!(events[0].line, "from first");
    assert_eq!(events[1].path, second);
    assert_eq!(events[1].line, "from second");

    harness.stop().await;
}

#[tokio::test]
async fn test_missing_file_is_picked_up_once_created() {
    let dir = TempDir::new().unwrap();
    let path = log_path(&dir, "later.log");

    let mut harness = Harness::start(config(&[&path])).await;
    harness.assert_quiet(POLL_INTERVAL * 3).await;

    std::fs::write(&path, b"").unwrap();
    tokio::time::sleep(POLL_INTERVAL * 3).await;

    append(&path, b"hello\n");
    assert_eq!(harness.next_lines(1).await, vec!["hello"]);

    harness.stop().await;
}
