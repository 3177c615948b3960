use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::domain::{AttemptError, Outcome, Target};
use crate::fetch::{FetchClient, FetchError, FetchResponse};
use crate::stats::Totals;
use crate::utils::{format_bytes, unix_millis};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Directory for per-attempt output files; `None` disables persistence.
    pub save_dir: Option<PathBuf>,
    /// Suppress periodic progress lines (completion and failure lines
    /// are still emitted).
    pub quiet: bool,
    pub retry_delay: Duration,
}

/// One indefinitely-looping unit of control. Everything here except the
/// shared `Totals` is owned exclusively by this worker.
pub struct Worker {
    id: usize,
    attempt: u64,
    target: Arc<Target>,
    totals: Arc<Totals>,
    client: FetchClient,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(
        id: usize,
        target: Arc<Target>,
        totals: Arc<Totals>,
        options: WorkerOptions,
    ) -> Result<Self, FetchError> {
        let client = FetchClient::new(target.timeout)?;
        Ok(Self {
            id,
            attempt: 1,
            target,
            totals,
            client,
            options,
        })
    }

    /// Run attempts forever. Modeled errors never escape an attempt, so
    /// this only returns if the task is dropped or the worker panics.
    pub async fn run(mut self) {
        loop {
            self.step().await;
        }
    }

    /// One full attempt cycle: run the attempt, log a failure if any,
    /// wait out the retry delay, advance the attempt counter.
    async fn step(&mut self) {
        if let Err(err) = self.run_attempt().await {
            warn!(
                "worker {} attempt {} failed: {}; retrying in {:?}",
                self.id, self.attempt, err, self.options.retry_delay
            );
            tokio::time::sleep(self.options.retry_delay).await;
        }
        self.attempt += 1;
    }

    /// One attempt, with the output sink cleaned up on every failure path.
    async fn run_attempt(&mut self) -> Result<Outcome, AttemptError> {
        let started = Instant::now();
        let sink_path = self.options.save_dir.as_ref().map(|dir| {
            dir.join(format!(
                "worker{}_attempt{}_{}.bin",
                self.id,
                self.attempt,
                unix_millis()
            ))
        });

        let result = self.execute(started, sink_path.as_deref()).await;
        if result.is_err() {
            if let Some(path) = &sink_path {
                // Partial output from a failed attempt; errors here are
                // swallowed (the file may not exist yet).
                let _ = tokio::fs::remove_file(path).await;
            }
        }
        result
    }

    async fn execute(
        &mut self,
        started: Instant,
        sink_path: Option<&Path>,
    ) -> Result<Outcome, AttemptError> {
        let mut sink = match sink_path {
            Some(path) => Some(tokio::fs::File::create(path).await?),
            None => None,
        };

        match self.client.fetch(&self.target).await? {
            FetchResponse::ConnectOnly { nominal } => {
                let ops = self.totals.complete_op();
                info!(
                    "worker {} attempt {}: connected in {:.2}s, size {}, ops total {}, bytes total {}",
                    self.id,
                    self.attempt,
                    started.elapsed().as_secs_f64(),
                    display_nominal(nominal),
                    ops,
                    format_bytes(self.totals.bytes()),
                );
                Ok(Outcome::ConnectOnly { nominal })
            }
            FetchResponse::Stream { nominal, mut stream } => {
                let mut received: u64 = 0;
                let mut last_tick_bytes: u64 = 0;
                let mut last_tick_at = Instant::now();
                // First tick one interval in; interval() would fire immediately.
                let mut tick = tokio::time::interval_at(
                    tokio::time::Instant::now() + PROGRESS_INTERVAL,
                    PROGRESS_INTERVAL,
                );

                loop {
                    tokio::select! {
                        chunk = stream.next() => match chunk {
                            Some(chunk) => {
                                let chunk = chunk?;
                                received += chunk.len() as u64;
                                self.totals.add_bytes(chunk.len() as u64);
                                if let Some(file) = sink.as_mut() {
                                    // Backpressure: the next chunk is not
                                    // pulled until this write completes.
                                    file.write_all(&chunk).await?;
                                }
                            }
                            None => break,
                        },
                        _ = tick.tick() => {
                            if !self.options.quiet {
                                self.log_progress(received, nominal, last_tick_bytes, last_tick_at);
                            }
                            last_tick_bytes = received;
                            last_tick_at = Instant::now();
                        }
                    }
                }

                if let Some(file) = sink.as_mut() {
                    file.flush().await?;
                }

                let ops = self.totals.complete_op();
                let elapsed = started.elapsed().as_secs_f64();
                let average = received as f64 / elapsed.max(0.001);
                info!(
                    "worker {} attempt {}: done in {:.2}s, {} (expected {}), avg {}/s, ops total {}, bytes total {}",
                    self.id,
                    self.attempt,
                    elapsed,
                    format_bytes(received),
                    display_nominal(nominal),
                    format_bytes(average as u64),
                    ops,
                    format_bytes(self.totals.bytes()),
                );
                Ok(Outcome::Downloaded {
                    bytes: received,
                    nominal,
                })
            }
        }
    }

    fn log_progress(
        &self,
        received: u64,
        nominal: Option<u64>,
        last_tick_bytes: u64,
        last_tick_at: Instant,
    ) {
        // Floor at one millisecond so a late first chunk cannot divide by zero.
        let elapsed = last_tick_at.elapsed().as_secs_f64().max(0.001);
        let speed = (received - last_tick_bytes) as f64 / elapsed;

        match nominal {
            Some(total) if total > 0 => info!(
                "worker {} attempt {}: {:.1}% ({} / {}) at {}/s, ops total {}, bytes total {}",
                self.id,
                self.attempt,
                received as f64 / total as f64 * 100.0,
                format_bytes(received),
                format_bytes(total),
                format_bytes(speed as u64),
                self.totals.ops(),
                format_bytes(self.totals.bytes()),
            ),
            _ => info!(
                "worker {} attempt {}: {} at {}/s, ops total {}, bytes total {}",
                self.id,
                self.attempt,
                format_bytes(received),
                format_bytes(speed as u64),
                self.totals.ops(),
                format_bytes(self.totals.bytes()),
            ),
        }
    }
}

fn display_nominal(nominal: Option<u64>) -> String {
    nominal
        .map(format_bytes)
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn make_worker(url: &str, options: WorkerOptions) -> Worker {
        let target = Target {
            url: Url::parse(url).unwrap(),
            headers: Vec::new(),
            timeout: Duration::from_secs(5),
            connect_only: false,
        };
        Worker::new(0, Arc::new(target), Arc::new(Totals::new()), options).unwrap()
    }

    fn no_save() -> WorkerOptions {
        WorkerOptions {
            save_dir: None,
            quiet: true,
            retry_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_counts_bytes_without_persistence() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_body("hello")
            .create_async()
            .await;

        let mut worker = make_worker(&server.url(), no_save());
        let outcome = worker.run_attempt().await.unwrap();

        assert!(matches!(
            outcome,
            Outcome::Downloaded {
                bytes: 5,
                nominal: Some(5)
            }
        ));
        assert_eq!(worker.totals.bytes(), 5);
        assert_eq!(worker.totals.ops(), 1);
    }

    #[tokio::test]
    async fn test_persistence_writes_one_file_per_attempt() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_body("payload")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut worker = make_worker(
            &server.url(),
            WorkerOptions {
                save_dir: Some(dir.path().to_path_buf()),
                quiet: true,
                retry_delay: Duration::ZERO,
            },
        );

        worker.step().await;
        worker.step().await;

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        assert_eq!(names.len(), 2);
        assert!(names[0].starts_with("worker0_attempt1_"));
        assert!(names[1].starts_with("worker0_attempt2_"));
        assert!(names.iter().all(|n| n.ends_with(".bin")));

        let first = std::fs::read(dir.path().join(&names[0])).unwrap();
        assert_eq!(first, b"payload");
    }

    #[tokio::test]
    async fn test_no_files_when_persistence_disabled() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_body("data")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut worker = make_worker(&server.url(), no_save());
        worker.step().await;
        worker.step().await;

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(worker.totals.bytes(), 8);
    }

    #[tokio::test]
    async fn test_failed_attempt_removes_partial_file() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(500)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut worker = make_worker(
            &server.url(),
            WorkerOptions {
                save_dir: Some(dir.path().to_path_buf()),
                quiet: true,
                retry_delay: Duration::ZERO,
            },
        );

        let err = worker.run_attempt().await.unwrap_err();
        assert!(matches!(err, AttemptError::Fetch(FetchError::Status(500))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(worker.totals.ops(), 0);
    }

    #[tokio::test]
    async fn test_attempt_counter_advances_through_failures() {
        // Nothing is listening here, so every attempt is a transport error.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut worker = make_worker(&format!("http://{}/", addr), no_save());
        assert_eq!(worker.attempt, 1);
        worker.step().await;
        worker.step().await;
        worker.step().await;

        assert_eq!(worker.attempt, 4);
        assert_eq!(worker.totals.ops(), 0);
        assert_eq!(worker.totals.bytes(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_attempt_retries_after_delay() {
        // Held open but never answered, so every request times out.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let target = Target {
            url: Url::parse(&format!("http://{}/", addr)).unwrap(),
            headers: Vec::new(),
            timeout: Duration::from_millis(150),
            connect_only: false,
        };
        let mut worker = Worker::new(
            0,
            Arc::new(target),
            Arc::new(Totals::new()),
            WorkerOptions {
                save_dir: None,
                quiet: true,
                retry_delay: Duration::from_millis(50),
            },
        )
        .unwrap();

        let err = worker.run_attempt().await.unwrap_err();
        assert!(matches!(err, AttemptError::Fetch(FetchError::Timeout)));

        // One cycle: the timed-out attempt, then the retry delay, then
        // the attempt counter advances by exactly one.
        let before = Instant::now();
        worker.step().await;
        assert_eq!(worker.attempt, 2);
        assert!(before.elapsed() >= Duration::from_millis(200));
        assert_eq!(worker.totals.ops(), 0);
        drop(listener);
    }

    #[tokio::test]
    async fn test_connect_only_counts_op_but_no_bytes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_body("hello world!")
            .create_async()
            .await;

        let target = Target {
            url: Url::parse(&server.url()).unwrap(),
            headers: Vec::new(),
            timeout: Duration::from_secs(5),
            connect_only: true,
        };
        let mut worker =
            Worker::new(3, Arc::new(target), Arc::new(Totals::new()), no_save()).unwrap();

        let outcome = worker.run_attempt().await.unwrap();
        assert!(matches!(
            outcome,
            Outcome::ConnectOnly {
                nominal: Some(12)
            }
        ));
        assert_eq!(worker.totals.bytes(), 0);
        assert_eq!(worker.totals.ops(), 1);
    }

    #[tokio::test]
    async fn test_totals_shared_across_workers() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_body("abcd")
            .create_async()
            .await;

        let target = Arc::new(Target {
            url: Url::parse(&server.url()).unwrap(),
            headers: Vec::new(),
            timeout: Duration::from_secs(5),
            connect_only: false,
        });
        let totals = Arc::new(Totals::new());

        let mut handles = Vec::new();
        for id in 0..4 {
            let mut worker =
                Worker::new(id, Arc::clone(&target), Arc::clone(&totals), no_save()).unwrap();
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    worker.step().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(totals.ops(), 20);
        assert_eq!(totals.bytes(), 20 * 4);
    }
}
