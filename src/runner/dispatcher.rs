use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

use crate::cli::Cli;
use crate::fetch::FetchError;
use crate::runner::{Worker, WorkerOptions};
use crate::stats::Totals;

/// Gap between worker launches, so N workers do not all open their first
/// connection in the same instant.
const LAUNCH_STAGGER: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to create output directory: {0}")]
    OutDir(#[from] std::io::Error),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] FetchError),
}

/// Poll all worker handles concurrently, yielding each worker's id and
/// join result the moment it ends. Workers are infinite, so anything
/// yielded here is abnormal.
fn join_watcher(
    handles: Vec<(usize, JoinHandle<()>)>,
) -> FuturesUnordered<impl std::future::Future<Output = (usize, Result<(), JoinError>)>> {
    handles
        .into_iter()
        .map(|(id, handle)| async move { (id, handle.await) })
        .collect()
}

/// Launch the worker loops and keep the process alive. Workers never
/// finish on their own; a join result surfacing here means a worker
/// panicked, which is logged as fatal for that worker only while the
/// rest keep running.
pub async fn run(cli: &Cli) -> Result<(), DispatchError> {
    let target = Arc::new(cli.target());
    let totals = Arc::new(Totals::new());

    let save_dir = if cli.save {
        tokio::fs::create_dir_all(&cli.out_dir).await?;
        Some(cli.out_dir.clone())
    } else {
        None
    };

    info!(
        "fetching {} with {} workers (save={}, connect_only={})",
        target.url, cli.threads, cli.save, target.connect_only
    );

    let mut handles = Vec::with_capacity(cli.threads);
    for id in 0..cli.threads {
        let worker = Worker::new(
            id,
            Arc::clone(&target),
            Arc::clone(&totals),
            WorkerOptions {
                save_dir: save_dir.clone(),
                quiet: cli.quiet,
                retry_delay: Duration::from_millis(cli.retry_delay_ms),
            },
        )?;
        handles.push((id, tokio::spawn(worker.run())));
        if id + 1 < cli.threads {
            tokio::time::sleep(LAUNCH_STAGGER).await;
        }
    }

    let mut workers = join_watcher(handles);
    while let Some((id, result)) = workers.next().await {
        if let Err(err) = result {
            error!("worker {} aborted: {}", id, err);
        }
    }
    Ok(())
}
