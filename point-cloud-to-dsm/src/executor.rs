/// Per-tile task execution: the sequencer submits pure tile functions and joins on the results
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{DsmError, DsmResult};

/// Runs a tile function over every tile input.
///
/// Implementations may run tiles in any order and on any thread, but must return
/// outputs in input order. Returning is the join point.
pub trait TileExecutor: Send + Sync {
    fn map_tiles<T, R, F>(&self, stage: &str, inputs: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync;
}

fn stage_progress_bar(len: usize, stage: &str, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos}/{len} tiles ({percent}%) {msg}")
        .map(|style| style.progress_chars("▉▊▋▌▍▎▏ "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(stage.to_string());
    pb
}

/// Rayon thread pool with one progress bar per `map_tiles` call.
pub struct RayonExecutor {
    pool: ThreadPool,
    show_progress: bool,
}

impl RayonExecutor {
    pub fn new(nb_workers: usize, show_progress: bool) -> DsmResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(nb_workers.max(1))
            .thread_name(|i| format!("dsm-tile-{i}"))
            .build()
            .map_err(|e| DsmError::configuration(format!("cannot start worker pool: {e}")))?;
        Ok(Self {
            pool,
            show_progress,
        })
    }

    pub fn nb_workers(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl TileExecutor for RayonExecutor {
    fn map_tiles<T, R, F>(&self, stage: &str, inputs: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        let pb = stage_progress_bar(inputs.len(), stage, self.show_progress);
        let outputs = self.pool.install(|| {
            inputs
                .into_par_iter()
                .map(|input| {
                    let output = f(input);
                    pb.inc(1);
                    output
                })
                .collect()
        });
        pb.finish_with_message(format!("{stage} done"));
        outputs
    }
}

/// Runs tiles one after the other on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialExecutor;

impl TileExecutor for SequentialExecutor {
    fn map_tiles<T, R, F>(&self, _stage: &str, inputs: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        inputs.into_iter().map(f).collect()
    }
}
