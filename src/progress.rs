use std::{
    sync::{atomic::AtomicUsize, Mutex},
    time::{Duration, Instant},
};

/// Progress of a dataset copy.
#[derive(Debug, Clone)]
pub struct ProgressStats {
    /// The path of the dataset being copied.
    pub path: String,
    pub step: usize,
    pub num_steps: usize,
    /// Cumulative time spent reading blocks, summed across workers.
    pub read: Duration,
    /// Cumulative time spent writing blocks, summed across workers.
    pub write: Duration,
}

pub struct Progress<'a> {
    path: String,
    progress_callback: Option<&'a ProgressCallback<'a>>,
    step: AtomicUsize,
    num_steps: usize,
    duration_read: Mutex<Duration>,
    duration_write: Mutex<Duration>,
}

impl<'a> Progress<'a> {
    pub fn new(
        path: &str,
        num_steps: usize,
        progress_callback: Option<&'a ProgressCallback<'a>>,
    ) -> Self {
        let progress = Self {
            path: path.to_string(),
            progress_callback,
            step: AtomicUsize::new(0),
            num_steps,
            duration_read: Mutex::new(Duration::ZERO),
            duration_write: Mutex::new(Duration::ZERO),
        };
        progress.update(0);
        progress
    }

    pub fn read<F: FnOnce() -> T, T>(&self, f: F) -> T {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        *self.duration_read.lock().unwrap() += elapsed;
        result
    }

    pub fn write<F: FnOnce() -> T, T>(&self, f: F) -> T {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        *self.duration_write.lock().unwrap() += elapsed;
        result
    }

    pub fn stats(&self) -> ProgressStats {
        ProgressStats {
            path: self.path.clone(),
            step: self.step.load(std::sync::atomic::Ordering::SeqCst),
            num_steps: self.num_steps,
            read: *self.duration_read.lock().unwrap(),
            write: *self.duration_write.lock().unwrap(),
        }
    }

    fn update(&self, step: usize) {
        if let Some(progress_callback) = self.progress_callback {
            let stats = ProgressStats {
                step,
                ..self.stats()
            };
            progress_callback.update(stats);
        }
    }

    pub fn next(&self) {
        let step = 1 + self.step.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.update(step);
    }
}

pub struct ProgressCallback<'a> {
    callback: &'a (dyn Fn(ProgressStats) + Send + Sync),
}

impl<'a> ProgressCallback<'a> {
    pub fn new(callback: &'a (dyn Fn(ProgressStats) + Send + Sync)) -> Self {
        Self { callback }
    }

    pub fn update(&self, stats: ProgressStats) {
        (self.callback)(stats);
    }
}
