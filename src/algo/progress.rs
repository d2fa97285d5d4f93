//! Progress reporting for the fitting loop.
//!
//! The fitter reports once per iteration. Callers that want a progress bar or
//! live statistics pass a [`Progress`] to
//! [`MeshFitter::fit_with_progress`](crate::fitter::MeshFitter::fit_with_progress).
//!
//! # Example
//!
//! ```
//! use cortid::algo::Progress;
//!
//! let progress = Progress::new(|current, total, message| {
//!     println!("[{}/{}] {}", current, total, message);
//! });
//! progress.report(1, 10, "iteration 1");
//! ```

/// A progress callback that receives updates during a fit.
///
/// The callback receives:
/// - `current`: Number of completed steps
/// - `total`: Upper bound on the number of steps
/// - `message`: Description of the current state
pub struct Progress {
    callback: Box<dyn Fn(usize, usize, &str) + Send + Sync>,
}

impl Progress {
    /// Create a new progress reporter with the given callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(usize, usize, &str) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Report progress.
    #[inline]
    pub fn report(&self, current: usize, total: usize, message: &str) {
        (self.callback)(current, total, message);
    }

    /// Report a finished fitting iteration.
    ///
    /// When the fit converged the step count is reported as complete even if
    /// fewer than `max_iterations` iterations ran.
    pub fn report_iteration(
        &self,
        iteration: usize,
        max_iterations: usize,
        log_likelihood: f64,
        converged: bool,
    ) {
        let current = if converged { max_iterations } else { iteration };
        let message = format!("iteration {} (log likelihood {:.3})", iteration, log_likelihood);
        (self.callback)(current, max_iterations, &message);
    }

    /// Create a no-op progress reporter that discards all updates.
    pub fn none() -> Self {
        Self::new(|_, _, _| {})
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::none()
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_report_iteration() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress = Progress::new(move |current, total, message| {
            sink.lock().unwrap().push((current, total, message.to_string()));
        });

        progress.report_iteration(3, 10, -1.5, false);
        progress.report_iteration(4, 10, -1.25, true);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, 3);
        assert_eq!(seen[0].1, 10);
        assert!(seen[0].2.contains("-1.500"));
        assert_eq!(seen[1].0, 10);
    }

    #[test]
    fn test_none_discards() {
        Progress::none().report(1, 2, "ignored");
        Progress::default().report_iteration(1, 2, 0.0, false);
    }
}
