//! Progress-callback trait for per-table pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator walks the tables of a filing. The CLI uses it
//! to drive its progress bar and to print each backend's table for review.
//!
//! # Example
//!
//! ```rust
//! use edgequake_tablex::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_table_complete(&self, index: usize, total: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("table {index} done ({done}/{total})");
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .backends(vec![])
//!     .progress_callback(cb as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::config::BackendKind;
use crate::table::NormalizedTable;
use std::sync::Arc;

/// Called by the orchestrator as it processes each table.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Tables are processed one at a time, but the trait is
/// `Send + Sync` so a callback can be shared with other tasks.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once after the filing has been parsed.
    ///
    /// # Arguments
    /// * `total_tables` — number of `<table>` elements found
    /// * `unparseable`  — fragments the markup path could not turn into tables
    fn on_run_start(&self, total_tables: usize, unparseable: usize) {
        let _ = (total_tables, unparseable);
    }

    /// Called before table `index` (0-based) is rendered.
    fn on_table_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called with each backend's normalised tables for table `index`.
    ///
    /// `tables` may be empty when the backend found nothing.
    fn on_backend_output(&self, index: usize, backend: BackendKind, tables: &[NormalizedTable]) {
        let _ = (index, backend, tables);
    }

    /// Called when table `index` is finished.
    fn on_table_complete(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called for every recovered (non-fatal) problem on table `index`.
    fn on_table_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after the last table.
    ///
    /// # Arguments
    /// * `total_tables` — tables in the filing
    /// * `clean_tables` — tables that finished without a recorded problem
    fn on_run_complete(&self, total_tables: usize, clean_tables: usize) {
        let _ = (total_tables, clean_tables);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        backend_tables: AtomicUsize,
        clean_total: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_table_start(&self, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_backend_output(&self, _index: usize, _b: BackendKind, tables: &[NormalizedTable]) {
            self.backend_tables.fetch_add(tables.len(), Ordering::SeqCst);
        }

        fn on_table_complete(&self, _index: usize, _total: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_table_error(&self, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_run_complete(&self, _total: usize, clean_tables: usize) {
            self.clean_total.store(clean_tables, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(3, 1);
        cb.on_table_start(0, 3);
        cb.on_backend_output(0, BackendKind::Tabula, &[]);
        cb.on_table_error(1, 3, "weasyprint missing");
        cb.on_run_complete(3, 2);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        let table = NormalizedTable::default();

        tracker.on_table_start(0, 2);
        tracker.on_backend_output(0, BackendKind::Pdfium, &[table.clone(), table]);
        tracker.on_table_complete(0, 2);
        tracker.on_table_start(1, 2);
        tracker.on_table_error(1, 2, "png rendering failed");
        tracker.on_table_complete(1, 2);
        tracker.on_run_complete(2, 1);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.backend_tables.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.clean_total.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_table_start(0, 10);
        cb.on_table_complete(0, 10);
    }
}
