//! Shared helpers for enginecore integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use enginecore::{FailureCause, PipelineConfig, RuntimeError};

pub fn config() -> PipelineConfig {
    PipelineConfig::builder("/opt/engine")
        .engine_arg("--disable-gpu")
        .build()
        .expect("valid test configuration")
}

/// Records every callback invocation made by the coordinator.
#[derive(Debug, Clone, Default)]
pub struct Callbacks {
    errors: Arc<Mutex<Vec<FailureCause>>>,
    handle_errors: Arc<Mutex<Vec<RuntimeError>>>,
    restarts: Arc<AtomicUsize>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_error(&self) -> impl FnOnce(FailureCause) + Send + 'static {
        let errors = Arc::clone(&self.errors);
        move |cause| errors.lock().unwrap().push(cause)
    }

    pub fn on_handle_error(&self) -> impl FnOnce(RuntimeError) + Send + 'static {
        let errors = Arc::clone(&self.handle_errors);
        move |error| errors.lock().unwrap().push(error)
    }

    pub fn on_restart(&self) -> impl FnOnce() + Send + 'static {
        let restarts = Arc::clone(&self.restarts);
        move || {
            restarts.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn errors(&self) -> Vec<FailureCause> {
        self.errors.lock().unwrap().clone()
    }

    pub fn handle_errors(&self) -> Vec<RuntimeError> {
        self.handle_errors.lock().unwrap().clone()
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}
