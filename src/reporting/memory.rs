//! In-process status sink with the dashboard's bookkeeping rules: statuses are
//! grouped by host, and results in `fileName,operation,url` form are stored as
//! `fileName, operation`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::StatusSink;
use crate::error::{DispatcherError, Result};
use crate::models::display_key;

#[derive(Debug)]
pub struct InMemoryStatusSink {
    statuses: Mutex<Vec<(String, Vec<String>)>>,
    results: Mutex<Vec<String>>,
    clear_count: Mutex<usize>,
    available: AtomicBool,
}

impl Default for InMemoryStatusSink {
    fn default() -> Self {
        Self {
            statuses: Mutex::new(Vec::new()),
            results: Mutex::new(Vec::new()),
            clear_count: Mutex::new(0),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the sink going away; calls fail while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn statuses_for(&self, host: &str) -> Vec<String> {
        self.statuses
            .lock()
            .iter()
            .find(|(id, _)| id == host)
            .map(|(_, statuses)| statuses.clone())
            .unwrap_or_default()
    }

    pub fn hosts(&self) -> Vec<String> {
        self.statuses.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn results(&self) -> Vec<String> {
        self.results.lock().clone()
    }

    pub fn clear_count(&self) -> usize {
        *self.clear_count.lock()
    }

    fn ensure_available(&self, operation: &str) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DispatcherError::sink(operation, "sink unavailable"))
        }
    }
}

#[async_trait]
impl StatusSink for InMemoryStatusSink {
    async fn report_status(&self, worker_id: &str, status: &str) -> Result<()> {
        self.ensure_available("report_status")?;

        let key = display_key(worker_id);
        let mut statuses = self.statuses.lock();
        match statuses.iter_mut().find(|(id, _)| id == key) {
            Some((_, list)) => list.push(status.to_string()),
            None => statuses.push((key.to_string(), vec![status.to_string()])),
        }
        Ok(())
    }

    async fn report_result(&self, result: &str) -> Result<()> {
        self.ensure_available("report_result")?;

        let parts: Vec<&str> = result.split(',').collect();
        let entry = if parts.len() == 3 {
            format!("{}, {}", parts[0], parts[1])
        } else {
            result.to_string()
        };
        self.results.lock().push(entry);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.ensure_available("clear_all")?;

        self.statuses.lock().clear();
        self.results.lock().clear();
        *self.clear_count.lock() += 1;
        Ok(())
    }
}
