//! Serial background queue
//!
//! Backups are full file copies and should not run on a request path. A
//! [`SerialQueue`] owns one worker thread fed by a channel, so jobs for a
//! database run one at a time in submission order. Create one queue per
//! database identity.

use anyhow::{anyhow, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct SerialQueue {
    name: String,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl SerialQueue {
    /// Start the worker thread
    pub fn spawn(name: &str) -> Result<Self> {
        let (sender, receiver) = channel::<Job>();
        let thread_name = name.to_string();

        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in receiver {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Job on queue '{}' panicked", thread_name);
                    }
                }
                debug!("Queue '{}' drained", thread_name);
            })
            .map_err(|e| anyhow!("Failed to spawn queue '{}': {}", name, e))?;

        Ok(Self {
            name: name.to_string(),
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a job behind everything already submitted
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("Queue '{}' is shut down", self.name))?;
        sender
            .send(Box::new(job))
            .map_err(|_| anyhow!("Queue '{}' worker has stopped", self.name))
    }

    /// Run all pending jobs, then stop the worker
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.sender.take();
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| anyhow!("Queue '{}' worker panicked", self.name)),
            None => Ok(()),
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_jobs_run_in_order() {
        let queue = SerialQueue::spawn("test-queue").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let seen = Arc::clone(&seen);
            queue
                .submit(move || seen.lock().unwrap().push(i))
                .unwrap();
        }
        queue.shutdown().unwrap();

        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_job_does_not_stop_queue() {
        let queue = SerialQueue::spawn("panicky").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        queue.submit(|| panic!("boom")).unwrap();
        let after = Arc::clone(&seen);
        queue.submit(move || after.lock().unwrap().push(1)).unwrap();
        queue.shutdown().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }
}
