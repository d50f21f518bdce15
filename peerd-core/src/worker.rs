//! Fixed-size worker sets draining pipelines, plus long-running services.
//!
//! Stage workers stop when they dequeue a close sentinel; one sentinel is
//! queued per worker, behind any work already waiting, so a stage drains
//! before it exits. Services (listeners, timers) and connection readers
//! watch a shared shutdown signal instead. Sets stop in the order they were
//! spawned, so spawn upstream stages first.

use crate::Pipeline;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// One step of the request pipeline.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Handles one item completely. Errors belong on the item itself;
    /// nothing escapes a stage.
    async fn process(&self, item: Self::Item);
}

#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn triggered(&mut self) {
        while !*self.receiver.borrow_and_update() {
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

struct WorkerSet {
    name: String,
    close: Option<Box<dyn Fn() + Send + Sync>>,
    handles: Vec<JoinHandle<()>>,
}

pub struct WorkerGroup {
    shutdown: watch::Sender<bool>,
    sets: Vec<WorkerSet>,
}

impl Default for WorkerGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerGroup {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            sets: Vec::new(),
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.shutdown.subscribe(),
        }
    }

    /// Starts `count` workers running `stage` over `input`.
    pub fn spawn_stage<S: Stage>(
        &mut self,
        name: &str,
        stage: Arc<S>,
        input: Arc<Pipeline<S::Item>>,
        count: usize,
    ) {
        let handles = (0..count)
            .map(|index| {
                let worker = format!("{}-{}", name, index);
                tokio::spawn(run_stage(worker, Arc::clone(&stage), Arc::clone(&input)))
            })
            .collect();

        let close_input = Arc::clone(&input);
        self.sets.push(WorkerSet {
            name: name.to_string(),
            close: Some(Box::new(move || close_input.close_one())),
            handles,
        });
        tracing::debug!("Started {} x{}", name, count);
    }

    /// Starts a single long-running service that exits on shutdown.
    pub fn spawn_service<F, Fut>(&mut self, name: &str, service: F)
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(service(self.shutdown_signal()));
        self.sets.push(WorkerSet {
            name: name.to_string(),
            close: None,
            handles: vec![handle],
        });
        tracing::debug!("Started {}", name);
    }

    pub fn workers(&self) -> usize {
        self.sets.iter().map(|set| set.handles.len()).sum()
    }

    /// Signals shutdown, then stops each set in spawn order and waits for
    /// its workers to finish their current item.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);

        for set in self.sets {
            if let Some(close) = &set.close {
                for _ in 0..set.handles.len() {
                    close();
                }
            }
            for handle in set.handles {
                if let Err(e) = handle.await {
                    tracing::warn!("Worker of {} ended abnormally: {}", set.name, e);
                }
            }
            tracing::debug!("Stopped {}", set.name);
        }
    }
}

async fn run_stage<S: Stage>(worker: String, stage: Arc<S>, input: Arc<Pipeline<S::Item>>) {
    while let Some(item) = input.dequeue().await {
        let outcome = AssertUnwindSafe(stage.process(item)).catch_unwind().await;
        if let Err(panic) = outcome {
            tracing::error!(
                "Worker {} panicked while processing an item: {}",
                worker,
                panic_message(panic.as_ref())
            );
        }
    }
    tracing::trace!("Worker {} exited", worker);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
