//! Named FIFO queues connecting pipeline stages.
//!
//! A pipeline is an unbounded multi-producer multi-consumer queue. Producers
//! never wait. Consumers take turns on the single receiver, so every message
//! is delivered to exactly one of them, including the `Close` sentinel used
//! to stop one worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};

/// Something whose current size shows up in statistics.
pub trait Observable: Send + Sync {
    fn fullname(&self) -> &str;
    fn nickname(&self) -> &str;
    fn size(&self) -> usize;
}

enum Message<T> {
    Work(T),
    Close,
}

pub struct Pipeline<T> {
    fullname: String,
    nickname: String,
    sender: mpsc::UnboundedSender<Message<T>>,
    receiver: Mutex<mpsc::UnboundedReceiver<Message<T>>>,
    depth: AtomicUsize,
}

impl<T: Send> Pipeline<T> {
    pub fn new(fullname: impl Into<String>, nickname: impl Into<String>) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            fullname: fullname.into(),
            nickname: nickname.into(),
            sender,
            receiver: Mutex::new(receiver),
            depth: AtomicUsize::new(0),
        })
    }

    pub fn enqueue(&self, item: T) {
        self.depth.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(Message::Work(item)).is_err() {
            // The receiver lives as long as `self`, so this cannot happen.
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Wakes exactly one consumer with "no work".
    pub fn close_one(&self) {
        let _ = self.sender.send(Message::Close);
    }

    /// Waits for the next item. `None` means this consumer should stop.
    pub async fn dequeue(&self) -> Option<T> {
        let mut receiver = self.receiver.lock().await;
        match receiver.recv().await {
            Some(Message::Work(item)) => {
                self.depth.fetch_sub(1, Ordering::AcqRel);
                Some(item)
            }
            Some(Message::Close) | None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send> Observable for Pipeline<T> {
    fn fullname(&self) -> &str {
        &self.fullname
    }

    fn nickname(&self) -> &str {
        &self.nickname
    }

    fn size(&self) -> usize {
        self.len()
    }
}
