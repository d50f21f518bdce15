//! Per-request context and the pool that recycles it.
//!
//! A [`PooledTicket`] is moved from stage to stage through the pipelines, so
//! exactly one worker owns it at a time. Dropping it hands the ticket back
//! to its pool, which makes the return unconditional: the last owner returns
//! it whether it answered the client, retired the request silently or
//! unwound from a panic.

use crate::{Basket, Channel, Command, Observable, PeerError, Result, StorageRequest};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub type CommandArgs = BTreeMap<String, String>;

/// Fields emitted to the client on success.
pub type Payload = serde_json::Map<String, serde_json::Value>;

#[derive(Default)]
pub struct Ticket {
    channel: Option<Arc<dyn Channel>>,
    raw: String,
    pub command: String,
    pub command_kind: Option<Command>,
    pub args: CommandArgs,
    pub basket: Option<Basket>,
    pub host: String,
    pub message: Option<String>,
    pub request: Option<StorageRequest>,
    marks: Vec<Instant>,
    result: Option<Result<Payload>>,
}

impl Ticket {
    pub fn attach(&mut self, channel: Arc<dyn Channel>, raw: impl Into<String>) {
        self.channel = Some(channel);
        self.raw = raw.into();
    }

    pub fn channel(&self) -> Option<&Arc<dyn Channel>> {
        self.channel.as_ref()
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Records a pipeline boundary crossing.
    pub fn mark(&mut self) {
        self.marks.push(Instant::now());
    }

    pub fn marks(&self) -> usize {
        self.marks.len()
    }

    /// Time between the first and the last mark.
    pub fn duration(&self) -> Duration {
        match (self.marks.first(), self.marks.last()) {
            (Some(first), Some(last)) => last.saturating_duration_since(*first),
            _ => Duration::ZERO,
        }
    }

    /// Time spent between consecutive marks.
    pub fn durations(&self) -> Vec<Duration> {
        self.marks
            .windows(2)
            .map(|pair| pair[1].saturating_duration_since(pair[0]))
            .collect()
    }

    /// `"<total>ms [<stage>, <stage>, ...]"`, in milliseconds.
    pub fn timing_summary(&self) -> String {
        let stages: Vec<String> = self
            .durations()
            .iter()
            .map(|d| format!("{:.1}", d.as_secs_f64() * 1000.0))
            .collect();
        format!(
            "{:.1}ms [{}]",
            self.duration().as_secs_f64() * 1000.0,
            stages.join(", ")
        )
    }

    pub fn set_result(&mut self, result: Result<Payload>) {
        if let Some(previous) = self.result.replace(result) {
            tracing::warn!(
                "Ticket result overwritten for {} (previous ok={})",
                self.command,
                previous.is_ok()
            );
        }
    }

    pub fn take_result(&mut self) -> Result<Payload> {
        self.result.take().unwrap_or_else(|| {
            Err(PeerError::Internal(format!(
                "no result produced for {}",
                self.command
            )))
        })
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    fn reset(&mut self) {
        self.channel = None;
        self.raw.clear();
        self.command.clear();
        self.command_kind = None;
        self.args.clear();
        self.basket = None;
        self.host.clear();
        self.message = None;
        self.request = None;
        self.marks.clear();
        self.result = None;
    }
}

pub struct TicketPool {
    fullname: String,
    nickname: String,
    capacity: usize,
    idle: Mutex<Vec<Ticket>>,
    in_use: AtomicUsize,
    allocated: AtomicUsize,
}

impl TicketPool {
    /// `capacity` bounds how many returned tickets are kept for reuse; the
    /// pool itself grows on demand.
    pub fn new(
        fullname: impl Into<String>,
        nickname: impl Into<String>,
        capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            fullname: fullname.into(),
            nickname: nickname.into(),
            capacity,
            idle: Mutex::new(Vec::with_capacity(capacity)),
            in_use: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
        })
    }

    pub fn create_ticket(self: &Arc<Self>) -> PooledTicket {
        let recycled = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let ticket = recycled.unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::AcqRel);
            Ticket::default()
        });
        self.in_use.fetch_add(1, Ordering::AcqRel);

        PooledTicket {
            ticket: Some(ticket),
            pool: Arc::clone(self),
        }
    }

    fn delete(&self, mut ticket: Ticket) {
        ticket.reset();
        self.in_use.fetch_sub(1, Ordering::AcqRel);

        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.capacity {
            idle.push(ticket);
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Tickets ever constructed by this pool.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }
}

impl Observable for TicketPool {
    fn fullname(&self) -> &str {
        &self.fullname
    }

    fn nickname(&self) -> &str {
        &self.nickname
    }

    fn size(&self) -> usize {
        self.in_use()
    }
}

/// A checked-out ticket; returns itself to the pool on drop.
pub struct PooledTicket {
    ticket: Option<Ticket>,
    pool: Arc<TicketPool>,
}

impl Deref for PooledTicket {
    type Target = Ticket;

    fn deref(&self) -> &Ticket {
        self.ticket.as_ref().expect("ticket present until drop")
    }
}

impl DerefMut for PooledTicket {
    fn deref_mut(&mut self) -> &mut Ticket {
        self.ticket.as_mut().expect("ticket present until drop")
    }
}

impl Drop for PooledTicket {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.pool.delete(ticket);
        }
    }
}
