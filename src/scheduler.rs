//! Realtime-ish MIDI output scheduling.
//!
//! Realized sequences are merged into a single time-ordered queue of
//! note-on/note-off events; an emitter thread pops events as their
//! wall-clock time arrives and hands them to an emit sink. The scheduler
//! does **not** own the MIDI connection — the caller provides the sink, so
//! all scheduling logic stays testable without hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::value::Sequence;

/// Emission callback: `(pitch, velocity)`; velocity zero is a note-off.
pub type EmitFn = Box<dyn FnMut(u8, u8) + Send>;

/// Sleep between emitter polls.
const EMIT_POLL_MS: u64 = 1;

/// A scheduled wire event at an absolute nanosecond offset from the
/// scheduler epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub at: u64,
    pub pitch: u8,
    pub velocity: u8,
}

/// Time-ordered event storage.
///
/// Kept sorted on insert; simultaneous events preserve insertion order, so
/// a note-on always precedes the note-off scheduled with it.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn insert(&mut self, event: Event) {
        let pos = self.events.partition_point(|e| e.at <= event.at);
        self.events.insert(pos, event);
    }

    /// Pop every event due at or before `now`, in time order.
    pub fn pop_due(&mut self, now: u64, out: &mut Vec<Event>) {
        let due = self.events.partition_point(|e| e.at <= now);
        out.extend(self.events.drain(..due));
    }

    pub fn peek_next(&self) -> Option<&Event> {
        self.events.first()
    }
}

struct Shared {
    queue: Mutex<EventQueue>,
    active: AtomicBool,
}

/// Converts sequences into timed events and emits them from a background
/// thread.
pub struct Scheduler {
    shared: Arc<Shared>,
    epoch: Instant,
    thread: Option<JoinHandle<()>>,
    tempo: i64,
    ppq: i64,
    ticks_to_ns: f64,
}

impl Scheduler {
    pub fn new(tempo: i64, ppq: i64) -> Self {
        let mut s = Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(EventQueue::new()),
                active: AtomicBool::new(false),
            }),
            epoch: Instant::now(),
            thread: None,
            tempo,
            ppq,
            ticks_to_ns: 0.0,
        };
        s.update_conversions();
        s
    }

    pub fn set_tempo(&mut self, bpm: i64) {
        self.tempo = bpm;
        self.update_conversions();
    }

    pub fn set_ppq(&mut self, ticks: i64) {
        self.ppq = ticks;
        self.update_conversions();
    }

    fn update_conversions(&mut self) {
        self.ticks_to_ns = 60.0 / self.tempo as f64 / self.ppq as f64 * 1_000_000_000.0;
    }

    /// Start the emitter thread; events go to `emit`.
    pub fn launch(&mut self, mut emit: EmitFn) {
        self.shared.active.store(true, Ordering::SeqCst);
        self.epoch = Instant::now();

        let shared = Arc::clone(&self.shared);
        let epoch = self.epoch;
        self.thread = Some(thread::spawn(move || {
            let mut due = Vec::new();
            loop {
                let now = epoch.elapsed().as_nanos() as u64;
                let remaining = {
                    let mut queue = shared.queue.lock().expect("scheduler queue poisoned");
                    due.clear();
                    queue.pop_due(now, &mut due);
                    queue.len()
                };

                for event in &due {
                    emit(event.pitch, event.velocity);
                }

                if !shared.active.load(Ordering::SeqCst) && remaining == 0 {
                    break;
                }

                thread::sleep(Duration::from_millis(EMIT_POLL_MS));
            }
        }));
    }

    /// Stop accepting work and drain the queue before joining.
    pub fn shutdown(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Splice a realized sequence window into the outgoing queue, starting
    /// now.
    pub fn add_sequence(&self, seq: &Sequence, start: i64, length: i64) {
        self.handle().add_sequence(seq, start, length);
    }

    /// A cheap clone for worker threads that only splice sequences in.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
            epoch: self.epoch,
            ticks_to_ns: self.ticks_to_ns,
        }
    }

    pub fn pending_events(&self) -> usize {
        self.shared.queue.lock().expect("scheduler queue poisoned").len()
    }
}

/// Insertion-side view of a running [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    epoch: Instant,
    ticks_to_ns: f64,
}

impl SchedulerHandle {
    /// Splice a realized sequence window into the outgoing queue, starting
    /// now. Zero-velocity notes are skipped; each audible note contributes
    /// a note-on and its note-off `duration` ticks later.
    pub fn add_sequence(&self, seq: &Sequence, start: i64, length: i64) {
        if seq.is_compressed() && seq.prototype().velocity == 0 {
            return;
        }

        let now = self.epoch.elapsed().as_nanos() as u64;
        let mut queue = self.shared.queue.lock().expect("scheduler queue poisoned");

        let mut cursor = now;
        for note in seq.iter_window(start, length) {
            if note.velocity == 0 {
                continue;
            }

            cursor += (note.wait as f64 * self.ticks_to_ns) as u64;
            queue.insert(Event {
                at: cursor,
                pitch: note.pitch,
                velocity: note.velocity,
            });
            let off_at = cursor + (note.duration as f64 * self.ticks_to_ns) as u64;
            queue.insert(Event {
                at: off_at,
                pitch: note.pitch,
                velocity: 0,
            });
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
