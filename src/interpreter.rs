//! Interpreter glue: the message queue between the MIDI callback and the
//! parser, the humanization debounce, phrase dispatch, and the REPL loop.
//!
//! One execution worker runs at a time. The program and runtime are moved
//! into the worker thread and recovered from its join handle before the
//! next phrase is bound, so a phrase never mutates the program while the
//! previous one still walks it — though its audio may still be rendering
//! in the scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::midi::{MidiFile, MidiMsg};
use crate::printer::Printer;
use crate::program::Program;
use crate::runtime::Runtime;
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::syntax::SyntaxParser;
use crate::value::{DataRef, DataType};

/// Sleep between REPL poll rounds.
const LISTEN_SLEEP_MS: u64 = 10;

/// Note-offs younger than this are held back to survive sloppy fingering.
pub const HUMANIZATION_MS: i64 = 50;

/// A timestamped message from the input callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedMsg {
    pub msg: MidiMsg,
    /// Nanoseconds, from the input driver's clock.
    pub tick: i64,
}

pub type MsgSender = Sender<TimedMsg>;

/// Reorders rushed note-offs around closely following note-ons.
///
/// A note-off for the most recent note-on is buffered for a short window.
/// If a note-on for the *same* pitch arrives first, the off is delivered
/// before it (preserving order); a *different* pitch is delivered before
/// the buffered off, coalescing the trill so the notes read as held
/// together rather than as siblings.
#[derive(Default)]
pub struct Debounce {
    delayed: Option<TimedMsg>,
    remaining_ns: i64,
    prev_note_on: Option<u8>,
    window_ns: i64,
}

impl Debounce {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ns: window_ms * 1_000_000,
            ..Self::default()
        }
    }

    /// Advance the hold window; flushes the buffered off when it expires
    /// (or immediately while a capture is active).
    pub fn tick(&mut self, elapsed_ns: i64, flush_now: bool, out: &mut Vec<TimedMsg>) {
        if self.delayed.is_none() {
            return;
        }
        self.remaining_ns -= elapsed_ns;
        if self.remaining_ns <= 0 || flush_now {
            out.extend(self.delayed.take());
            self.remaining_ns = 0;
        }
    }

    pub fn feed(&mut self, timed: TimedMsg, out: &mut Vec<TimedMsg>) {
        match timed.msg {
            MidiMsg::NoteOn { key, .. } => {
                if let Some(delayed) = self.delayed.take() {
                    if Some(key) == self.prev_note_on {
                        // Same pitch re-struck: keep the original order.
                        out.push(delayed);
                        out.push(timed);
                    } else {
                        // Different pitch: the on slips in front of the
                        // buffered off.
                        out.push(timed);
                        out.push(delayed);
                    }
                    self.remaining_ns = 0;
                } else {
                    out.push(timed);
                }
                self.prev_note_on = Some(key);
            }
            MidiMsg::NoteOff { key } => {
                if let Some(delayed) = self.delayed.take() {
                    out.push(delayed);
                }
                if Some(key) == self.prev_note_on {
                    self.delayed = Some(timed);
                    self.remaining_ns = self.window_ns;
                } else {
                    out.push(timed);
                }
            }
            MidiMsg::Extension(_) => out.push(timed),
        }
    }
}

/// Result of one phrase execution, carried back from the worker.
struct ExecReturn {
    program: Program,
    runtime: Runtime,
}

pub struct Interpreter {
    program: Option<Program>,
    runtime: Option<Runtime>,
    syntax: SyntaxParser,
    /// Shared with execution workers: result lines and the echo overwrite
    /// the same terminal line, so they share its width state.
    printer: Arc<Mutex<Printer>>,
    scheduler: Scheduler,
    rx: Receiver<TimedMsg>,
    exec: Option<JoinHandle<ExecReturn>>,
    debounce: Debounce,
    quiet: bool,
}

impl Interpreter {
    pub fn new(rx: Receiver<TimedMsg>, tempo: i64, ppq: i64) -> Self {
        let mut syntax = SyntaxParser::new();
        syntax.set_tempo(tempo);
        syntax.set_ppq(ppq);

        Self {
            program: Some(Program::new()),
            runtime: Some(Runtime::new()),
            syntax,
            printer: Arc::new(Mutex::new(Printer::new())),
            scheduler: Scheduler::new(tempo, ppq),
            rx,
            exec: None,
            debounce: Debounce::new(HUMANIZATION_MS),
            quiet: false,
        }
    }

    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    pub fn launch_scheduler(&mut self, emit: crate::scheduler::EmitFn) {
        self.scheduler.launch(emit);
    }

    pub fn shutdown(&mut self) {
        self.join_exec();
        self.scheduler.shutdown();
    }

    /// Feed a whole MIDI file through the parser, binding phrases without
    /// executing them. A pending capture swallows the entire file.
    pub fn read_file(&mut self, file: &MidiFile) {
        if self.syntax.capture_active() {
            self.syntax.force_capture();
            for track in &file.tracks {
                for event in track {
                    self.syntax.process_msg(event.msg, event.tick);
                }
            }
            self.syntax.close_capture();
            return;
        }

        for track in &file.tracks {
            for event in track {
                self.syntax.process_msg(event.msg, event.tick);

                if self.syntax.has_pending() {
                    self.bind_pending_phrase();
                }
                self.hand_capture_to_parser();
            }
        }

        if let Some(program) = &mut self.program {
            program.resolve_links();
        }
    }

    /// Bind the parser's finished phrase into the program. Returns the
    /// global statement to dispatch, if the phrase appended one.
    fn bind_pending_phrase(&mut self) -> Option<usize> {
        let ast = self.syntax.take_pending()?;
        self.syntax.clear();
        let program = self.program.as_mut().expect("program checked out");
        let appended = program.add_ast(&ast);
        appended.then(|| program.global_stmt_len() - 1)
    }

    fn hand_capture_to_parser(&mut self) {
        if self.syntax.capture_active() {
            return;
        }
        // New capture requests only appear at bind time, so a checked-out
        // program has nothing new to hand over.
        let Some(program) = self.program.as_mut() else {
            return;
        };
        if let Some(request) = program.take_pending_literal() {
            self.syntax.begin_capture(request.seq, request.note);
        }
    }

    /// Run the global body from its first statement (file mode).
    pub fn run_head(&mut self) {
        self.spawn_exec(0);
    }

    /// Block until the current execution finishes.
    pub fn join_exec(&mut self) {
        if let Some(handle) = self.exec.take() {
            match handle.join() {
                Ok(ret) => {
                    self.program = Some(ret.program);
                    self.runtime = Some(ret.runtime);
                }
                Err(_) => {
                    eprintln!("Internal Error: phrase execution panicked; program reset");
                    self.program = Some(Program::new());
                    self.runtime = Some(Runtime::new());
                }
            }
        }
    }

    fn spawn_exec(&mut self, entry: usize) {
        self.join_exec();

        let mut program = self.program.take().expect("program checked out");
        let mut runtime = self.runtime.take().expect("runtime checked out");
        let handle = self.scheduler.handle();
        let printer = Arc::clone(&self.printer);
        let quiet = self.quiet;

        self.exec = Some(thread::spawn(move || {
            run_phrase(&mut program, &mut runtime, entry, &handle, &printer, quiet);
            ExecReturn { program, runtime }
        }));
    }

    /// The REPL: drain input, debounce, parse, dispatch phrases until
    /// `stop` is raised.
    pub fn listen(&mut self, stop: &Arc<AtomicBool>) {
        let mut last = Instant::now();
        let mut batch = Vec::new();

        while !stop.load(Ordering::SeqCst) {
            let elapsed = last.elapsed().as_nanos() as i64;
            last = Instant::now();

            batch.clear();
            self.debounce
                .tick(elapsed, self.syntax.capture_active(), &mut batch);

            while let Ok(timed) = self.rx.try_recv() {
                if self.syntax.capture_active() {
                    batch.push(timed);
                } else {
                    self.debounce.feed(timed, &mut batch);
                }
            }

            for &timed in &batch {
                self.receive_message(timed);
            }

            thread::sleep(Duration::from_millis(LISTEN_SLEEP_MS));
        }
    }

    fn receive_message(&mut self, timed: TimedMsg) {
        self.syntax.process_msg(timed.msg, timed.tick);

        if !self.syntax.capture_active() && !self.quiet {
            self.printer
                .lock()
                .expect("printer lock poisoned")
                .echo(self.syntax.cst());
        }

        if self.syntax.has_pending() {
            // Recover the program from the previous phrase's worker before
            // binding into it.
            self.join_exec();
            if let Some(entry) = self.bind_pending_phrase() {
                self.hand_capture_to_parser();
                self.spawn_exec(entry);
                return;
            }
        }
        self.hand_capture_to_parser();
    }

    pub fn print_program(&mut self) {
        self.join_exec();
        if let Some(program) = &self.program {
            print!("{program}");
        }
    }
}

/// One phrase execution: re-link, walk, report, schedule.
fn run_phrase(
    program: &mut Program,
    runtime: &mut Runtime,
    entry: usize,
    scheduler: &SchedulerHandle,
    printer: &Mutex<Printer>,
    quiet: bool,
) {
    program.resolve_links();
    runtime.push_scope(program, program.global);

    let result = match runtime.execute(program, program.global, entry) {
        Ok(v) => v,
        Err(err) => {
            eprintln!("{err}");
            // Drop any half-built frame so later phrases see a clean stack.
            runtime
                .stack
                .truncate(program.scope(program.global).vars.len());
            DataRef::of_type(DataType::Error)
        }
    };

    if !quiet {
        printer
            .lock()
            .expect("printer lock poisoned")
            .print_result(&describe_result(&result));
    }

    if !result.is_empty() {
        let guard = result.lock();
        let len = if result.is_subseq() {
            result.size
        } else {
            guard.len()
        };
        scheduler.add_sequence(&guard, result.start, len);
    }
}

fn describe_result(result: &DataRef) -> String {
    match result.ty {
        DataType::Seq | DataType::Vseq | DataType::SeqLit | DataType::Attr | DataType::Vattr => {
            format!("[{}]", result.length())
        }
        DataType::Value => format!("[{}]", result.value),
        DataType::Error | DataType::Undefined => "[undefined]".to_string(),
        _ => "[]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on(key: u8, tick: i64) -> TimedMsg {
        TimedMsg {
            msg: MidiMsg::NoteOn { key, vel: 100 },
            tick,
        }
    }

    fn off(key: u8, tick: i64) -> TimedMsg {
        TimedMsg {
            msg: MidiMsg::NoteOff { key },
            tick,
        }
    }

    #[test]
    fn debounce_passes_plain_messages() {
        let mut d = Debounce::new(50);
        let mut out = Vec::new();
        d.feed(on(60, 0), &mut out);
        assert_eq!(out, vec![on(60, 0)]);

        // An off for a pitch other than the last on passes straight
        // through.
        out.clear();
        d.feed(off(61, 1), &mut out);
        assert_eq!(out, vec![off(61, 1)]);
    }

    #[test]
    fn debounce_buffers_off_of_last_note_on() {
        let mut d = Debounce::new(50);
        let mut out = Vec::new();
        d.feed(on(60, 0), &mut out);
        out.clear();
        d.feed(off(60, 1), &mut out);
        assert!(out.is_empty(), "off should be held back");

        // Window expires: the off is flushed.
        d.tick(60 * 1_000_000, false, &mut out);
        assert_eq!(out, vec![off(60, 1)]);
    }

    #[test]
    fn debounce_survives_partial_window() {
        let mut d = Debounce::new(50);
        let mut out = Vec::new();
        d.feed(on(60, 0), &mut out);
        out.clear();
        d.feed(off(60, 1), &mut out);
        d.tick(20 * 1_000_000, false, &mut out);
        assert!(out.is_empty());
        d.tick(40 * 1_000_000, false, &mut out);
        assert_eq!(out, vec![off(60, 1)]);
    }

    #[test]
    fn debounce_reorders_different_pitch_on_before_buffered_off() {
        // The trill-coalescing rule: on(62) within the window of off(60)
        // arrives first, so 62 still reads as a child of the held chord.
        let mut d = Debounce::new(50);
        let mut out = Vec::new();
        d.feed(on(60, 0), &mut out);
        out.clear();
        d.feed(off(60, 10), &mut out);
        d.feed(on(62, 20), &mut out);
        assert_eq!(out, vec![on(62, 20), off(60, 10)]);
    }

    #[test]
    fn debounce_keeps_order_for_same_pitch_restrike() {
        let mut d = Debounce::new(50);
        let mut out = Vec::new();
        d.feed(on(60, 0), &mut out);
        out.clear();
        d.feed(off(60, 10), &mut out);
        d.feed(on(60, 20), &mut out);
        assert_eq!(out, vec![off(60, 10), on(60, 20)]);
    }

    #[test]
    fn debounce_flush_now_releases_immediately() {
        let mut d = Debounce::new(50);
        let mut out = Vec::new();
        d.feed(on(60, 0), &mut out);
        out.clear();
        d.feed(off(60, 10), &mut out);
        d.tick(0, true, &mut out);
        assert_eq!(out, vec![off(60, 10)]);
    }

    #[test]
    fn sibling_merge_scenario() {
        // Two rushed offs around a new on: the resulting stream keeps the
        // new note inside the held chord.
        let mut d = Debounce::new(50);
        let mut out = Vec::new();
        d.feed(on(60, 0), &mut out);
        d.feed(on(64, 10), &mut out);
        out.clear();

        d.feed(off(64, 20), &mut out); // buffered (64 was the last on)
        d.feed(on(67, 30), &mut out); // different pitch: jumps the queue
        assert_eq!(out, vec![on(67, 30), off(64, 20)]);

        out.clear();
        d.feed(off(60, 40), &mut out);
        d.feed(off(67, 50), &mut out);
        d.tick(60 * 1_000_000, false, &mut out);
        assert_eq!(out, vec![off(60, 40), off(67, 50)]);
    }

    #[test]
    fn describe_results() {
        assert_eq!(describe_result(&DataRef::value(3141)), "[3141]");
        assert_eq!(
            describe_result(&DataRef::of_type(DataType::Error)),
            "[undefined]"
        );
    }
}
