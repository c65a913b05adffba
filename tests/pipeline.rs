//! End-to-end scenarios: synthetic MIDI performances through the syntax
//! parser, the static environment, the tree walker, and the scheduler.
//!
//! The harness reproduces the interpreter's dispatch model: one execution
//! worker at a time, with the program and runtime moved into the worker
//! and recovered before the next phrase binds. That keeps the capture
//! hand-off live while a phrase blocks on an incomplete sequence literal.

use std::thread::{self, JoinHandle};

use mddl::program::{Program, Stage};
use mddl::runtime::Runtime;
use mddl::scheduler::Scheduler;
use mddl::syntax::SyntaxParser;
use mddl::value::{DataRef, DataType};

const MS: i64 = 1_000_000; // nanoseconds

type ExecReturn = (Program, Runtime, DataRef);

struct Pipeline {
    parser: SyntaxParser,
    scheduler: Scheduler,
    program: Option<Program>,
    runtime: Option<Runtime>,
    exec: Option<JoinHandle<ExecReturn>>,
    /// Results of executed global statements, in order.
    results: Vec<DataRef>,
    clock: i64,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            parser: SyntaxParser::new(),
            scheduler: Scheduler::new(120, 960),
            program: Some(Program::new()),
            runtime: Some(Runtime::new()),
            exec: None,
            results: Vec::new(),
            clock: 0,
        }
    }

    /// Play a phrase: note-on/off events spaced 10 ms apart.
    fn play(&mut self, events: &[(bool, u8)]) {
        for &(on, key) in events {
            self.clock += 10 * MS;
            if on {
                self.parser.note_on(key, 100, self.clock);
            } else {
                self.parser.note_off(key, self.clock);
            }
            self.pump();
        }
    }

    fn pump(&mut self) {
        if self.parser.has_pending() {
            self.join_exec();
            let ast = self.parser.take_pending().unwrap();
            self.parser.clear();

            let program = self.program.as_mut().unwrap();
            if program.add_ast(&ast) {
                let entry = program.global_stmt_len() - 1;
                self.hand_capture_to_parser();
                self.spawn_exec(entry);
                return;
            }
        }
        self.hand_capture_to_parser();
    }

    fn hand_capture_to_parser(&mut self) {
        if self.parser.capture_active() {
            return;
        }
        let Some(program) = self.program.as_mut() else {
            return;
        };
        if let Some(request) = program.take_pending_literal() {
            self.parser.begin_capture(request.seq, request.note);
        }
    }

    fn spawn_exec(&mut self, entry: usize) {
        let mut program = self.program.take().unwrap();
        let mut runtime = self.runtime.take().unwrap();
        let handle = self.scheduler.handle();

        self.exec = Some(thread::spawn(move || {
            program.resolve_links();
            runtime.push_scope(&program, program.global);
            let result = runtime
                .execute(&program, program.global, entry)
                .expect("phrase execution failed");
            if !result.is_empty() {
                let guard = result.lock();
                let len = if result.is_subseq() {
                    result.size
                } else {
                    guard.len()
                };
                handle.add_sequence(&guard, result.start, len);
            }
            (program, runtime, result)
        }));
    }

    fn join_exec(&mut self) {
        if let Some(handle) = self.exec.take() {
            let (program, runtime, result) = handle.join().expect("worker panicked");
            self.program = Some(program);
            self.runtime = Some(runtime);
            self.results.push(result);
        }
    }

    /// Finish all pending work and hand back the program.
    fn finish(&mut self) {
        self.join_exec();
    }

    fn program(&self) -> &Program {
        self.program.as_ref().expect("program checked out")
    }

    fn last_result(&self) -> &DataRef {
        self.results.last().expect("no phrase executed")
    }
}

fn chord(notes: &[u8]) -> Vec<(bool, u8)> {
    let mut ev: Vec<(bool, u8)> = notes.iter().map(|&n| (true, n)).collect();
    ev.extend(notes.iter().rev().map(|&n| (false, n)));
    ev
}

fn taps(notes: &[u8]) -> Vec<(bool, u8)> {
    notes
        .iter()
        .flat_map(|&n| [(true, n), (false, n)])
        .collect()
}

/// An overlapping three-note run: reads as an identifier.
fn melody(notes: &[u8; 3]) -> Vec<(bool, u8)> {
    vec![
        (true, notes[0]),
        (true, notes[1]),
        (false, notes[0]),
        (true, notes[2]),
        (false, notes[1]),
        (false, notes[2]),
    ]
}

/// `<held bass> <inner events> <release bass>`.
fn under_bass(bass: u8, inner: Vec<(bool, u8)>) -> Vec<(bool, u8)> {
    let mut ev = vec![(true, bass)];
    ev.extend(inner);
    ev.push((false, bass));
    ev
}

// ---- value literals ----

#[test]
fn staccato_digits_evaluate_to_integer() {
    // Digits are absolute interval distances mod 10 between successive
    // staccato strokes above the split: 3, 1, 4, 1 spells 3141. The
    // holding bass sits a minor second over the root, so the phrase binds
    // as a value extraction and hands the scalar through.
    let mut p = Pipeline::new();
    p.play(&under_bass(61, taps(&[70, 73, 74, 78, 79])));
    p.finish();

    let v = p.last_result();
    assert_eq!(v.ty, DataType::Value);
    assert_eq!(v.value, 3141);
}

#[test]
fn downward_first_interval_is_negative() {
    let mut p = Pipeline::new();
    p.play(&under_bass(61, taps(&[70, 67, 71])));
    p.finish();
    assert_eq!(p.last_result().value, -34);
}

// ---- function definition ----

#[test]
fn lone_chord_opens_function_scope() {
    let mut p = Pipeline::new();
    p.play(&chord(&[60, 64, 67]));
    p.finish();

    // The environment gained a child scope, still collecting its
    // signature; nothing was executed.
    assert!(!p.program().at_global_scope());
    assert!(p.results.is_empty());
    let scope = p.program().scope(p.program().tail);
    assert_eq!(scope.stage, Stage::Signature);

    // Closing the signature grants the arity-qualified id.
    p.play(&chord(&[60, 64, 67]));
    p.finish();
    let scope = p.program().scope(p.program().tail);
    assert_eq!(scope.stage, Stage::Body);
    assert_eq!(scope.key.as_ref().unwrap().to_string(), "ceg:0");
}

#[test]
fn transposed_chord_has_identical_intervals() {
    let mut p = Pipeline::new();
    p.play(&chord(&[60, 64, 67]));
    p.finish();
    let original = p.program().scope(p.program().tail).chord.clone();

    let mut q = Pipeline::new();
    q.play(&chord(&[65, 69, 72]));
    q.finish();
    let transposed = q.program().scope(q.program().tail).chord.clone();

    assert_eq!(original[1..], transposed[1..]);
}

// ---- operators over variables ----

#[test]
fn resize_variable_then_read_it_back() {
    let mut p = Pipeline::new();

    // x DO 5 : bass C3 holding the melody x and the digit 5.
    let mut inner = melody(&[60, 62, 64]);
    inner.extend(taps(&[81, 86]));
    p.play(&under_bass(48, inner));
    p.finish();

    let v = p.last_result();
    assert_eq!(v.ty, DataType::Seq);
    assert_eq!(v.length(), 5);

    // A bare melody phrase reads the variable.
    p.play(&melody(&[60, 62, 64]));
    p.finish();
    let v = p.last_result();
    assert_eq!(v.ty, DataType::Seq);
    assert_eq!(v.length(), 5);

    // All five notes are silent, so nothing reached the scheduler.
    assert_eq!(p.scheduler.pending_events(), 0);
}

#[test]
fn pitch_projection_assignment_writes_one_field() {
    let mut p = Pipeline::new();

    // x DO 3 : make room.
    let mut inner = melody(&[60, 62, 64]);
    inner.extend(taps(&[81, 84]));
    p.play(&under_bass(48, inner));
    p.finish();
    assert_eq!(p.last_result().length(), 3);

    // DO( FA( x ), 60 ): the inner bass F3 projects the pitch attribute
    // of x, the outer bass writes the scalar into that field only.
    let mut inner = under_bass(53, melody(&[60, 62, 64]));
    inner.extend(taps(&[81, 87, 87]));
    p.play(&under_bass(48, inner));
    p.finish();

    let v = p.last_result();
    assert_eq!(v.ty, DataType::Attr);
    let seq = v.lock();
    for i in 0..3 {
        assert_eq!(seq.at(i).unwrap().pitch, 60);
        assert_eq!(seq.at(i).unwrap().velocity, 0);
    }
}

// ---- sequence literals ----

#[test]
fn sequence_literal_capture_round_trip() {
    let mut p = Pipeline::new();

    // Reference literal k: a bass holding three taps of the same low
    // pitch. Binding enqueues a capture request; the phrase's execution
    // blocks on the literal until the capture closes.
    p.play(&under_bass(60, taps(&[40, 40, 40])));
    assert!(p.parser.capture_active());

    // Record a two-note take, closed by repeating the trigger pitch.
    p.play(&[(true, 72), (false, 72), (true, 76), (false, 76), (true, 40)]);
    assert!(!p.parser.capture_active());

    // A later phrase with the same literal id resolves to the captured
    // sequence and completes immediately.
    p.play(&under_bass(60, taps(&[40, 40, 40])));
    p.finish();

    assert_eq!(p.results.len(), 2);
    for v in &p.results {
        assert_eq!(v.ty, DataType::Vseq);
        assert_eq!(v.length(), 2);
        let seq = v.lock();
        assert_eq!(seq.at(0).unwrap().pitch, 72);
        assert_eq!(seq.at(1).unwrap().pitch, 76);
    }

    // Both phrases scheduled their audible notes: on/off per note.
    assert_eq!(p.scheduler.pending_events(), 8);
}

#[test]
fn captured_literal_durations_follow_the_performance() {
    let mut p = Pipeline::new();
    p.play(&under_bass(60, taps(&[40, 40, 40])));

    // Hold each captured note for one 10 ms step: 120 bpm at 960 ppq
    // turns that into about 19 ticks.
    p.play(&[(true, 72), (false, 72), (true, 76), (false, 76), (true, 40)]);
    p.play(&under_bass(60, taps(&[40, 40, 40])));
    p.finish();

    let v = p.last_result();
    let seq = v.lock();
    let n = seq.at(0).unwrap();
    assert!(n.duration > 0);
    // Second note starts two steps after the first.
    assert!(seq.at(1).unwrap().wait > n.duration);
}

// ---- scheduling ----

#[test]
fn executed_phrases_emit_ordered_midi() {
    use std::sync::mpsc;
    use std::time::Duration;

    let mut p = Pipeline::new();
    let (tx, rx) = mpsc::channel();
    p.scheduler.launch(Box::new(move |pitch, vel| {
        let _ = tx.send((pitch, vel));
    }));

    p.play(&under_bass(60, taps(&[40, 40, 40])));
    p.play(&[(true, 72), (false, 72), (true, 76), (false, 76), (true, 40)]);
    p.play(&under_bass(60, taps(&[40, 40, 40])));
    p.finish();

    while p.scheduler.pending_events() > 0 {
        thread::sleep(Duration::from_millis(5));
    }
    p.scheduler.shutdown();

    let got: Vec<(u8, u8)> = rx.try_iter().collect();
    assert_eq!(got.len(), 8);
    // Each note-on precedes its note-off.
    let ons: Vec<usize> = got
        .iter()
        .enumerate()
        .filter(|(_, (_, v))| *v > 0)
        .map(|(i, _)| i)
        .collect();
    for (i, &(pitch, _)) in got.iter().enumerate().filter(|(_, (_, v))| *v > 0) {
        let off = got[i..]
            .iter()
            .position(|&(p2, v2)| p2 == pitch && v2 == 0);
        assert!(off.is_some(), "note-on without a later note-off");
    }
    assert_eq!(ons.len(), 4);
}
