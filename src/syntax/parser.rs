//! The live syntax parser.
//!
//! Consumes the decoded MIDI stream one message at a time, growing the CST
//! while notes are held. When the last note is released the phrase is
//! disambiguated into an AST and held as *pending* for the interpreter to
//! collect. While a sequence-literal capture is active, incoming notes are
//! recorded straight into the target sequence instead of the CST.

use crate::midi::{IefCode, MidiMsg};
use crate::value::SeqRef;

use super::ast::Ast;
use super::cst::Cst;
use super::symbol::N_MIDI_NOTES;

pub const DEFAULT_TEMPO: i64 = 120;
pub const DEFAULT_PPQ: i64 = 960;

/// State of an active sequence-literal capture.
struct Capture {
    seq: SeqRef,
    /// Striking this pitch again closes the capture.
    trigger: u8,
    /// Indices of captured notes still being held.
    held: Vec<i64>,
    /// A forced capture ignores the trigger pitch and is closed explicitly
    /// (file input).
    forced: bool,
}

pub struct SyntaxParser {
    cst: Cst,
    pending: Option<Ast>,
    ief_code: IefCode,
    active: [bool; N_MIDI_NOTES],
    active_count: usize,
    capture: Option<Capture>,
    prev_note_on_tick: i64,
    prev_event_tick: i64,
    tempo: i64,
    ppq: i64,
}

impl Default for SyntaxParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntaxParser {
    pub fn new() -> Self {
        Self {
            cst: Cst::new(),
            pending: None,
            ief_code: IefCode::Default,
            active: [false; N_MIDI_NOTES],
            active_count: 0,
            capture: None,
            prev_note_on_tick: 0,
            prev_event_tick: 0,
            tempo: DEFAULT_TEMPO,
            ppq: DEFAULT_PPQ,
        }
    }

    pub fn set_tempo(&mut self, bpm: i64) {
        self.tempo = bpm;
    }

    pub fn set_ppq(&mut self, ticks: i64) {
        self.ppq = ticks;
    }

    pub fn cst(&self) -> &Cst {
        &self.cst
    }

    /// Take the finished phrase, if one is waiting.
    pub fn take_pending(&mut self) -> Option<Ast> {
        self.pending.take()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn capture_active(&self) -> bool {
        self.capture.is_some()
    }

    /// Begin recording into `seq`; a repeat of `trigger` ends the capture.
    pub fn begin_capture(&mut self, seq: SeqRef, trigger: u8) {
        self.capture = Some(Capture {
            seq,
            trigger,
            held: Vec::new(),
            forced: false,
        });
    }

    /// Ignore the trigger pitch; the capture will be closed explicitly.
    pub fn force_capture(&mut self) {
        if let Some(capture) = &mut self.capture {
            capture.forced = true;
        }
    }

    /// Mark the captured sequence complete and reset the parser.
    pub fn close_capture(&mut self) {
        if let Some(capture) = &self.capture {
            capture
                .seq
                .lock()
                .expect("sequence lock poisoned")
                .mark_complete();
        }
        self.clear();
    }

    pub fn clear(&mut self) {
        self.cst.reset();
        self.pending = None;
        self.ief_code = IefCode::Default;
        self.active = [false; N_MIDI_NOTES];
        self.active_count = 0;
        self.capture = None;
        self.prev_note_on_tick = 0;
        self.prev_event_tick = 0;
    }

    /// Feed one decoded message; `tick` is nanoseconds for live input and
    /// file ticks for SMF input.
    pub fn process_msg(&mut self, msg: MidiMsg, tick: i64) {
        match msg {
            MidiMsg::NoteOn { key, vel } => self.note_on(key, vel, tick),
            MidiMsg::NoteOff { key } => self.note_off(key, tick),
            MidiMsg::Extension(code) => self.ief_code = code,
        }
    }

    pub fn note_on(&mut self, note: u8, vel: u8, tick: i64) {
        let note = note & 0x7f;
        if self.active[note as usize] {
            return;
        }
        self.active[note as usize] = true;
        self.active_count += 1;

        if self.capture.is_some() {
            self.capture_note_on(note, vel, tick);
            return;
        }

        self.cst.note_on(note);
    }

    pub fn note_off(&mut self, note: u8, tick: i64) {
        let note = note & 0x7f;
        if !self.active[note as usize] {
            return;
        }
        self.active[note as usize] = false;
        self.active_count -= 1;

        if self.capture.is_some() {
            self.capture_note_off(note, tick);
            return;
        }

        self.cst.note_off(note);

        if self.active_count == 0 {
            let mut ast = Ast::from_cst(&self.cst);
            ast.ief_code = self.ief_code;
            self.pending = Some(ast);
        }
    }

    fn ticks_per_input_unit(&self) -> f64 {
        1.0 / 1_000_000_000.0 / 60.0 * self.tempo as f64 * self.ppq as f64
    }

    fn capture_note_on(&mut self, note: u8, vel: u8, tick: i64) {
        let ns_to_ticks = self.ticks_per_input_unit();
        let capture = self.capture.as_mut().expect("no active capture");
        let mut seq = capture.seq.lock().expect("sequence lock poisoned");

        let hold = ((tick - self.prev_event_tick) as f64 * ns_to_ticks) as i64;
        for &idx in &capture.held {
            seq.note_hold(idx, hold);
        }

        if note == capture.trigger && !capture.forced {
            drop(seq);
            self.close_capture();
            return;
        }

        let wait = if seq.is_empty() {
            0
        } else {
            ((tick - self.prev_note_on_tick) as f64 * ns_to_ticks) as i64
        };
        seq.note_on(note, vel, wait);
        let idx = seq.len() - 1;
        capture.held.push(idx);

        self.prev_note_on_tick = tick;
        self.prev_event_tick = tick;
    }

    fn capture_note_off(&mut self, note: u8, tick: i64) {
        let ns_to_ticks = self.ticks_per_input_unit();
        let capture = self.capture.as_mut().expect("no active capture");
        let mut seq = capture.seq.lock().expect("sequence lock poisoned");

        let hold = ((tick - self.prev_event_tick) as f64 * ns_to_ticks) as i64;
        capture.held.retain(|&idx| {
            seq.note_hold(idx, hold);
            match seq.at(idx) {
                Ok(n) => n.pitch != note,
                Err(_) => false,
            }
        });

        self.prev_event_tick = tick;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::ast::SyntaxKind;
    use crate::value::{new_seq, Sequence};

    const MS: i64 = 1_000_000; // nanoseconds

    fn on(key: u8) -> MidiMsg {
        MidiMsg::NoteOn { key, vel: 100 }
    }

    fn off(key: u8) -> MidiMsg {
        MidiMsg::NoteOff { key }
    }

    #[test]
    fn phrase_pends_when_all_notes_released() {
        let mut p = SyntaxParser::new();
        p.process_msg(on(60), 0);
        assert!(!p.has_pending());
        p.process_msg(on(64), 10);
        p.process_msg(on(67), 20);
        p.process_msg(off(67), 30);
        p.process_msg(off(64), 40);
        assert!(!p.has_pending());
        p.process_msg(off(60), 50);
        let ast = p.take_pending().unwrap();
        assert_eq!(ast.root().unwrap().kind, SyntaxKind::FunctionDef);
    }

    #[test]
    fn duplicate_note_on_is_ignored() {
        let mut p = SyntaxParser::new();
        p.process_msg(on(60), 0);
        p.process_msg(on(60), 1);
        p.process_msg(off(60), 2);
        assert!(p.has_pending());
    }

    #[test]
    fn sysex_stamps_pending_ast() {
        let mut p = SyntaxParser::new();
        p.process_msg(MidiMsg::Extension(IefCode::Sleep), 0);
        p.process_msg(on(60), 0);
        p.process_msg(off(60), 10);
        let ast = p.take_pending().unwrap();
        assert_eq!(ast.ief_code, IefCode::Sleep);
    }

    #[test]
    fn capture_records_notes_until_trigger_repeats() {
        let mut p = SyntaxParser::new();
        let seq = new_seq(Sequence::pending());
        p.begin_capture(seq.clone(), 40);

        // 120 bpm, 960 ppq: one beat is 500 ms and 960 ticks.
        p.process_msg(on(60), 0);
        p.process_msg(off(60), 250 * MS);
        p.process_msg(on(62), 500 * MS);
        p.process_msg(off(62), 750 * MS);
        assert!(p.capture_active());

        p.process_msg(on(40), 1000 * MS);
        assert!(!p.capture_active());

        let s = seq.lock().unwrap();
        assert!(s.is_complete());
        assert_eq!(s.len(), 2);
        let a = s.at(0).unwrap();
        let b = s.at(1).unwrap();
        assert_eq!(a.pitch, 60);
        assert_eq!(a.wait, 0);
        assert_eq!(a.duration, 480); // 250 ms at 120 bpm / 960 ppq
        assert_eq!(b.pitch, 62);
        assert_eq!(b.wait, 960); // 500 ms between note-ons
    }

    #[test]
    fn forced_capture_ignores_trigger() {
        let mut p = SyntaxParser::new();
        let seq = new_seq(Sequence::pending());
        p.begin_capture(seq.clone(), 40);
        p.force_capture();

        p.process_msg(on(40), 0);
        p.process_msg(off(40), 100 * MS);
        assert!(p.capture_active());
        p.close_capture();

        let s = seq.lock().unwrap();
        assert!(s.is_complete());
        assert_eq!(s.len(), 1);
        assert_eq!(s.at(0).unwrap().pitch, 40);
    }

    #[test]
    fn capture_tracks_overlapping_holds() {
        let mut p = SyntaxParser::new();
        let seq = new_seq(Sequence::pending());
        p.begin_capture(seq.clone(), 30);

        p.process_msg(on(60), 0);
        p.process_msg(on(64), 250 * MS);
        p.process_msg(off(60), 500 * MS);
        p.process_msg(off(64), 750 * MS);
        p.process_msg(on(30), 1000 * MS);

        let s = seq.lock().unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.at(0).unwrap().duration, 960); // held 500 ms
        assert_eq!(s.at(1).unwrap().duration, 960); // held 250..750 ms
    }
}
