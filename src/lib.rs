//! mddl — a live-coded language whose source text is a MIDI performance.
//!
//! A performer plays chords, melodic runs, and staccato clusters; the
//! interpreter parses the note stream into phrases, binds them into an
//! executable program, evaluates each phrase over compressible note
//! sequences, and schedules the audible results back out as MIDI.

pub mod error;
pub mod interpreter;
pub mod midi;
pub mod printer;
pub mod program;
pub mod runtime;
pub mod scheduler;
pub mod syntax;
pub mod value;
