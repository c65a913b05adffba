//! MIDI plumbing: raw message decoding, port discovery through midir, and
//! Standard MIDI File loading through midly.

use std::fs;
use std::path::{Path, PathBuf};

use midir::{MidiInput, MidiOutput};

/// Identifier byte of the vendor SysEx that carries extension op-codes:
/// `F0 4D <op> F7`.
pub const SYSEX_ID: u8 = 0x4d;

/// Extension op-codes delivered over vendor SysEx. Stamped on the phrase
/// being parsed and stored on the receiving scope; they override the
/// meaning of the root-interval operation when a phrase runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IefCode {
    #[default]
    Default,
    Play,
    NoteOn,
    NoteOff,
    Sleep,
    Print,
    Printd,
    Recording,
    Random,
}

impl IefCode {
    pub fn from_byte(byte: u8) -> IefCode {
        match byte {
            0x21 => IefCode::Play,
            0x22 => IefCode::NoteOn,
            0x23 => IefCode::NoteOff,
            0x24 => IefCode::Sleep,
            0x25 => IefCode::Print,
            0x26 => IefCode::Printd,
            0x27 => IefCode::Recording,
            0x28 => IefCode::Random,
            _ => IefCode::Default,
        }
    }
}

/// A decoded input message. Note-ons with velocity zero arrive as
/// [`MidiMsg::NoteOff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMsg {
    NoteOn { key: u8, vel: u8 },
    NoteOff { key: u8 },
    Extension(IefCode),
}

impl MidiMsg {
    /// Decode a raw wire message; returns `None` for everything the
    /// interpreter does not consume.
    pub fn decode(bytes: &[u8]) -> Option<MidiMsg> {
        match bytes {
            [status, key, vel, ..] if status & 0xf0 == 0x90 => {
                let (key, vel) = (key & 0x7f, vel & 0x7f);
                Some(if vel == 0 {
                    MidiMsg::NoteOff { key }
                } else {
                    MidiMsg::NoteOn { key, vel }
                })
            }
            [status, key, ..] if status & 0xf0 == 0x80 => Some(MidiMsg::NoteOff { key: key & 0x7f }),
            [0xf0, id, op, ..] if *id == SYSEX_ID => {
                Some(MidiMsg::Extension(IefCode::from_byte(*op)))
            }
            _ => None,
        }
    }
}

/// Names of the available input ports, sorted.
pub fn input_port_names() -> Vec<String> {
    let Ok(input) = MidiInput::new("mddl-ports") else {
        return Vec::new();
    };
    let mut names: Vec<String> = input
        .ports()
        .iter()
        .filter_map(|p| input.port_name(p).ok())
        .collect();
    names.sort();
    names
}

/// Names of the available output ports, sorted.
pub fn output_port_names() -> Vec<String> {
    let Ok(output) = MidiOutput::new("mddl-ports") else {
        return Vec::new();
    };
    let mut names: Vec<String> = output
        .ports()
        .iter()
        .filter_map(|p| output.port_name(p).ok())
        .collect();
    names.sort();
    names
}

pub fn print_ports() {
    let inputs = input_port_names();
    if inputs.is_empty() {
        println!("No input ports available.");
    } else {
        println!("Input ports:");
        for (i, name) in inputs.iter().enumerate() {
            println!("{i} - {name}");
        }
    }

    println!();

    let outputs = output_port_names();
    if outputs.is_empty() {
        println!("No output ports available.");
    } else {
        println!("Output ports:");
        for (i, name) in outputs.iter().enumerate() {
            println!("{i} - {name}");
        }
    }
}

/// A decoded file event with its absolute tick position inside its track.
#[derive(Debug, Clone, Copy)]
pub struct FileEvent {
    pub msg: MidiMsg,
    pub tick: i64,
}

/// A Standard MIDI File reduced to what the interpreter consumes: pulses
/// per quarter note and the note/SysEx stream of each track.
#[derive(Debug)]
pub struct MidiFile {
    pub ppq: i64,
    pub tracks: Vec<Vec<FileEvent>>,
}

impl MidiFile {
    pub fn load(path: &Path) -> Result<MidiFile, String> {
        let bytes =
            fs::read(path).map_err(|e| format!("could not read {}: {e}", path.display()))?;
        let smf = midly::Smf::parse(&bytes)
            .map_err(|e| format!("could not parse {}: {e}", path.display()))?;

        let ppq = match smf.header.timing {
            midly::Timing::Metrical(t) => t.as_int() as i64,
            midly::Timing::Timecode(fps, sub) => (fps.as_f32() * sub as f32) as i64,
        };

        let mut tracks = Vec::new();
        for track in &smf.tracks {
            let mut events = Vec::new();
            let mut tick: i64 = 0;
            for event in track {
                tick += event.delta.as_int() as i64;
                let msg = match event.kind {
                    midly::TrackEventKind::Midi { message, .. } => match message {
                        midly::MidiMessage::NoteOn { key, vel } => {
                            let (key, vel) = (key.as_int(), vel.as_int());
                            Some(if vel == 0 {
                                MidiMsg::NoteOff { key }
                            } else {
                                MidiMsg::NoteOn { key, vel }
                            })
                        }
                        midly::MidiMessage::NoteOff { key, .. } => Some(MidiMsg::NoteOff {
                            key: key.as_int(),
                        }),
                        _ => None,
                    },
                    midly::TrackEventKind::SysEx(data) => match data {
                        [id, op, ..] if *id == SYSEX_ID => {
                            Some(MidiMsg::Extension(IefCode::from_byte(*op)))
                        }
                        _ => None,
                    },
                    _ => None,
                };
                if let Some(msg) = msg {
                    events.push(FileEvent { msg, tick });
                }
            }
            tracks.push(events);
        }

        Ok(MidiFile { ppq, tracks })
    }
}

/// Resolve a program file: first relative to the working directory, then
/// against `./lib/`.
pub fn find_file(name: &str) -> Option<PathBuf> {
    let direct = PathBuf::from(name);
    if direct.exists() {
        return Some(direct);
    }
    let lib = Path::new("lib").join(name);
    if lib.exists() {
        return Some(lib);
    }
    None
}
