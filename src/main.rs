//! Command-line entry point.
//!
//! Reads MIDI program files, optionally attaches to live MIDI ports, and
//! either translates, times, or interprets the input. With an input port
//! attached the interpreter stays in its REPL until interrupted.

use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;

use clap::Parser;
use midir::{MidiInput, MidiOutput, MidiOutputConnection};

use mddl::interpreter::{Interpreter, MsgSender, TimedMsg};
use mddl::midi::{self, MidiFile, MidiMsg};
use mddl::syntax::parser::{DEFAULT_PPQ, DEFAULT_TEMPO};

const CLIENT_NAME: &str = "mddl";
const MIDI_CHANNEL: u8 = 0;

#[derive(Parser)]
#[command(
    name = "mddl",
    about = "MIDI Dynamic Development Language",
    disable_version_flag = true
)]
struct Cli {
    /// MIDI files to be used as input.
    files: Vec<String>,

    /// Input MIDI port enumeration.
    #[arg(short = 'i', long = "input", value_name = "PORT")]
    input: Option<usize>,

    /// Output MIDI port enumeration.
    #[arg(short = 'o', long = "output", value_name = "PORT")]
    output: Option<usize>,

    /// List all available MIDI ports.
    #[arg(long)]
    ports: bool,

    /// Print the text translation of the input files without executing.
    #[arg(long)]
    translate: bool,

    /// Time input files.
    #[arg(long)]
    time: bool,

    /// Mute all output.
    #[arg(short, long)]
    quiet: bool,

    /// Print the interpreter version.
    #[arg(long)]
    version: bool,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Unrecognized arguments print usage and exit cleanly.
            let _ = err.print();
            exit(0);
        }
    };

    if cli.version {
        println!("mddl v{}", env!("CARGO_PKG_VERSION"));
        exit(0);
    }

    if cli.ports {
        midi::print_ports();
        exit(0);
    }

    let (tx, rx) = mpsc::channel::<TimedMsg>();
    let mut interpreter = Interpreter::new(rx, DEFAULT_TEMPO, DEFAULT_PPQ);
    interpreter.set_quiet(cli.quiet);

    match cli.output.map(open_output) {
        Some(mut conn) => {
            all_notes_off(&mut conn);
            interpreter.launch_scheduler(Box::new(move |pitch, vel| {
                let status = if vel > 0 { 0x90 } else { 0x80 };
                let _ = conn.send(&[status | MIDI_CHANNEL, pitch, vel]);
            }));
        }
        None => interpreter.launch_scheduler(Box::new(|_, _| {})),
    }

    let start_clock = Instant::now();

    for name in &cli.files {
        let Some(path) = midi::find_file(name) else {
            println!("Could not find {name}.");
            exit(0);
        };
        match MidiFile::load(&path) {
            Ok(file) => interpreter.read_file(&file),
            Err(err) => {
                println!("{err}");
                exit(0);
            }
        }
    }

    if cli.translate {
        interpreter.print_program();
        exit(0);
    }

    let run_clock = Instant::now();
    interpreter.run_head();

    if cli.time {
        interpreter.join_exec();
        interpreter.shutdown();
        println!("Run Time: {:.3}s", run_clock.elapsed().as_secs_f32());
        println!("Total Time: {:.3}s", start_clock.elapsed().as_secs_f32());
        exit(0);
    }

    let Some(input_idx) = cli.input else {
        // No live input: let the file program finish and drain the
        // scheduler.
        interpreter.shutdown();
        return;
    };

    // Keep the connection alive for the whole REPL session.
    let _input_conn = open_input(input_idx, tx);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    if let Err(err) = ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    }) {
        eprintln!("warning: could not install interrupt handler: {err}");
    }

    if !cli.quiet {
        println!("Welcome to mddl v{}", env!("CARGO_PKG_VERSION"));
    }
    interpreter.listen(&stop);
    interpreter.shutdown();
}

fn open_input(idx: usize, tx: MsgSender) -> midir::MidiInputConnection<()> {
    let midi_in = match MidiInput::new(CLIENT_NAME) {
        Ok(m) => m,
        Err(err) => {
            println!("Could not initialize MIDI input: {err}");
            exit(0);
        }
    };

    let mut ports: Vec<_> = midi_in
        .ports()
        .into_iter()
        .map(|p| {
            let name = midi_in.port_name(&p).unwrap_or_default();
            (name, p)
        })
        .collect();
    ports.sort_by(|a, b| a.0.cmp(&b.0));

    let Some((name, port)) = ports.into_iter().nth(idx) else {
        println!("Error: Invalid input port. Use enumeration below:");
        midi::print_ports();
        exit(0);
    };

    match midi_in.connect(
        &port,
        CLIENT_NAME,
        move |timestamp_us, bytes, _| {
            if let Some(msg) = MidiMsg::decode(bytes) {
                let _ = tx.send(TimedMsg {
                    msg,
                    tick: timestamp_us as i64 * 1_000,
                });
            }
        },
        (),
    ) {
        Ok(conn) => conn,
        Err(_) => {
            println!("Could not connect to input port \"{name}\".");
            exit(0);
        }
    }
}

fn open_output(idx: usize) -> MidiOutputConnection {
    let midi_out = match MidiOutput::new(CLIENT_NAME) {
        Ok(m) => m,
        Err(err) => {
            println!("Could not initialize MIDI output: {err}");
            exit(0);
        }
    };

    let mut ports: Vec<_> = midi_out
        .ports()
        .into_iter()
        .map(|p| {
            let name = midi_out.port_name(&p).unwrap_or_default();
            (name, p)
        })
        .collect();
    ports.sort_by(|a, b| a.0.cmp(&b.0));

    let Some((name, port)) = ports.into_iter().nth(idx) else {
        println!("Error: Invalid output port. Use enumeration below:");
        midi::print_ports();
        exit(0);
    };

    match midi_out.connect(&port, CLIENT_NAME) {
        Ok(conn) => conn,
        Err(_) => {
            println!("Could not connect to output port \"{name}\".");
            exit(0);
        }
    }
}

/// Silence everything on startup: all-notes-off plus a per-key sweep.
fn all_notes_off(conn: &mut MidiOutputConnection) {
    let _ = conn.send(&[0xb0 | MIDI_CHANNEL, 123, 0]);
    for key in 0..128u8 {
        let _ = conn.send(&[0x80 | MIDI_CHANNEL, key, 0]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["mddl"]).unwrap();
        assert!(cli.files.is_empty());
        assert!(cli.input.is_none());
        assert!(!cli.translate);
    }

    #[test]
    fn cli_files_and_ports() {
        let cli = Cli::try_parse_from(["mddl", "a.mid", "b.mid", "-i", "1", "-o", "2"]).unwrap();
        assert_eq!(cli.files, vec!["a.mid", "b.mid"]);
        assert_eq!(cli.input, Some(1));
        assert_eq!(cli.output, Some(2));
    }

    #[test]
    fn cli_flags() {
        let cli = Cli::try_parse_from(["mddl", "--translate", "--time", "-q"]).unwrap();
        assert!(cli.translate);
        assert!(cli.time);
        assert!(cli.quiet);
    }

    #[test]
    fn cli_rejects_unknown_flag() {
        assert!(Cli::try_parse_from(["mddl", "--definitely-unknown"]).is_err());
    }
}
