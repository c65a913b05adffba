//! The note record — the element type of every [`Sequence`](super::Sequence).
//!
//! All field arithmetic wraps at the field width; durations and waits are in
//! ticks, converted to wall-clock time only at the scheduler boundary.

/// Attribute selector for projected operations.
///
/// `All` means the operation touches every field; the named selectors pick a
/// single field, independently on each side of a binary operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Attr {
    #[default]
    All,
    Pitch,
    Velocity,
    Duration,
    Wait,
}

impl Attr {
    pub fn name(self) -> &'static str {
        match self {
            Attr::All => "ALL",
            Attr::Pitch => "PITCH",
            Attr::Velocity => "VELOCITY",
            Attr::Duration => "DURATION",
            Attr::Wait => "WAIT",
        }
    }
}

/// A single note event.
///
/// `wait` is the tick delay since the previous note-on in the sequence,
/// `duration` the held length in ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub duration: i32,
    pub wait: i32,
}

impl Note {
    pub const ZERO: Note = Note {
        pitch: 0,
        velocity: 0,
        duration: 0,
        wait: 0,
    };

    /// Read the named field, widened to `i64`.
    ///
    /// `attr` must be a concrete selector, never `All`.
    pub fn get(&self, attr: Attr) -> i64 {
        match attr {
            Attr::Pitch => self.pitch as i64,
            Attr::Velocity => self.velocity as i64,
            Attr::Duration => self.duration as i64,
            Attr::Wait => self.wait as i64,
            Attr::All => 0,
        }
    }

    /// Write the named field, truncating to the field width (wrapping).
    pub fn set(&mut self, attr: Attr, value: i64) {
        match attr {
            Attr::Pitch => self.pitch = value as u8,
            Attr::Velocity => self.velocity = value as u8,
            Attr::Duration => self.duration = value as i32,
            Attr::Wait => self.wait = value as i32,
            Attr::All => {}
        }
    }

    pub fn add_assign(&mut self, rhs: &Note) {
        self.pitch = self.pitch.wrapping_add(rhs.pitch);
        self.velocity = self.velocity.wrapping_add(rhs.velocity);
        self.duration = self.duration.wrapping_add(rhs.duration);
        self.wait = self.wait.wrapping_add(rhs.wait);
    }

    pub fn sub_assign(&mut self, rhs: &Note) {
        self.pitch = self.pitch.wrapping_sub(rhs.pitch);
        self.velocity = self.velocity.wrapping_sub(rhs.velocity);
        self.duration = self.duration.wrapping_sub(rhs.duration);
        self.wait = self.wait.wrapping_sub(rhs.wait);
    }

    pub fn mul_assign(&mut self, rhs: &Note) {
        self.pitch = self.pitch.wrapping_mul(rhs.pitch);
        self.velocity = self.velocity.wrapping_mul(rhs.velocity);
        self.duration = self.duration.wrapping_mul(rhs.duration);
        self.wait = self.wait.wrapping_mul(rhs.wait);
    }

    /// Field-wise division. Fails on any zero divisor field.
    pub fn div_assign(&mut self, rhs: &Note) -> Result<(), ()> {
        if rhs.pitch == 0 || rhs.velocity == 0 || rhs.duration == 0 || rhs.wait == 0 {
            return Err(());
        }
        self.pitch /= rhs.pitch;
        self.velocity /= rhs.velocity;
        self.duration = self.duration.wrapping_div(rhs.duration);
        self.wait = self.wait.wrapping_div(rhs.wait);
        Ok(())
    }
}
