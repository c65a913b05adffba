//! Compressible note sequences.
//!
//! A [`Sequence`] is either *compressed* — a single prototype [`Note`]
//! repeated `size` times — or *expanded* into a dense vector. Every mutating
//! operation first decides whether it can stay on the compressed prototype;
//! only when element identity would break does it expand. This keeps scalar
//! updates on large uniform sequences O(1).
//!
//! All operations act on a window `[start, start + len)`; binary operations
//! take an independent window on the right-hand side. Callers are
//! responsible for validating windows against user input before calling in.

use crate::error::{EvalError, DIV_ZERO_ERR, EMPTY_VALUE_ERR};

use super::note::{Attr, Note};

/// Round-trip an `i64` through the named field's width, reproducing the
/// truncation a write to that field would perform.
fn cast_attr(attr: Attr, value: i64) -> i64 {
    let mut n = Note::ZERO;
    n.set(attr, value);
    n.get(attr)
}

#[derive(Debug, Default)]
pub struct Sequence {
    data: Vec<Note>,
    comp: Note,
    size: i64,
    compressed: bool,
    complete: bool,
}

impl Sequence {
    /// An empty, complete sequence.
    pub fn new() -> Self {
        Self::with_size(0)
    }

    /// A compressed run of `size` zero notes — the canonical empty
    /// representation for any length.
    pub fn with_size(size: i64) -> Self {
        Self {
            data: Vec::new(),
            comp: Note::ZERO,
            size: size.max(0),
            compressed: true,
            complete: true,
        }
    }

    /// A compressed run of `size` copies of `note`.
    pub fn repeated(note: Note, size: i64) -> Self {
        Self {
            data: Vec::new(),
            comp: note,
            size: size.max(0),
            compressed: true,
            complete: true,
        }
    }

    /// An empty sequence still being captured from the live stream.
    pub fn pending() -> Self {
        Self {
            complete: false,
            ..Self::new()
        }
    }

    /// Copy of a window of `rhs`.
    pub fn from_window(rhs: &Sequence, start: i64, len: i64) -> Self {
        if rhs.compressed {
            Self::repeated(rhs.comp, len)
        } else {
            let start = start.max(0) as usize;
            let end = (start + len.max(0) as usize).min(rhs.data.len());
            Self {
                data: rhs.data[start..end].to_vec(),
                comp: Note::ZERO,
                size: len.max(0),
                compressed: false,
                complete: true,
            }
        }
    }

    pub fn len(&self) -> i64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn prototype(&self) -> &Note {
        &self.comp
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Once set, `complete` never reverts.
    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Append a note-on captured from the live stream.
    pub fn note_on(&mut self, pitch: u8, velocity: u8, wait: i64) {
        if self.compressed {
            self.expand();
        }
        self.data.push(Note {
            pitch,
            velocity,
            duration: 0,
            wait: wait as i32,
        });
        self.size += 1;
    }

    /// Extend the duration of a captured note while it is held.
    pub fn note_hold(&mut self, idx: i64, duration: i64) {
        if let Some(n) = self.data.get_mut(idx as usize) {
            n.duration = n.duration.wrapping_add(duration as i32);
        }
    }

    pub fn at(&self, idx: i64) -> Result<Note, EvalError> {
        if idx < 0 || idx >= self.size {
            return Err(EvalError::system("Sequence bounds error."));
        }
        Ok(if self.compressed {
            self.comp
        } else {
            self.data[idx as usize]
        })
    }

    fn expand(&mut self) {
        self.data = vec![self.comp; self.size.max(0) as usize];
        self.compressed = false;
    }

    /// Dense element vector, materializing the prototype if compressed.
    pub fn expanded(&self) -> Vec<Note> {
        if self.compressed {
            vec![self.comp; self.size.max(0) as usize]
        } else {
            self.data.clone()
        }
    }

    /// Iterate a window's notes by value.
    pub fn iter_window(&self, start: i64, len: i64) -> impl Iterator<Item = Note> + '_ {
        let start = start.max(0) as usize;
        let len = len.max(0) as usize;
        (0..len).map(move |i| {
            if self.compressed {
                self.comp
            } else {
                self.data[start + i]
            }
        })
    }

    /// Set the length to `end` (clamped at zero): truncate on shrink, pad
    /// with zero notes on grow.
    pub fn resize(&mut self, end: i64) {
        let end = end.max(0);
        if end < self.size {
            self.size = end;
            if self.compressed {
                return;
            }
            self.data.truncate(end as usize);
            return;
        }

        if self.compressed {
            if self.comp == Note::ZERO {
                self.size = end;
                return;
            }
            self.expand();
        }

        self.size = end;
        self.data.resize(end as usize, Note::ZERO);
    }

    /// Grow to at least `end`; never shrinks.
    pub fn expect(&mut self, end: i64) {
        if end < self.size {
            return;
        }
        self.resize(end);
    }

    /// Grow by `len` zero notes.
    pub fn extend(&mut self, len: i64) {
        self.resize(self.size + len);
    }

    /// Destructively narrow to `[start, start + len)`.
    pub fn crop(&mut self, start: i64, len: i64) {
        self.size = len;
        if self.compressed {
            return;
        }
        self.data.truncate((start + len).max(0) as usize);
        self.data.drain(..start.max(0) as usize);
    }

    /// Keep only the named attribute in each element, zeroing the rest.
    pub fn mask(&mut self, attr: Attr) {
        if self.compressed {
            let mut masked = Note::ZERO;
            masked.set(attr, self.comp.get(attr));
            self.comp = masked;
            return;
        }
        for n in &mut self.data {
            let mut masked = Note::ZERO;
            masked.set(attr, n.get(attr));
            *n = masked;
        }
    }

    /// First element's pitch.
    pub fn value(&self) -> Result<i64, EvalError> {
        self.value_attr(Attr::Pitch)
    }

    /// First element's named attribute.
    pub fn value_attr(&self, attr: Attr) -> Result<i64, EvalError> {
        if !self.compressed && self.data.is_empty() {
            return Err(EvalError::runtime(EMPTY_VALUE_ERR));
        }
        Ok(if self.compressed {
            self.comp.get(attr)
        } else {
            self.data[0].get(attr)
        })
    }

    // ---- assignment ----

    pub fn assign(&mut self, start: i64, rhs: &Sequence, rhs_start: i64, len: i64) {
        if self.compressed {
            if rhs.compressed && self.comp == rhs.comp && self.size == len {
                return;
            }
            self.expand();
        }

        let wr = window_mut(&mut self.data, start, len);
        if rhs.compressed {
            wr.fill(rhs.comp);
        } else {
            wr.copy_from_slice(window(&rhs.data, rhs_start, len));
        }
    }

    pub fn assign_attr(
        &mut self,
        attr: Attr,
        rhs_attr: Attr,
        start: i64,
        rhs: &Sequence,
        rhs_start: i64,
        len: i64,
    ) {
        let m = cast_attr(attr, rhs.comp.get(rhs_attr));
        if self.compressed {
            if rhs.compressed && self.comp.get(attr) == m && self.size == len {
                return;
            }
            self.expand();
        }

        let wr = window_mut(&mut self.data, start, len);
        if rhs.compressed {
            for n in wr {
                n.set(attr, m);
            }
        } else {
            let rd = window(&rhs.data, rhs_start, len);
            for (n, r) in wr.iter_mut().zip(rd) {
                n.set(attr, r.get(rhs_attr));
            }
        }
    }

    pub fn assign_value(&mut self, attr: Attr, start: i64, len: i64, value: i64) {
        let m = cast_attr(attr, value);
        if self.compressed {
            if self.comp.get(attr) == m {
                return;
            }
            if self.size == len {
                self.comp.set(attr, value);
                return;
            }
            self.expand();
        }

        for n in window_mut(&mut self.data, start, len) {
            n.set(attr, value);
        }
    }

    // ---- concatenation ----

    pub fn concat(&mut self, rhs: &Sequence, rhs_start: i64, rhs_len: i64) {
        if self.compressed {
            if rhs.compressed && self.comp == rhs.comp {
                self.size += rhs_len;
                return;
            }
            self.expand();
        }

        self.size += rhs_len;
        self.data.reserve(rhs_len.max(0) as usize);
        if rhs.compressed {
            for _ in 0..rhs_len {
                self.data.push(rhs.comp);
            }
        } else {
            self.data
                .extend_from_slice(window(&rhs.data, rhs_start, rhs_len));
        }
    }

    pub fn concat_attr(
        &mut self,
        attr: Attr,
        rhs_attr: Attr,
        rhs: &Sequence,
        rhs_start: i64,
        rhs_len: i64,
    ) {
        let m = cast_attr(attr, rhs.comp.get(rhs_attr));
        if self.compressed {
            if rhs.compressed && self.comp == masked(attr, m) {
                self.size += rhs_len;
                return;
            }
            self.expand();
        }

        self.size += rhs_len;
        self.data.reserve(rhs_len.max(0) as usize);
        if rhs.compressed {
            for _ in 0..rhs_len {
                self.data.push(masked(attr, m));
            }
        } else {
            for r in window(&rhs.data, rhs_start, rhs_len) {
                self.data.push(masked(attr, r.get(rhs_attr)));
            }
        }
    }

    // ---- element-wise arithmetic ----

    pub fn add(&mut self, start: i64, rhs: &Sequence, rhs_start: i64, len: i64) {
        if rhs.compressed && rhs.comp == Note::ZERO {
            return;
        }
        if self.compressed {
            if rhs.compressed && self.size == len {
                self.comp.add_assign(&rhs.comp);
                return;
            }
            self.expand();
        }

        let wr = window_mut(&mut self.data, start, len);
        if rhs.compressed {
            for n in wr {
                n.add_assign(&rhs.comp);
            }
        } else {
            for (n, r) in wr.iter_mut().zip(window(&rhs.data, rhs_start, len)) {
                n.add_assign(r);
            }
        }
    }

    pub fn subtract(&mut self, start: i64, rhs: &Sequence, rhs_start: i64, len: i64) {
        if rhs.compressed && rhs.comp == Note::ZERO {
            return;
        }
        if self.compressed {
            if rhs.compressed && self.size == len {
                self.comp.sub_assign(&rhs.comp);
                return;
            }
            self.expand();
        }

        let wr = window_mut(&mut self.data, start, len);
        if rhs.compressed {
            for n in wr {
                n.sub_assign(&rhs.comp);
            }
        } else {
            for (n, r) in wr.iter_mut().zip(window(&rhs.data, rhs_start, len)) {
                n.sub_assign(r);
            }
        }
    }

    pub fn multiply(&mut self, start: i64, rhs: &Sequence, rhs_start: i64, len: i64) {
        if rhs.compressed && rhs.comp == NOTE_ONES {
            return;
        }
        if self.compressed {
            if rhs.compressed && self.size == len {
                self.comp.mul_assign(&rhs.comp);
                return;
            }
            self.expand();
        }

        let wr = window_mut(&mut self.data, start, len);
        if rhs.compressed {
            for n in wr {
                n.mul_assign(&rhs.comp);
            }
        } else {
            for (n, r) in wr.iter_mut().zip(window(&rhs.data, rhs_start, len)) {
                n.mul_assign(r);
            }
        }
    }

    pub fn divide(
        &mut self,
        start: i64,
        rhs: &Sequence,
        rhs_start: i64,
        len: i64,
    ) -> Result<(), EvalError> {
        if rhs.compressed && rhs.comp == NOTE_ONES {
            return Ok(());
        }
        if self.compressed {
            if rhs.compressed && self.size == len {
                return self
                    .comp
                    .div_assign(&rhs.comp)
                    .map_err(|_| EvalError::runtime(DIV_ZERO_ERR));
            }
            self.expand();
        }

        let wr = window_mut(&mut self.data, start, len);
        if rhs.compressed {
            for n in wr {
                n.div_assign(&rhs.comp)
                    .map_err(|_| EvalError::runtime(DIV_ZERO_ERR))?;
            }
        } else {
            for (n, r) in wr.iter_mut().zip(window(&rhs.data, rhs_start, len)) {
                n.div_assign(r)
                    .map_err(|_| EvalError::runtime(DIV_ZERO_ERR))?;
            }
        }
        Ok(())
    }

    // ---- attribute-projected arithmetic ----

    pub fn add_attr(
        &mut self,
        attr: Attr,
        rhs_attr: Attr,
        start: i64,
        rhs: &Sequence,
        rhs_start: i64,
        len: i64,
    ) {
        let m = cast_attr(attr, rhs.comp.get(rhs_attr));
        if rhs.compressed && m == 0 {
            return;
        }
        if self.compressed {
            if rhs.compressed && self.size == len {
                self.comp.set(attr, self.comp.get(attr) + m);
                return;
            }
            self.expand();
        }

        let wr = window_mut(&mut self.data, start, len);
        if rhs.compressed {
            for n in wr {
                n.set(attr, n.get(attr) + m);
            }
        } else {
            for (n, r) in wr.iter_mut().zip(window(&rhs.data, rhs_start, len)) {
                n.set(attr, n.get(attr) + cast_attr(attr, r.get(rhs_attr)));
            }
        }
    }

    pub fn subtract_attr(
        &mut self,
        attr: Attr,
        rhs_attr: Attr,
        start: i64,
        rhs: &Sequence,
        rhs_start: i64,
        len: i64,
    ) {
        let m = cast_attr(attr, rhs.comp.get(rhs_attr));
        if rhs.compressed && m == 0 {
            return;
        }
        if self.compressed {
            if rhs.compressed && self.size == len {
                self.comp.set(attr, self.comp.get(attr) - m);
                return;
            }
            self.expand();
        }

        let wr = window_mut(&mut self.data, start, len);
        if rhs.compressed {
            for n in wr {
                n.set(attr, n.get(attr) - m);
            }
        } else {
            for (n, r) in wr.iter_mut().zip(window(&rhs.data, rhs_start, len)) {
                n.set(attr, n.get(attr) - cast_attr(attr, r.get(rhs_attr)));
            }
        }
    }

    pub fn multiply_attr(
        &mut self,
        attr: Attr,
        rhs_attr: Attr,
        start: i64,
        rhs: &Sequence,
        rhs_start: i64,
        len: i64,
    ) {
        let m = cast_attr(attr, rhs.comp.get(rhs_attr));
        if rhs.compressed && m == 1 {
            return;
        }
        if self.compressed {
            if rhs.compressed && self.size == len {
                self.comp.set(attr, self.comp.get(attr) * m);
                return;
            }
            self.expand();
        }

        let wr = window_mut(&mut self.data, start, len);
        if rhs.compressed {
            for n in wr {
                n.set(attr, n.get(attr) * m);
            }
        } else {
            for (n, r) in wr.iter_mut().zip(window(&rhs.data, rhs_start, len)) {
                n.set(attr, n.get(attr) * cast_attr(attr, r.get(rhs_attr)));
            }
        }
    }

    pub fn divide_attr(
        &mut self,
        attr: Attr,
        rhs_attr: Attr,
        start: i64,
        rhs: &Sequence,
        rhs_start: i64,
        len: i64,
    ) -> Result<(), EvalError> {
        let m = cast_attr(attr, rhs.comp.get(rhs_attr));
        if rhs.compressed && m == 1 {
            return Ok(());
        }
        if rhs.compressed && m == 0 {
            return Err(EvalError::runtime(DIV_ZERO_ERR));
        }
        if self.compressed {
            if rhs.compressed && self.size == len {
                self.comp.set(attr, self.comp.get(attr) / m);
                return Ok(());
            }
            self.expand();
        }

        let wr = window_mut(&mut self.data, start, len);
        if rhs.compressed {
            for n in wr {
                n.set(attr, n.get(attr) / m);
            }
        } else {
            for (n, r) in wr.iter_mut().zip(window(&rhs.data, rhs_start, len)) {
                let d = cast_attr(attr, r.get(rhs_attr));
                if d == 0 {
                    return Err(EvalError::runtime(DIV_ZERO_ERR));
                }
                n.set(attr, n.get(attr) / d);
            }
        }
        Ok(())
    }

    // ---- scalar-on-attribute arithmetic ----

    pub fn add_value(&mut self, attr: Attr, start: i64, len: i64, value: i64) {
        let m = cast_attr(attr, value);
        if m == 0 {
            return;
        }
        if self.compressed {
            if self.size == len {
                self.comp.set(attr, self.comp.get(attr) + m);
                return;
            }
            self.expand();
        }

        for n in window_mut(&mut self.data, start, len) {
            n.set(attr, n.get(attr) + m);
        }
    }

    pub fn subtract_value(&mut self, attr: Attr, start: i64, len: i64, value: i64) {
        let m = cast_attr(attr, value);
        if m == 0 {
            return;
        }
        if self.compressed {
            if self.size == len {
                self.comp.set(attr, self.comp.get(attr) - m);
                return;
            }
            self.expand();
        }

        for n in window_mut(&mut self.data, start, len) {
            n.set(attr, n.get(attr) - m);
        }
    }

    pub fn multiply_value(&mut self, attr: Attr, start: i64, len: i64, value: i64) {
        let m = cast_attr(attr, value);
        if m == 1 {
            return;
        }
        if self.compressed {
            if self.size == len {
                self.comp.set(attr, self.comp.get(attr) * m);
                return;
            }
            self.expand();
        }

        for n in window_mut(&mut self.data, start, len) {
            n.set(attr, n.get(attr) * m);
        }
    }

    pub fn divide_value(
        &mut self,
        attr: Attr,
        start: i64,
        len: i64,
        value: i64,
    ) -> Result<(), EvalError> {
        let m = cast_attr(attr, value);
        if m == 1 {
            return Ok(());
        }
        if m == 0 {
            return Err(EvalError::runtime(DIV_ZERO_ERR));
        }
        if self.compressed {
            if self.size == len {
                self.comp.set(attr, self.comp.get(attr) / m);
                return Ok(());
            }
            self.expand();
        }

        for n in window_mut(&mut self.data, start, len) {
            n.set(attr, n.get(attr) / m);
        }
        Ok(())
    }
}

const NOTE_ONES: Note = Note {
    pitch: 1,
    velocity: 1,
    duration: 1,
    wait: 1,
};

fn masked(attr: Attr, value: i64) -> Note {
    let mut n = Note::ZERO;
    n.set(attr, value);
    n
}

fn window(data: &[Note], start: i64, len: i64) -> &[Note] {
    let start = start.max(0) as usize;
    &data[start..start + len.max(0) as usize]
}

fn window_mut(data: &mut [Note], start: i64, len: i64) -> &mut [Note] {
    let start = start.max(0) as usize;
    &mut data[start..start + len.max(0) as usize]
}
