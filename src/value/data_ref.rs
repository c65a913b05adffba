//! Value handles for the runtime stack.
//!
//! A [`DataRef`] names either a primitive integer, a shared [`Sequence`]
//! (optionally narrowed to a subsequence window), or one of the marker
//! types. Sequences are shared through `Arc<Mutex<_>>`; the `Arc` strong
//! count plays the role of the reference count, and [`DataRef::elide_copy`]
//! implements copy-on-write by stealing uniquely-owned storage and deep
//! copying shared storage.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::EvalError;

use super::note::Attr;
use super::sequence::Sequence;

/// Shared ownership of a sequence. Sequence graphs are trees, so plain
/// reference counting suffices.
pub type SeqRef = Arc<Mutex<Sequence>>;

pub fn new_seq(seq: Sequence) -> SeqRef {
    Arc::new(Mutex::new(seq))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DataType {
    #[default]
    Unknown,
    None,
    Undefined,
    Void,
    /// Mutable alias of a named variable's storage.
    Seq,
    /// A sequence value; shared until first mutation.
    Vseq,
    /// A literal still being captured from the live stream.
    SeqLit,
    /// Attribute projection of a variable's storage.
    Attr,
    /// Attribute projection of a value.
    Vattr,
    Value,
    Indexer,
    Error,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::Unknown => "UNKNOWN",
            DataType::None => "NONE",
            DataType::Undefined => "UNDEFINED",
            DataType::Void => "VOID",
            DataType::Seq => "SEQ",
            DataType::Vseq => "VSEQ",
            DataType::SeqLit => "SEQ_LIT",
            DataType::Attr => "ATTR",
            DataType::Vattr => "VATTR",
            DataType::Value => "VALUE",
            DataType::Indexer => "INDEXER",
            DataType::Error => "ERROR",
        }
    }

    /// One widening step along the lattice, if any:
    /// `SEQ_LIT → SEQ → VSEQ`, `ATTR → VATTR`.
    pub fn widen(self) -> Option<DataType> {
        match self {
            DataType::SeqLit => Some(DataType::Seq),
            DataType::Seq => Some(DataType::Vseq),
            DataType::Attr => Some(DataType::Vattr),
            _ => None,
        }
    }

    /// Whether `self` may implicitly widen to `target`.
    pub fn may_widen_to(self, target: DataType) -> bool {
        let mut t = self;
        loop {
            if t == target {
                return true;
            }
            match t.widen() {
                Some(next) => t = next,
                None => return false,
            }
        }
    }

    /// The value type an operand takes when it appears in a non-assignment
    /// position: reference types collapse to their value counterparts.
    pub fn copy_type(self) -> DataType {
        match self {
            DataType::SeqLit | DataType::Seq => DataType::Vseq,
            DataType::Attr => DataType::Vattr,
            other => other,
        }
    }
}

/// A stack value: type tag, optional sequence reference with window, and a
/// primitive payload.
#[derive(Debug, Default)]
pub struct DataRef {
    pub ty: DataType,
    pub attr: Attr,
    pub seq: Option<SeqRef>,
    /// Back-reference to the stack slot when this ref names a variable.
    pub stack_pos: Option<usize>,
    /// Subsequence window; `size == 0` means the whole sequence.
    pub start: i64,
    pub size: i64,
    /// Primitive integer payload for `Value`/`Indexer`.
    pub value: i64,
}

impl DataRef {
    pub fn of_type(ty: DataType) -> Self {
        Self {
            ty,
            ..Self::default()
        }
    }

    pub fn value(value: i64) -> Self {
        Self {
            ty: DataType::Value,
            value,
            ..Self::default()
        }
    }

    pub fn with_seq(ty: DataType, seq: SeqRef, attr: Attr) -> Self {
        Self {
            ty,
            attr,
            seq: Some(seq),
            ..Self::default()
        }
    }

    pub fn is_subseq(&self) -> bool {
        self.size != 0
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_none()
    }

    /// Strong count of the underlying sequence; 0 when empty.
    pub fn ref_count(&self) -> usize {
        self.seq.as_ref().map_or(0, Arc::strong_count)
    }

    /// Window length, or the whole sequence length.
    pub fn length(&self) -> i64 {
        if self.is_subseq() {
            self.size
        } else {
            self.lock().len()
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Sequence> {
        self.seq
            .as_ref()
            .expect("empty data ref")
            .lock()
            .expect("sequence lock poisoned")
    }

    /// Drop this reference's hold on the sequence.
    pub fn release(&mut self) {
        self.seq = None;
    }

    /// Adopt another reference's sequence and window.
    pub fn take(&mut self, rhs: DataRef) {
        self.seq = rhs.seq;
        self.start = rhs.start;
        self.size = rhs.size;
    }

    /// Widen this ref's type tag along the lattice. Narrowing is an internal
    /// error.
    pub fn implicit_cast(&mut self, target: DataType) -> Result<(), EvalError> {
        if !self.ty.may_widen_to(target) {
            return Err(EvalError::system(format!(
                "cannot implicitly cast {} to {}",
                self.ty.name(),
                target.name()
            )));
        }
        self.ty = target;
        Ok(())
    }

    /// Second reference to the same sequence.
    pub fn duplicate(&self) -> DataRef {
        DataRef {
            ty: self.ty,
            attr: self.attr,
            seq: self.seq.clone(),
            stack_pos: self.stack_pos,
            start: self.start,
            size: self.size,
            value: self.value,
        }
    }

    /// Fresh sequence holding the window's contents.
    pub fn copy(&self) -> DataRef {
        let fresh = {
            let guard = self.lock();
            let len = if self.is_subseq() {
                self.size
            } else {
                guard.len()
            };
            Sequence::from_window(&guard, self.start, len)
        };
        DataRef {
            ty: self.ty,
            attr: self.attr,
            seq: Some(new_seq(fresh)),
            stack_pos: None,
            start: 0,
            size: 0,
            value: self.value,
        }
    }

    /// Transfer ownership out of this ref, leaving it empty.
    pub fn move_out(&mut self) -> DataRef {
        DataRef {
            ty: self.ty,
            attr: self.attr,
            seq: self.seq.take(),
            stack_pos: self.stack_pos,
            start: self.start,
            size: self.size,
            value: self.value,
        }
    }

    /// The copy-on-write primitive behind every value-typed mutation.
    ///
    /// A uniquely-owned sequence is stolen (cropped to the window first); a
    /// shared one is deep copied, leaving the other holders untouched.
    pub fn elide_copy(mut self) -> DataRef {
        self.ty = self.ty.copy_type();

        let seq = self.seq.take().expect("empty data ref");
        match Arc::try_unwrap(seq) {
            Ok(mutex) => {
                let mut owned = mutex.into_inner().expect("sequence lock poisoned");
                if self.is_subseq() {
                    owned.crop(self.start, self.size);
                }
                DataRef {
                    seq: Some(new_seq(owned)),
                    start: 0,
                    size: 0,
                    stack_pos: None,
                    ..self
                }
            }
            Err(shared) => {
                self.seq = Some(shared);
                let fresh = self.copy();
                self.release();
                fresh
            }
        }
    }

    /// Coerce to a sequence *value*, materializing primitives and masking
    /// attribute projections.
    pub fn cast_to_vseq(self) -> Result<DataRef, EvalError> {
        match self.ty {
            DataType::Value => Ok(DataRef::with_seq(
                DataType::Vseq,
                new_seq(Sequence::with_size(self.value)),
                Attr::All,
            )),
            DataType::Undefined | DataType::Void | DataType::Indexer => Ok(DataRef::with_seq(
                DataType::Vseq,
                new_seq(Sequence::new()),
                Attr::All,
            )),
            DataType::Attr | DataType::Vattr => {
                let attr = self.attr;
                let mut v = self.elide_copy();
                v.lock().mask(attr);
                v.ty = DataType::Vseq;
                v.attr = Attr::All;
                Ok(v)
            }
            DataType::Seq | DataType::Vseq | DataType::SeqLit => {
                let mut v = self.elide_copy();
                v.ty = DataType::Vseq;
                Ok(v)
            }
            other => Err(EvalError::system(format!(
                "cannot cast {} to VSEQ",
                other.name()
            ))),
        }
    }

    /// Coerce to sequence storage for a callee's argument slot.
    pub fn cast_to_seq(mut self) -> Result<DataRef, EvalError> {
        match self.ty {
            DataType::Value => Ok(DataRef::with_seq(
                DataType::Seq,
                new_seq(Sequence::with_size(self.value)),
                Attr::All,
            )),
            DataType::Undefined | DataType::Indexer => Ok(DataRef::with_seq(
                DataType::Seq,
                new_seq(Sequence::new()),
                Attr::All,
            )),
            DataType::Attr | DataType::Vattr => {
                let attr = self.attr;
                let mut v = self.elide_copy();
                v.lock().mask(attr);
                v.ty = DataType::Seq;
                v.attr = Attr::All;
                Ok(v)
            }
            DataType::Seq | DataType::SeqLit => {
                let mut v = self.move_out();
                v.ty = DataType::Seq;
                Ok(v)
            }
            DataType::Vseq => {
                let mut v = self.elide_copy();
                v.ty = DataType::Seq;
                Ok(v)
            }
            other => Err(EvalError::system(format!(
                "cannot cast {} to SEQ",
                other.name()
            ))),
        }
    }
}
