//! The operation dispatch table.
//!
//! Operations are grouped by the solfège name of the interval between the
//! operator's bass note and the scope root. A global table maps
//! `(group, lhs type, rhs type)` to a kernel function and its return type;
//! binding resolves an operator against the table by trying the exact key,
//! then widening the right side along the implicit-cast lattice, then the
//! left side. The table is built once and read-only afterwards.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use crate::error::{
    EvalError, DIV_ZERO_ERR, INDEX_BOUNDS_ERR, SUBSEQ_BOUNDS_ERR, SUBSEQ_CONCAT_ERR,
    SUBSEQ_RESIZE_ERR,
};
use crate::value::{new_seq, Attr, DataRef, DataType, Sequence};

use super::Runtime;

/// Poll interval while waiting on an incomplete sequence literal.
const COMPLETE_POLL_MS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpGroup {
    Do,
    Re,
    Mi,
    Fa,
    So,
    La,
    Ti,
}

impl OpGroup {
    pub fn name(self) -> &'static str {
        match self {
            OpGroup::Do => "DO",
            OpGroup::Re => "RE",
            OpGroup::Mi => "MI",
            OpGroup::Fa => "FA",
            OpGroup::So => "SO",
            OpGroup::La => "LA",
            OpGroup::Ti => "TI",
        }
    }
}

/// Operator group from the interval between `note` and the scope root,
/// counted modulo one octave.
pub fn group_for_note(note: u8, root: u8) -> OpGroup {
    const MAP: [OpGroup; 12] = [
        OpGroup::Do, // unison
        OpGroup::Re, // minor 2nd
        OpGroup::Re, // major 2nd
        OpGroup::Mi, // minor 3rd
        OpGroup::Mi, // major 3rd
        OpGroup::Fa, // perfect 4th
        OpGroup::So, // diminished 5th
        OpGroup::So, // perfect 5th
        OpGroup::La, // minor 6th
        OpGroup::La, // major 6th
        OpGroup::Ti, // minor 7th
        OpGroup::Ti, // major 7th
    ];
    MAP[(note.wrapping_sub(root) % 12) as usize]
}

pub type Kernel = fn(&mut Runtime, DataRef, DataRef) -> Result<DataRef, EvalError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpKey {
    pub group: OpGroup,
    pub lhs: DataType,
    pub rhs: DataType,
}

pub struct OpEntry {
    pub name: &'static str,
    pub ret: DataType,
    pub kernel: Kernel,
}

pub type OpBook = HashMap<OpKey, OpEntry>;

pub fn op_book() -> &'static OpBook {
    static BOOK: OnceLock<OpBook> = OnceLock::new();
    BOOK.get_or_init(build_book)
}

/// Resolve an operator against the table.
///
/// Deterministic preference: exact key first, then widen the right type one
/// lattice step at a time, then the left type (keeping the fully widened
/// right). `force_copy` collapses both sides to their value types first,
/// for operators in non-assignment positions.
pub fn resolve(
    group: OpGroup,
    lhs: DataType,
    rhs: DataType,
    force_copy: bool,
) -> Option<(DataType, DataType, &'static OpEntry)> {
    let book = op_book();
    let mut l = if force_copy { lhs.copy_type() } else { lhs };
    let mut r = if force_copy { rhs.copy_type() } else { rhs };

    if let Some(entry) = book.get(&OpKey { group, lhs: l, rhs: r }) {
        return Some((l, r, entry));
    }

    while let Some(wider) = r.widen() {
        r = wider;
        if let Some(entry) = book.get(&OpKey { group, lhs: l, rhs: r }) {
            return Some((l, r, entry));
        }
    }

    while let Some(wider) = l.widen() {
        l = wider;
        if let Some(entry) = book.get(&OpKey { group, lhs: l, rhs: r }) {
            return Some((l, r, entry));
        }
    }

    None
}

// ---- shared kernel machinery ----

fn rt_err(msg: &str) -> EvalError {
    EvalError::runtime(msg)
}

fn stack_slot<'a>(rt: &'a mut Runtime, r: &DataRef) -> Result<&'a mut DataRef, EvalError> {
    let pos = r
        .stack_pos
        .ok_or_else(|| EvalError::system("reference does not name a stack slot"))?;
    rt.stack
        .get_mut(pos)
        .ok_or_else(|| EvalError::system("stack slot out of range"))
}

/// Run `f` with the left sequence locked mutably and the right locked for
/// reading. When both sides share storage the right side is snapshotted
/// first, so windows keep their meaning and the lock is taken once.
fn with_pair<T>(
    lhs: &DataRef,
    rhs: &DataRef,
    f: impl FnOnce(&mut Sequence, &Sequence) -> T,
) -> T {
    let la = lhs.seq.as_ref().expect("empty lhs ref");
    let ra = rhs.seq.as_ref().expect("empty rhs ref");
    if Arc::ptr_eq(la, ra) {
        let snapshot = {
            let guard = la.lock().expect("sequence lock poisoned");
            Sequence::from_window(&guard, 0, guard.len())
        };
        let mut lg = la.lock().expect("sequence lock poisoned");
        f(&mut lg, &snapshot)
    } else {
        let mut lg = la.lock().expect("sequence lock poisoned");
        let rg = ra.lock().expect("sequence lock poisoned");
        f(&mut lg, &rg)
    }
}

type BinSeqFn = fn(&mut Sequence, i64, &Sequence, i64, i64) -> Result<(), EvalError>;
type BinAttrFn = fn(&mut Sequence, Attr, Attr, i64, &Sequence, i64, i64) -> Result<(), EvalError>;
type ScalarFn = fn(&mut Sequence, Attr, i64, i64, i64) -> Result<(), EvalError>;

/// Binary op on a mutable alias (`SEQ`/`ATTR` left side): a subsequence
/// window must be covered by the right side and only the window is written;
/// a whole sequence grows to the right side's length first.
fn ref_binary(mut lhs: DataRef, mut rhs: DataRef, f: BinSeqFn) -> Result<DataRef, EvalError> {
    let v = lhs.move_out();
    let rhs_len = rhs.length();

    let count = if v.is_subseq() {
        if v.length() > rhs_len {
            return Err(rt_err(SUBSEQ_BOUNDS_ERR));
        }
        v.length()
    } else {
        v.lock().expect(rhs_len);
        rhs_len
    };

    with_pair(&v, &rhs, |l, r| f(l, v.start, r, rhs.start, count))?;
    rhs.release();
    Ok(v)
}

/// As [`ref_binary`], with attribute selectors on both sides.
fn ref_binary_attr(
    mut lhs: DataRef,
    mut rhs: DataRef,
    attr: Attr,
    rhs_attr: Attr,
    f: BinAttrFn,
) -> Result<DataRef, EvalError> {
    let v = lhs.move_out();
    let rhs_len = rhs.length();

    let count = if v.is_subseq() {
        if v.length() > rhs_len {
            return Err(rt_err(SUBSEQ_BOUNDS_ERR));
        }
        v.length()
    } else {
        v.lock().expect(rhs_len);
        rhs_len
    };

    with_pair(&v, &rhs, |l, r| {
        f(l, attr, rhs_attr, v.start, r, rhs.start, count)
    })?;
    rhs.release();
    Ok(v)
}

/// Binary op on a value (`VSEQ`/`VATTR` left side): fork or steal the
/// storage first, then grow to cover the right side.
fn copy_binary(lhs: DataRef, mut rhs: DataRef, f: BinSeqFn) -> Result<DataRef, EvalError> {
    let v = lhs.elide_copy();
    let rhs_len = rhs.length();
    v.lock().expect(rhs_len);

    with_pair(&v, &rhs, |l, r| f(l, v.start, r, rhs.start, rhs_len))?;
    rhs.release();
    Ok(v)
}

fn copy_binary_attr(
    lhs: DataRef,
    mut rhs: DataRef,
    attr: Attr,
    rhs_attr: Attr,
    f: BinAttrFn,
) -> Result<DataRef, EvalError> {
    let v = lhs.elide_copy();
    let rhs_len = rhs.length();
    v.lock().expect(rhs_len);

    with_pair(&v, &rhs, |l, r| {
        f(l, attr, rhs_attr, v.start, r, rhs.start, rhs_len)
    })?;
    rhs.release();
    Ok(v)
}

/// Scalar op on the selected attribute of every element in the window.
fn ref_scalar(mut lhs: DataRef, value: i64, f: ScalarFn) -> Result<DataRef, EvalError> {
    let v = lhs.move_out();
    let (attr, start, len) = (v.attr, v.start, v.length());
    {
        let mut guard = v.lock();
        f(&mut guard, attr, start, len, value)?;
    }
    Ok(v)
}

fn copy_scalar(lhs: DataRef, value: i64, f: ScalarFn) -> Result<DataRef, EvalError> {
    let v = lhs.elide_copy();
    let (attr, start, len) = (v.attr, v.start, v.length());
    {
        let mut guard = v.lock();
        f(&mut guard, attr, start, len, value)?;
    }
    Ok(v)
}

/// Length arithmetic: the resize family behind scalar arithmetic on whole
/// sequences.
fn ref_resize(
    mut lhs: DataRef,
    value: i64,
    f: fn(i64, i64) -> Result<i64, EvalError>,
) -> Result<DataRef, EvalError> {
    let v = lhs.move_out();
    if v.is_subseq() {
        return Err(rt_err(SUBSEQ_RESIZE_ERR));
    }
    let mut guard = v.lock();
    let end = f(guard.len(), value)?;
    guard.resize(end);
    drop(guard);
    Ok(v)
}

fn copy_resize(
    lhs: DataRef,
    value: i64,
    f: fn(i64, i64) -> Result<i64, EvalError>,
) -> Result<DataRef, EvalError> {
    let v = lhs.elide_copy();
    let mut guard = v.lock();
    let end = f(guard.len(), value)?;
    guard.resize(end);
    drop(guard);
    Ok(v)
}

fn compare(a: i64, b: i64) -> i64 {
    i64::from(a < b)
}

// thin wrappers giving the sequence methods one uniform signature

fn seq_assign(l: &mut Sequence, s: i64, r: &Sequence, rs: i64, n: i64) -> Result<(), EvalError> {
    l.assign(s, r, rs, n);
    Ok(())
}

fn seq_add(l: &mut Sequence, s: i64, r: &Sequence, rs: i64, n: i64) -> Result<(), EvalError> {
    l.add(s, r, rs, n);
    Ok(())
}

fn seq_sub(l: &mut Sequence, s: i64, r: &Sequence, rs: i64, n: i64) -> Result<(), EvalError> {
    l.subtract(s, r, rs, n);
    Ok(())
}

fn seq_mul(l: &mut Sequence, s: i64, r: &Sequence, rs: i64, n: i64) -> Result<(), EvalError> {
    l.multiply(s, r, rs, n);
    Ok(())
}

fn seq_div(l: &mut Sequence, s: i64, r: &Sequence, rs: i64, n: i64) -> Result<(), EvalError> {
    l.divide(s, r, rs, n)
}

fn seq_assign_attr(
    l: &mut Sequence,
    a: Attr,
    ra: Attr,
    s: i64,
    r: &Sequence,
    rs: i64,
    n: i64,
) -> Result<(), EvalError> {
    l.assign_attr(a, ra, s, r, rs, n);
    Ok(())
}

fn seq_add_attr(
    l: &mut Sequence,
    a: Attr,
    ra: Attr,
    s: i64,
    r: &Sequence,
    rs: i64,
    n: i64,
) -> Result<(), EvalError> {
    l.add_attr(a, ra, s, r, rs, n);
    Ok(())
}

fn seq_sub_attr(
    l: &mut Sequence,
    a: Attr,
    ra: Attr,
    s: i64,
    r: &Sequence,
    rs: i64,
    n: i64,
) -> Result<(), EvalError> {
    l.subtract_attr(a, ra, s, r, rs, n);
    Ok(())
}

fn seq_mul_attr(
    l: &mut Sequence,
    a: Attr,
    ra: Attr,
    s: i64,
    r: &Sequence,
    rs: i64,
    n: i64,
) -> Result<(), EvalError> {
    l.multiply_attr(a, ra, s, r, rs, n);
    Ok(())
}

fn seq_div_attr(
    l: &mut Sequence,
    a: Attr,
    ra: Attr,
    s: i64,
    r: &Sequence,
    rs: i64,
    n: i64,
) -> Result<(), EvalError> {
    l.divide_attr(a, ra, s, r, rs, n)
}

fn seq_assign_value(l: &mut Sequence, a: Attr, s: i64, n: i64, v: i64) -> Result<(), EvalError> {
    l.assign_value(a, s, n, v);
    Ok(())
}

fn seq_add_value(l: &mut Sequence, a: Attr, s: i64, n: i64, v: i64) -> Result<(), EvalError> {
    l.add_value(a, s, n, v);
    Ok(())
}

fn seq_sub_value(l: &mut Sequence, a: Attr, s: i64, n: i64, v: i64) -> Result<(), EvalError> {
    l.subtract_value(a, s, n, v);
    Ok(())
}

fn seq_mul_value(l: &mut Sequence, a: Attr, s: i64, n: i64, v: i64) -> Result<(), EvalError> {
    l.multiply_value(a, s, n, v);
    Ok(())
}

fn seq_div_value(l: &mut Sequence, a: Attr, s: i64, n: i64, v: i64) -> Result<(), EvalError> {
    l.divide_value(a, s, n, v)
}

fn grow(len: i64, v: i64) -> Result<i64, EvalError> {
    Ok(len + v)
}

fn shrink(len: i64, v: i64) -> Result<i64, EvalError> {
    Ok(len - v)
}

fn scale(len: i64, v: i64) -> Result<i64, EvalError> {
    Ok(len * v)
}

fn split(len: i64, v: i64) -> Result<i64, EvalError> {
    if v == 0 {
        return Err(rt_err(DIV_ZERO_ERR));
    }
    Ok(len / v)
}

/// Unary attribute projection: retag the reference, keeping the alias.
fn project(mut lhs: DataRef, ty: DataType, attr: Attr) -> Result<DataRef, EvalError> {
    let mut v = lhs.move_out();
    v.ty = ty;
    v.attr = attr;
    Ok(v)
}

fn index_bounds(idx: i64, len: i64) -> Result<(), EvalError> {
    if idx < 0 || idx >= len {
        return Err(rt_err(INDEX_BOUNDS_ERR));
    }
    Ok(())
}

// ---- the table ----

fn build_book() -> OpBook {
    let mut book = OpBook::new();
    let mut put = |group, lhs, rhs, name, ret, kernel: Kernel| {
        book.insert(
            OpKey { group, lhs, rhs },
            OpEntry { name, ret, kernel },
        );
    };

    use DataType::{Attr as AttrT, Indexer, None as NoneT, Seq, SeqLit, Value, Vattr, Vseq};
    use OpGroup::{Do, Fa, La, Mi, Re, So, Ti};

    // DO: NEW / COMPLETE / ASSIGN / SET / RESIZE
    put(Do, Vseq, NoneT, "NEW", Vseq, |_, lhs, _| Ok(lhs.elide_copy()));
    put(Do, Value, NoneT, "NEW", Vseq, |_, lhs, _| {
        Ok(DataRef::with_seq(
            Vseq,
            new_seq(Sequence::with_size(lhs.value)),
            Attr::All,
        ))
    });
    put(Do, SeqLit, NoneT, "COMPLETE", Vseq, |_, lhs, _| {
        while !lhs.lock().is_complete() {
            thread::sleep(Duration::from_millis(COMPLETE_POLL_MS));
        }
        Ok(lhs.elide_copy())
    });
    put(Do, Seq, Seq, "ASSIGN", Seq, |rt, lhs, mut rhs| {
        let var = stack_slot(rt, &lhs)?;
        var.take(rhs.move_out());
        Ok(var.duplicate())
    });
    put(Do, Seq, Vseq, "SET", Seq, |rt, mut lhs, mut rhs| {
        if lhs.is_subseq() {
            let v = lhs.move_out();
            if v.length() > rhs.length() {
                return Err(rt_err(SUBSEQ_BOUNDS_ERR));
            }
            let count = v.length();
            with_pair(&v, &rhs, |l, r| l.assign(v.start, r, rhs.start, count));
            rhs.release();
            return Ok(v);
        }
        let var = stack_slot(rt, &lhs)?;
        var.take(rhs.elide_copy());
        Ok(var.duplicate())
    });
    put(Do, Seq, Vattr, "SET", Seq, |_, lhs, rhs| {
        let (a, ra) = (rhs.attr, rhs.attr);
        ref_binary_attr(lhs, rhs, a, ra, seq_assign_attr)
    });
    put(Do, Seq, Value, "RESIZE", Seq, |_, mut lhs, rhs| {
        let v = lhs.move_out();
        if v.is_subseq() {
            return Err(rt_err(SUBSEQ_RESIZE_ERR));
        }
        v.lock().resize(rhs.value);
        Ok(v)
    });
    put(Do, Vseq, Vseq, "SET", Vseq, |_, mut lhs, rhs| {
        lhs.release();
        Ok(rhs.elide_copy())
    });
    put(Do, Vseq, Vattr, "SET", Vseq, |_, lhs, rhs| {
        let (a, ra) = (rhs.attr, rhs.attr);
        copy_binary_attr(lhs, rhs, a, ra, seq_assign_attr)
    });
    put(Do, Vseq, Value, "RESIZE", Vseq, |_, lhs, rhs| {
        let v = lhs.elide_copy();
        v.lock().resize(rhs.value);
        Ok(v)
    });
    put(Do, AttrT, Vseq, "SET", AttrT, |_, lhs, rhs| {
        let (a, ra) = (lhs.attr, lhs.attr);
        ref_binary_attr(lhs, rhs, a, ra, seq_assign_attr)
    });
    put(Do, AttrT, Vattr, "SET", AttrT, |_, lhs, rhs| {
        let (a, ra) = (lhs.attr, rhs.attr);
        ref_binary_attr(lhs, rhs, a, ra, seq_assign_attr)
    });
    put(Do, AttrT, Value, "SET", AttrT, |_, lhs, rhs| {
        ref_scalar(lhs, rhs.value, seq_assign_value)
    });
    put(Do, Vattr, Vseq, "SET", Vattr, |_, lhs, rhs| {
        let (a, ra) = (lhs.attr, lhs.attr);
        copy_binary_attr(lhs, rhs, a, ra, seq_assign_attr)
    });
    put(Do, Vattr, Vattr, "SET", Vattr, |_, lhs, rhs| {
        let (a, ra) = (lhs.attr, rhs.attr);
        copy_binary_attr(lhs, rhs, a, ra, seq_assign_attr)
    });
    put(Do, Vattr, Value, "SET", Vattr, |_, lhs, rhs| {
        copy_scalar(lhs, rhs.value, seq_assign_value)
    });

    // RE: VALUE / CONCAT / EXTEND / INDEX
    put(Re, Vseq, NoneT, "VALUE", Value, |_, mut lhs, _| {
        let v = lhs.lock().value()?;
        lhs.release();
        Ok(DataRef::value(v))
    });
    put(Re, Vattr, NoneT, "VALUE", Value, |_, mut lhs, _| {
        let v = lhs.lock().value_attr(lhs.attr)?;
        lhs.release();
        Ok(DataRef::value(v))
    });
    put(Re, Value, NoneT, "VALUE", Value, |_, lhs, _| Ok(lhs));
    put(Re, Seq, Vseq, "CONCAT", Seq, |_, lhs, rhs| concat_ref(lhs, rhs, None));
    put(Re, Seq, Vattr, "CONCAT", Seq, |_, lhs, rhs| {
        let pair = (rhs.attr, rhs.attr);
        concat_ref(lhs, rhs, Some(pair))
    });
    put(Re, Seq, Value, "EXTEND", Seq, |_, mut lhs, rhs| {
        let v = lhs.move_out();
        if v.is_subseq() {
            return Err(rt_err(SUBSEQ_RESIZE_ERR));
        }
        v.lock().extend(rhs.value);
        Ok(v)
    });
    put(Re, Vseq, Vseq, "CONCAT", Vseq, |_, lhs, rhs| concat_copy(lhs, rhs, None));
    put(Re, Vseq, Vattr, "CONCAT", Vseq, |_, lhs, rhs| {
        let pair = (rhs.attr, rhs.attr);
        concat_copy(lhs, rhs, Some(pair))
    });
    put(Re, Vseq, Value, "EXTEND", Vseq, |_, lhs, rhs| {
        let v = lhs.elide_copy();
        v.lock().extend(rhs.value);
        Ok(v)
    });
    put(Re, AttrT, Vseq, "CONCAT", AttrT, |_, lhs, rhs| {
        let pair = (lhs.attr, lhs.attr);
        concat_ref(lhs, rhs, Some(pair))
    });
    put(Re, AttrT, Vattr, "CONCAT", AttrT, |_, lhs, rhs| {
        let pair = (lhs.attr, rhs.attr);
        concat_ref(lhs, rhs, Some(pair))
    });
    put(Re, AttrT, Value, "EXTEND", AttrT, |_, mut lhs, rhs| {
        let v = lhs.move_out();
        if v.is_subseq() {
            return Err(rt_err(SUBSEQ_RESIZE_ERR));
        }
        v.lock().extend(rhs.value);
        Ok(v)
    });
    put(Re, Vattr, Vseq, "CONCAT", Vattr, |_, lhs, rhs| {
        let pair = (lhs.attr, lhs.attr);
        concat_copy(lhs, rhs, Some(pair))
    });
    put(Re, Vattr, Vattr, "CONCAT", Vattr, |_, lhs, rhs| {
        let pair = (lhs.attr, rhs.attr);
        concat_copy(lhs, rhs, Some(pair))
    });
    put(Re, Vattr, Value, "EXTEND", Vattr, |_, lhs, rhs| {
        let v = lhs.elide_copy();
        v.lock().extend(rhs.value);
        Ok(v)
    });
    put(Re, Value, Seq, "INDEX", Seq, |_, lhs, mut rhs| {
        index_bounds(lhs.value, rhs.length())?;
        let base = rhs.start;
        let mut v = rhs.move_out();
        v.start = base + lhs.value;
        v.size = 1;
        Ok(v)
    });
    put(Re, Value, Vseq, "INDEX", Vseq, |_, lhs, mut rhs| {
        index_bounds(lhs.value, rhs.length())?;
        let elem = rhs.lock().at(rhs.start + lhs.value)?;
        rhs.release();
        Ok(DataRef::with_seq(
            Vseq,
            new_seq(Sequence::repeated(elem, 1)),
            Attr::All,
        ))
    });
    put(Re, Value, AttrT, "INDEX", AttrT, |_, lhs, mut rhs| {
        index_bounds(lhs.value, rhs.length())?;
        let base = rhs.start;
        let mut v = rhs.move_out();
        v.start = base + lhs.value;
        v.size = 1;
        Ok(v)
    });
    put(Re, Value, Vattr, "INDEX", Vattr, |_, lhs, mut rhs| {
        index_bounds(lhs.value, rhs.length())?;
        let elem = rhs.lock().at(rhs.start + lhs.value)?;
        let attr = rhs.attr;
        rhs.release();
        Ok(DataRef::with_seq(
            Vattr,
            new_seq(Sequence::repeated(elem, 1)),
            attr,
        ))
    });
    put(Re, Value, Value, "INDEX", Indexer, |_, lhs, rhs| {
        let mut v = DataRef::of_type(Indexer);
        v.start = lhs.value;
        v.size = rhs.value - lhs.value;
        Ok(v)
    });
    put(Re, Indexer, Seq, "INDEX", Seq, |_, lhs, mut rhs| {
        indexer_bounds(&lhs, rhs.length())?;
        let base = rhs.start;
        let mut v = rhs.move_out();
        v.start = base + lhs.start;
        v.size = lhs.size;
        Ok(v)
    });
    put(Re, Indexer, Vseq, "INDEX", Vseq, |_, lhs, rhs| {
        indexer_bounds(&lhs, rhs.length())?;
        let mut v = rhs.elide_copy();
        v.start = lhs.start;
        v.size = lhs.size;
        Ok(v)
    });
    put(Re, Indexer, AttrT, "INDEX", AttrT, |_, lhs, mut rhs| {
        indexer_bounds(&lhs, rhs.length())?;
        let base = rhs.start;
        let mut v = rhs.move_out();
        v.start = base + lhs.start;
        v.size = lhs.size;
        Ok(v)
    });
    put(Re, Indexer, Vattr, "INDEX", Vattr, |_, lhs, rhs| {
        indexer_bounds(&lhs, rhs.length())?;
        let mut v = rhs.elide_copy();
        v.start = lhs.start;
        v.size = lhs.size;
        Ok(v)
    });

    // MI: LENGTH / COMPARE
    put(Mi, Vseq, NoneT, "LENGTH", Value, |_, mut lhs, _| {
        let len = lhs.length();
        lhs.release();
        Ok(DataRef::value(len))
    });
    put(Mi, Vattr, NoneT, "LENGTH", Value, |_, mut lhs, _| {
        let len = lhs.length();
        lhs.release();
        Ok(DataRef::value(len))
    });
    put(Mi, Value, NoneT, "LENGTH", Value, |_, lhs, _| Ok(lhs));
    put(Mi, Vseq, Vseq, "COMPARE", Value, |_, lhs, rhs| {
        Ok(DataRef::value(compare(lhs.length(), rhs.length())))
    });
    put(Mi, Vseq, Vattr, "COMPARE", Value, |_, lhs, rhs| {
        Ok(DataRef::value(compare(lhs.length(), rhs.length())))
    });
    put(Mi, Vseq, Value, "COMPARE", Value, |_, lhs, rhs| {
        Ok(DataRef::value(compare(lhs.length(), rhs.value)))
    });
    put(Mi, Vattr, Vseq, "COMPARE", Value, |_, lhs, rhs| {
        Ok(DataRef::value(compare(lhs.length(), rhs.length())))
    });
    put(Mi, Vattr, Vattr, "COMPARE", Value, |_, lhs, rhs| {
        Ok(DataRef::value(compare(lhs.length(), rhs.length())))
    });
    put(Mi, Vattr, Value, "COMPARE", Value, |_, lhs, rhs| {
        Ok(DataRef::value(compare(lhs.length(), rhs.value)))
    });
    put(Mi, Value, Vseq, "COMPARE", Value, |_, lhs, rhs| {
        Ok(DataRef::value(compare(lhs.value, rhs.length())))
    });
    put(Mi, Value, Vattr, "COMPARE", Value, |_, lhs, rhs| {
        Ok(DataRef::value(compare(lhs.value, rhs.length())))
    });
    put(Mi, Value, Value, "COMPARE", Value, |_, lhs, rhs| {
        Ok(DataRef::value(compare(lhs.value, rhs.value)))
    });

    // FA: PITCH / ADD
    put(Fa, Seq, NoneT, "PITCH", AttrT, |_, lhs, _| {
        project(lhs, AttrT, Attr::Pitch)
    });
    put(Fa, Vseq, NoneT, "PITCH", Vattr, |_, lhs, _| {
        project(lhs, Vattr, Attr::Pitch)
    });
    put(Fa, Value, NoneT, "ADD", Value, |_, lhs, _| {
        Ok(DataRef::value(lhs.value + 1))
    });
    put(Fa, Seq, Vseq, "ADD", Seq, |_, lhs, rhs| ref_binary(lhs, rhs, seq_add));
    put(Fa, Seq, Vattr, "ADD", Seq, |_, lhs, rhs| {
        let pair = (rhs.attr, rhs.attr);
        ref_binary_attr(lhs, rhs, pair.0, pair.1, seq_add_attr)
    });
    put(Fa, Seq, Value, "ADD", Seq, |_, lhs, rhs| ref_resize(lhs, rhs.value, grow));
    put(Fa, Vseq, Vseq, "ADD", Vseq, |_, lhs, rhs| copy_binary(lhs, rhs, seq_add));
    put(Fa, Vseq, Vattr, "ADD", Vseq, |_, lhs, rhs| {
        let pair = (rhs.attr, rhs.attr);
        copy_binary_attr(lhs, rhs, pair.0, pair.1, seq_add_attr)
    });
    put(Fa, Vseq, Value, "ADD", Vseq, |_, lhs, rhs| copy_resize(lhs, rhs.value, grow));
    put(Fa, AttrT, Vseq, "ADD", AttrT, |_, lhs, rhs| {
        let pair = (lhs.attr, lhs.attr);
        ref_binary_attr(lhs, rhs, pair.0, pair.1, seq_add_attr)
    });
    put(Fa, AttrT, Vattr, "ADD", AttrT, |_, lhs, rhs| {
        let pair = (lhs.attr, rhs.attr);
        ref_binary_attr(lhs, rhs, pair.0, pair.1, seq_add_attr)
    });
    put(Fa, AttrT, Value, "ADD", AttrT, |_, lhs, rhs| {
        ref_scalar(lhs, rhs.value, seq_add_value)
    });
    put(Fa, Vattr, Vseq, "ADD", Vattr, |_, lhs, rhs| {
        let pair = (lhs.attr, lhs.attr);
        copy_binary_attr(lhs, rhs, pair.0, pair.1, seq_add_attr)
    });
    put(Fa, Vattr, Vattr, "ADD", Vattr, |_, lhs, rhs| {
        let pair = (lhs.attr, rhs.attr);
        copy_binary_attr(lhs, rhs, pair.0, pair.1, seq_add_attr)
    });
    put(Fa, Vattr, Value, "ADD", Vattr, |_, lhs, rhs| {
        copy_scalar(lhs, rhs.value, seq_add_value)
    });
    put(Fa, Value, Value, "ADD", Value, |_, lhs, rhs| {
        Ok(DataRef::value(lhs.value + rhs.value))
    });

    // SO: VELOCITY / SUBTRACT
    put(So, Seq, NoneT, "VELOCITY", AttrT, |_, lhs, _| {
        project(lhs, AttrT, Attr::Velocity)
    });
    put(So, Vseq, NoneT, "VELOCITY", Vattr, |_, lhs, _| {
        project(lhs, Vattr, Attr::Velocity)
    });
    put(So, Value, NoneT, "SUBTRACT", Value, |_, lhs, _| {
        Ok(DataRef::value(lhs.value - 1))
    });
    put(So, Seq, Vseq, "SUBTRACT", Seq, |_, lhs, rhs| ref_binary(lhs, rhs, seq_sub));
    put(So, Seq, Vattr, "SUBTRACT", Seq, |_, lhs, rhs| {
        let pair = (rhs.attr, rhs.attr);
        ref_binary_attr(lhs, rhs, pair.0, pair.1, seq_sub_attr)
    });
    put(So, Seq, Value, "SUBTRACT", Seq, |_, lhs, rhs| {
        ref_resize(lhs, rhs.value, shrink)
    });
    put(So, Vseq, Vseq, "SUBTRACT", Vseq, |_, lhs, rhs| copy_binary(lhs, rhs, seq_sub));
    put(So, Vseq, Vattr, "SUBTRACT", Vseq, |_, lhs, rhs| {
        let pair = (rhs.attr, rhs.attr);
        copy_binary_attr(lhs, rhs, pair.0, pair.1, seq_sub_attr)
    });
    put(So, Vseq, Value, "SUBTRACT", Vseq, |_, lhs, rhs| {
        copy_resize(lhs, rhs.value, shrink)
    });
    put(So, AttrT, Vseq, "SUBTRACT", AttrT, |_, lhs, rhs| {
        let pair = (lhs.attr, lhs.attr);
        ref_binary_attr(lhs, rhs, pair.0, pair.1, seq_sub_attr)
    });
    put(So, AttrT, Vattr, "SUBTRACT", AttrT, |_, lhs, rhs| {
        let pair = (lhs.attr, rhs.attr);
        ref_binary_attr(lhs, rhs, pair.0, pair.1, seq_sub_attr)
    });
    put(So, AttrT, Value, "SUBTRACT", AttrT, |_, lhs, rhs| {
        ref_scalar(lhs, rhs.value, seq_sub_value)
    });
    put(So, Vattr, Vseq, "SUBTRACT", Vattr, |_, lhs, rhs| {
        let pair = (lhs.attr, lhs.attr);
        copy_binary_attr(lhs, rhs, pair.0, pair.1, seq_sub_attr)
    });
    put(So, Vattr, Vattr, "SUBTRACT", Vattr, |_, lhs, rhs| {
        let pair = (lhs.attr, rhs.attr);
        copy_binary_attr(lhs, rhs, pair.0, pair.1, seq_sub_attr)
    });
    put(So, Vattr, Value, "SUBTRACT", Vattr, |_, lhs, rhs| {
        copy_scalar(lhs, rhs.value, seq_sub_value)
    });
    put(So, Value, Value, "SUBTRACT", Value, |_, lhs, rhs| {
        Ok(DataRef::value(lhs.value - rhs.value))
    });

    // LA: DURATION / MULTIPLY
    put(La, Seq, NoneT, "DURATION", AttrT, |_, lhs, _| {
        project(lhs, AttrT, Attr::Duration)
    });
    put(La, Vseq, NoneT, "DURATION", Vattr, |_, lhs, _| {
        project(lhs, Vattr, Attr::Duration)
    });
    put(La, Seq, Vseq, "MULTIPLY", Seq, |_, lhs, rhs| ref_binary(lhs, rhs, seq_mul));
    put(La, Seq, Vattr, "MULTIPLY", Seq, |_, lhs, rhs| {
        let pair = (rhs.attr, rhs.attr);
        ref_binary_attr(lhs, rhs, pair.0, pair.1, seq_mul_attr)
    });
    put(La, Seq, Value, "MULTIPLY", Seq, |_, lhs, rhs| {
        ref_resize(lhs, rhs.value, scale)
    });
    put(La, Vseq, Vseq, "MULTIPLY", Vseq, |_, lhs, rhs| copy_binary(lhs, rhs, seq_mul));
    put(La, Vseq, Vattr, "MULTIPLY", Vseq, |_, lhs, rhs| {
        let pair = (rhs.attr, rhs.attr);
        copy_binary_attr(lhs, rhs, pair.0, pair.1, seq_mul_attr)
    });
    put(La, Vseq, Value, "MULTIPLY", Vseq, |_, lhs, rhs| {
        copy_resize(lhs, rhs.value, scale)
    });
    put(La, AttrT, Vseq, "MULTIPLY", AttrT, |_, lhs, rhs| {
        let pair = (lhs.attr, lhs.attr);
        ref_binary_attr(lhs, rhs, pair.0, pair.1, seq_mul_attr)
    });
    put(La, AttrT, Vattr, "MULTIPLY", AttrT, |_, lhs, rhs| {
        let pair = (lhs.attr, rhs.attr);
        ref_binary_attr(lhs, rhs, pair.0, pair.1, seq_mul_attr)
    });
    put(La, AttrT, Value, "MULTIPLY", AttrT, |_, lhs, rhs| {
        ref_scalar(lhs, rhs.value, seq_mul_value)
    });
    put(La, Vattr, Vseq, "MULTIPLY", Vattr, |_, lhs, rhs| {
        let pair = (lhs.attr, lhs.attr);
        copy_binary_attr(lhs, rhs, pair.0, pair.1, seq_mul_attr)
    });
    put(La, Vattr, Vattr, "MULTIPLY", Vattr, |_, lhs, rhs| {
        let pair = (lhs.attr, rhs.attr);
        copy_binary_attr(lhs, rhs, pair.0, pair.1, seq_mul_attr)
    });
    put(La, Vattr, Value, "MULTIPLY", Vattr, |_, lhs, rhs| {
        copy_scalar(lhs, rhs.value, seq_mul_value)
    });
    put(La, Value, Value, "MULTIPLY", Value, |_, lhs, rhs| {
        Ok(DataRef::value(lhs.value * rhs.value))
    });

    // TI: WAIT / DIVIDE
    put(Ti, Seq, NoneT, "WAIT", AttrT, |_, lhs, _| {
        project(lhs, AttrT, Attr::Wait)
    });
    put(Ti, Vseq, NoneT, "WAIT", Vattr, |_, lhs, _| {
        project(lhs, Vattr, Attr::Wait)
    });
    put(Ti, Seq, Vseq, "DIVIDE", Seq, |_, lhs, rhs| ref_binary(lhs, rhs, seq_div));
    put(Ti, Seq, Vattr, "DIVIDE", Seq, |_, lhs, rhs| {
        let pair = (rhs.attr, rhs.attr);
        ref_binary_attr(lhs, rhs, pair.0, pair.1, seq_div_attr)
    });
    put(Ti, Seq, Value, "DIVIDE", Seq, |_, lhs, rhs| {
        ref_resize(lhs, rhs.value, split)
    });
    put(Ti, Vseq, Vseq, "DIVIDE", Vseq, |_, lhs, rhs| copy_binary(lhs, rhs, seq_div));
    put(Ti, Vseq, Vattr, "DIVIDE", Vseq, |_, lhs, rhs| {
        let pair = (rhs.attr, rhs.attr);
        copy_binary_attr(lhs, rhs, pair.0, pair.1, seq_div_attr)
    });
    put(Ti, Vseq, Value, "DIVIDE", Vseq, |_, lhs, rhs| {
        copy_resize(lhs, rhs.value, split)
    });
    put(Ti, AttrT, Vseq, "DIVIDE", AttrT, |_, lhs, rhs| {
        let pair = (lhs.attr, lhs.attr);
        ref_binary_attr(lhs, rhs, pair.0, pair.1, seq_div_attr)
    });
    put(Ti, AttrT, Vattr, "DIVIDE", AttrT, |_, lhs, rhs| {
        let pair = (lhs.attr, rhs.attr);
        ref_binary_attr(lhs, rhs, pair.0, pair.1, seq_div_attr)
    });
    put(Ti, AttrT, Value, "DIVIDE", AttrT, |_, lhs, rhs| {
        ref_scalar(lhs, rhs.value, seq_div_value)
    });
    put(Ti, Vattr, Vseq, "DIVIDE", Vattr, |_, lhs, rhs| {
        let pair = (lhs.attr, lhs.attr);
        copy_binary_attr(lhs, rhs, pair.0, pair.1, seq_div_attr)
    });
    put(Ti, Vattr, Vattr, "DIVIDE", Vattr, |_, lhs, rhs| {
        let pair = (lhs.attr, rhs.attr);
        copy_binary_attr(lhs, rhs, pair.0, pair.1, seq_div_attr)
    });
    put(Ti, Vattr, Value, "DIVIDE", Vattr, |_, lhs, rhs| {
        copy_scalar(lhs, rhs.value, seq_div_value)
    });
    put(Ti, Value, Value, "DIVIDE", Value, |_, lhs, rhs| {
        if rhs.value == 0 {
            return Err(rt_err(DIV_ZERO_ERR));
        }
        Ok(DataRef::value(lhs.value / rhs.value))
    });

    book
}

fn indexer_bounds(indexer: &DataRef, len: i64) -> Result<(), EvalError> {
    if indexer.start < 0 || indexer.size < 0 || indexer.start + indexer.size > len {
        return Err(rt_err(INDEX_BOUNDS_ERR));
    }
    Ok(())
}

fn concat_ref(
    mut lhs: DataRef,
    mut rhs: DataRef,
    attrs: Option<(Attr, Attr)>,
) -> Result<DataRef, EvalError> {
    let v = lhs.move_out();
    if v.is_subseq() {
        return Err(rt_err(SUBSEQ_CONCAT_ERR));
    }
    let rhs_len = rhs.length();
    with_pair(&v, &rhs, |l, r| match attrs {
        Some((a, ra)) => l.concat_attr(a, ra, r, rhs.start, rhs_len),
        None => l.concat(r, rhs.start, rhs_len),
    });
    rhs.release();
    Ok(v)
}

fn concat_copy(
    lhs: DataRef,
    mut rhs: DataRef,
    attrs: Option<(Attr, Attr)>,
) -> Result<DataRef, EvalError> {
    let v = lhs.elide_copy();
    let rhs_len = rhs.length();
    with_pair(&v, &rhs, |l, r| match attrs {
        Some((a, ra)) => l.concat_attr(a, ra, r, rhs.start, rhs_len),
        None => l.concat(r, rhs.start, rhs_len),
    });
    rhs.release();
    Ok(v)
}
