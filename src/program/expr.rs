//! Typed expression nodes produced by binding.
//!
//! A closed sum of seven shapes; every node knows its compile-time return
//! type. `Display` renders the single-line form used by the REPL echo and
//! `--translate` output.

use std::fmt;

use crate::runtime::ops::{Kernel, OpGroup};
use crate::syntax::{symbol_to_str, Symbol};
use crate::value::{DataType, SeqRef};

/// Index of a statement inside its scope's body.
pub type StmtIdx = usize;

/// Sentinel for a branch target that has not been linked yet.
pub const UNLINKED: StmtIdx = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub usize);

/// A function's identity: its chord symbol plus arity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    pub chord: Symbol,
    pub arity: usize,
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", symbol_to_str(&self.chord), self.arity)
    }
}

#[derive(Debug)]
pub enum Expr {
    FunctionCall(FunctionCall),
    Operation(Operation),
    Branch(Branch),
    Variable(Variable),
    ValueLiteral(ValueLiteral),
    SequenceLiteral(SequenceLiteral),
    Error,
}

#[derive(Debug)]
pub struct FunctionCall {
    pub chord: Symbol,
    pub key: ScopeKey,
    pub args: Vec<Expr>,
    /// Resolved callee; `None` while the definition is still forward.
    pub target: Option<ScopeId>,
}

#[derive(Debug)]
pub struct Operation {
    pub lhs: Box<Expr>,
    pub rhs: Option<Box<Expr>>,
    pub lhs_ty: DataType,
    pub rhs_ty: DataType,
    /// Pitch class of the operator's bass note.
    pub note: u8,
    pub group: OpGroup,
    pub name: &'static str,
    pub ret: DataType,
    pub kernel: Kernel,
}

#[derive(Debug)]
pub struct Branch {
    pub id: Symbol,
    pub guard: Option<Box<Operation>>,
    /// Taken when the guard is strictly positive.
    pub up: StmtIdx,
    /// Taken otherwise, and unconditionally without a guard.
    pub down: StmtIdx,
}

#[derive(Debug)]
pub struct Variable {
    pub id: Symbol,
    pub stack_offset: usize,
}

#[derive(Debug)]
pub struct ValueLiteral {
    pub value: i64,
}

#[derive(Debug)]
pub struct SequenceLiteral {
    pub id: Symbol,
    /// Striking this pitch again closes the literal's capture.
    pub note: u8,
    pub seq: SeqRef,
}

impl Expr {
    pub fn return_type(&self) -> DataType {
        match self {
            Expr::FunctionCall(_) => DataType::Vseq,
            Expr::Operation(op) => op.ret,
            Expr::Branch(_) => DataType::Void,
            Expr::Variable(_) => DataType::Seq,
            Expr::ValueLiteral(_) => DataType::Value,
            Expr::SequenceLiteral(_) => DataType::SeqLit,
            Expr::Error => DataType::Error,
        }
    }

}

impl Operation {
    /// Flatten a left-leaning chain of the same operator into one operand
    /// list, the way the phrase was performed.
    fn operands_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut head: &Expr = &*self.lhs;

        if let Some(rhs) = &self.rhs {
            parts.push(rhs.to_string());
        }
        while let Expr::Operation(op) = head {
            if op.note != self.note {
                break;
            }
            if let Some(rhs) = &op.rhs {
                parts.push(rhs.to_string());
            }
            head = &op.lhs;
        }
        parts.push(head.to_string());
        parts.reverse();
        parts.join(", ")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::FunctionCall(call) => {
                write!(f, "FN {}( ", symbol_to_str(&call.chord))?;
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, " )")
            }
            Expr::Operation(op) => write!(f, "{}( {} )", op.name, op.operands_string()),
            Expr::Branch(branch) => match &branch.guard {
                Some(guard) => write!(
                    f,
                    "BR {}( {} )",
                    symbol_to_str(&branch.id),
                    guard.operands_string()
                ),
                None => write!(f, "BR {}()", symbol_to_str(&branch.id)),
            },
            Expr::Variable(var) => write!(f, "{}", symbol_to_str(&var.id)),
            Expr::ValueLiteral(lit) => write!(f, "{}", lit.value),
            Expr::SequenceLiteral(lit) => write!(f, "[{}]", symbol_to_str(&lit.id)),
            Expr::Error => write!(f, "Error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::notes_to_symbol;

    #[test]
    fn return_types() {
        assert_eq!(
            Expr::ValueLiteral(ValueLiteral { value: 3 }).return_type(),
            DataType::Value
        );
        assert_eq!(
            Expr::Variable(Variable {
                id: notes_to_symbol(&[60]),
                stack_offset: 0
            })
            .return_type(),
            DataType::Seq
        );
        assert_eq!(Expr::Error.return_type(), DataType::Error);
    }

    #[test]
    fn scope_key_display() {
        let key = ScopeKey {
            chord: notes_to_symbol(&[60, 64, 67]),
            arity: 2,
        };
        assert_eq!(key.to_string(), "ceg:2");
    }

    #[test]
    fn variable_display() {
        let var = Expr::Variable(Variable {
            id: notes_to_symbol(&[60, 62, 64]),
            stack_offset: 0,
        });
        assert_eq!(var.to_string(), "cde");
    }
}
