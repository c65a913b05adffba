//! The tree-walking evaluator.
//!
//! Walks a scope's statement list over a stack of [`DataRef`] slots. Each
//! named variable owns one slot; expression evaluation produces temporary
//! references that are consumed by the operation kernels. Function calls
//! push their arguments as the callee's leading slots, move the frame base,
//! and decouple the result from the callee's storage by casting it to a
//! value.

pub mod ops;

use crate::error::EvalError;
use crate::program::{Branch, Expr, Operation, Program, ScopeId, StmtIdx};
use crate::value::{new_seq, DataRef, DataType, Sequence};

pub struct Runtime {
    pub stack: Vec<DataRef>,
    /// Base of the active frame.
    pub stack_pos: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            stack_pos: 0,
        }
    }

    /// Run a scope body from `entry`, returning the last non-branch
    /// statement's result.
    pub fn execute(
        &mut self,
        program: &Program,
        scope: ScopeId,
        entry: StmtIdx,
    ) -> Result<DataRef, EvalError> {
        let stmts = &program.scope(scope).stmts;
        let mut result = DataRef::of_type(DataType::Undefined);
        let mut idx = entry;

        while idx < stmts.len() {
            match &stmts[idx] {
                Expr::Branch(branch) => idx = self.process_branch(program, branch)?,
                expr => {
                    result.release();
                    result = self.process_expr(program, expr)?;
                    idx += 1;
                }
            }
        }

        Ok(result)
    }

    /// Activate a scope and run its whole body; the result is decoupled
    /// from the callee's variables.
    pub fn execute_scope(&mut self, program: &Program, scope: ScopeId) -> Result<DataRef, EvalError> {
        self.push_scope(program, scope);
        let result = self.execute(program, scope, 0);
        self.pop_scope();
        result?.cast_to_vseq()
    }

    /// Grow the stack so every variable of `scope` has a slot. Slots past
    /// the already-pushed arguments start as fresh empty sequences.
    pub fn push_scope(&mut self, program: &Program, scope: ScopeId) {
        let target = self.stack_pos + program.scope(scope).vars.len();
        while self.stack.len() < target {
            self.push(DataRef::with_seq(
                DataType::Seq,
                new_seq(Sequence::new()),
                crate::value::Attr::All,
            ));
        }
    }

    /// Drop the active frame's slots.
    pub fn pop_scope(&mut self) {
        self.stack.truncate(self.stack_pos);
    }

    fn push(&mut self, mut r: DataRef) {
        r.stack_pos = Some(self.stack.len());
        self.stack.push(r);
    }

    fn process_branch(&mut self, program: &Program, branch: &Branch) -> Result<StmtIdx, EvalError> {
        let Some(guard) = &branch.guard else {
            return Ok(branch.down);
        };

        let v = self.process_operation(program, guard)?;
        if v.ty != DataType::Value {
            return Err(EvalError::system("branch guard produced a non-value"));
        }
        Ok(if v.value > 0 { branch.up } else { branch.down })
    }

    pub fn process_expr(&mut self, program: &Program, expr: &Expr) -> Result<DataRef, EvalError> {
        match expr {
            Expr::FunctionCall(call) => {
                let target = call.target.ok_or_else(|| {
                    EvalError::runtime(format!("Function definition for {} not found.", call.key))
                })?;

                let outer_pos = self.stack_pos;
                let frame_base = self.stack.len();

                if call.args.len() != program.scope(target).args.len() {
                    return Err(EvalError::system("argument count mismatch"));
                }

                for arg in &call.args {
                    match self.process_expr(program, arg).and_then(DataRef::cast_to_seq) {
                        Ok(value) => self.push(value),
                        Err(err) => {
                            self.stack.truncate(frame_base);
                            return Err(err);
                        }
                    }
                }

                self.stack_pos = frame_base;
                let result = self.execute_scope(program, target);
                self.stack_pos = outer_pos;
                result
            }
            Expr::Operation(op) => self.process_operation(program, op),
            Expr::Variable(var) => Ok(self.stack[self.stack_pos + var.stack_offset].duplicate()),
            Expr::ValueLiteral(lit) => Ok(DataRef::value(lit.value)),
            Expr::SequenceLiteral(lit) => Ok(DataRef::with_seq(
                DataType::SeqLit,
                lit.seq.clone(),
                crate::value::Attr::All,
            )),
            Expr::Branch(_) => Err(EvalError::system("branch in expression position")),
            Expr::Error => Ok(DataRef::of_type(DataType::Error)),
        }
    }

    fn process_operation(
        &mut self,
        program: &Program,
        op: &Operation,
    ) -> Result<DataRef, EvalError> {
        let mut lhs = self.process_expr(program, &op.lhs)?;
        let mut rhs = match &op.rhs {
            Some(rhs) => self.process_expr(program, rhs)?,
            None => DataRef::of_type(DataType::None),
        };

        lhs.implicit_cast(op.lhs_ty)?;
        rhs.implicit_cast(op.rhs_ty)?;

        let v = (op.kernel)(self, lhs, rhs)?;

        if v.ty != op.ret {
            return Err(EvalError::system(format!(
                "operation {} returned {}, expected {}",
                op.name,
                v.ty.name(),
                op.ret.name()
            )));
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::IefCode;
    use crate::syntax::{notes_to_symbol, notes_to_symbol_sorted, Ast, AstNode, SyntaxKind};

    fn leaf(kind: SyntaxKind, notes: &[u8]) -> AstNode {
        AstNode {
            kind,
            id: notes_to_symbol(notes),
            note_start: notes[0],
            children: Vec::new(),
        }
    }

    fn op(note: u8, children: Vec<AstNode>) -> AstNode {
        AstNode {
            kind: SyntaxKind::Operator,
            id: notes_to_symbol(&[note]),
            note_start: note,
            children,
        }
    }

    fn stmt_ast(root: AstNode) -> Ast {
        Ast {
            nodes: vec![root],
            ief_code: IefCode::Default,
            error: false,
        }
    }

    fn value_literal(digits: &[i64]) -> AstNode {
        // Build a literal whose intervals spell the given digits upward.
        let mut notes = vec![60u8];
        for &d in digits {
            let next = notes.last().unwrap() + d as u8;
            notes.push(next);
        }
        leaf(SyntaxKind::ValueLiteral, &notes)
    }

    fn run_global(program: &mut Program, runtime: &mut Runtime, entry: usize) -> DataRef {
        program.resolve_links();
        runtime.push_scope(program, program.global);
        runtime.execute(program, program.global, entry).unwrap()
    }

    #[test]
    fn value_literal_evaluates_to_scalar() {
        let mut p = Program::new();
        let mut rt = Runtime::new();
        p.add_ast(&stmt_ast(value_literal(&[3, 1, 4, 1])));
        let v = run_global(&mut p, &mut rt, 0);
        assert_eq!(v.ty, DataType::Value);
        assert_eq!(v.value, 3141);
    }

    #[test]
    fn variable_assignment_updates_stack_slot() {
        // x DO 5 : resize the fresh variable to five elements.
        let mut p = Program::new();
        let mut rt = Runtime::new();
        let assign = op(
            60,
            vec![leaf(SyntaxKind::Variable, &[50, 52]), value_literal(&[5])],
        );
        assert!(p.add_ast(&stmt_ast(assign)));
        let v = run_global(&mut p, &mut rt, 0);
        assert_eq!(v.ty, DataType::Seq);
        assert_eq!(rt.stack[0].length(), 5);
        assert_eq!(v.length(), 5);
    }

    #[test]
    fn branch_loop_terminates() {
        // x DO 5; b: (0 MI x); x SO 1; b: (0 MI x) — the opening guard
        // enters the loop, the closing guard repeats it. x shrinks to
        // empty in five passes, then the loop falls out.
        let mut p = Program::new();
        let mut rt = Runtime::new();
        let x = || leaf(SyntaxKind::Variable, &[50, 52]);

        p.add_ast(&stmt_ast(op(60, vec![x(), value_literal(&[5])])));

        let guard_branch = AstNode {
            kind: SyntaxKind::Branch,
            id: notes_to_symbol_sorted(&[62, 65]),
            note_start: 62,
            children: vec![value_literal(&[]), x()],
        };
        p.add_ast(&stmt_ast(guard_branch.clone()));
        p.add_ast(&stmt_ast(op(67, vec![x(), value_literal(&[1])])));
        p.add_ast(&stmt_ast(guard_branch));

        let v = run_global(&mut p, &mut rt, 0);
        // Execution finished: the loop ran five times and x is empty.
        assert_eq!(rt.stack[0].length(), 0);
        assert_eq!(v.ty, DataType::Seq);
    }

    #[test]
    fn false_opening_guard_skips_loop_body() {
        // x stays empty: the opening guard fails and jumps past the
        // closing branch.
        let mut p = Program::new();
        let mut rt = Runtime::new();
        let x = || leaf(SyntaxKind::Variable, &[50, 52]);

        let guard_branch = AstNode {
            kind: SyntaxKind::Branch,
            id: notes_to_symbol_sorted(&[62, 65]),
            note_start: 62,
            children: vec![value_literal(&[]), x()],
        };
        p.add_ast(&stmt_ast(guard_branch.clone()));
        p.add_ast(&stmt_ast(op(65, vec![x(), value_literal(&[7])])));
        p.add_ast(&stmt_ast(guard_branch));
        p.add_ast(&stmt_ast(value_literal(&[9])));

        let v = run_global(&mut p, &mut rt, 0);
        assert_eq!(rt.stack[0].length(), 0, "loop body must not run");
        assert_eq!(v.value, 9);
    }

    #[test]
    fn lone_branch_without_guard_falls_through() {
        let mut p = Program::new();
        let mut rt = Runtime::new();
        p.add_ast(&stmt_ast(AstNode {
            kind: SyntaxKind::Branch,
            id: notes_to_symbol_sorted(&[60, 64]),
            note_start: 60,
            children: Vec::new(),
        }));
        p.add_ast(&stmt_ast(value_literal(&[7])));
        let v = run_global(&mut p, &mut rt, 0);
        assert_eq!(v.value, 7);
    }

    #[test]
    fn function_call_returns_decoupled_value() {
        let mut p = Program::new();
        let mut rt = Runtime::new();
        let def = |p: &mut Program| {
            p.add_ast(&stmt_ast(AstNode {
                kind: SyntaxKind::FunctionDef,
                id: notes_to_symbol_sorted(&[60, 64, 67]),
                note_start: 60,
                children: Vec::new(),
            }));
        };

        // Define ceg(a): a DO 3 — resize the argument to length three.
        def(&mut p);
        p.add_ast(&stmt_ast(leaf(SyntaxKind::Variable, &[72, 74])));
        def(&mut p);
        p.add_ast(&stmt_ast(op(
            60,
            vec![leaf(SyntaxKind::Variable, &[72, 74]), value_literal(&[3])],
        )));
        def(&mut p);
        assert!(p.at_global_scope());

        // Global: x DO 9, then call ceg(x).
        p.add_ast(&stmt_ast(op(
            60,
            vec![leaf(SyntaxKind::Variable, &[50, 52]), value_literal(&[9])],
        )));
        let entry = p.global_stmt_len();
        p.add_ast(&stmt_ast(AstNode {
            kind: SyntaxKind::FunctionCall,
            id: notes_to_symbol_sorted(&[60, 64, 67]),
            note_start: 60,
            children: vec![leaf(SyntaxKind::Variable, &[50, 52])],
        }));

        run_global(&mut p, &mut rt, 0);
        let v = rt
            .execute(&p, p.global, entry)
            .expect("call should succeed");
        // Arguments are passed by reference: the callee's resize reaches
        // the caller's variable.
        assert_eq!(rt.stack[0].length(), 3);
        // The result is a private value, no longer tied to any variable.
        assert_eq!(v.ty, DataType::Vseq);
        assert_eq!(v.length(), 3);
        assert_eq!(v.ref_count(), 1);
        // The callee frame was dropped.
        assert_eq!(rt.stack.len(), p.scope(p.global).vars.len());
    }

    #[test]
    fn calling_undefined_function_is_runtime_error() {
        let mut p = Program::new();
        let mut rt = Runtime::new();
        p.add_ast(&stmt_ast(AstNode {
            kind: SyntaxKind::FunctionCall,
            id: notes_to_symbol_sorted(&[60, 63, 67]),
            note_start: 60,
            children: Vec::new(),
        }));
        p.resolve_links();
        rt.push_scope(&p, p.global);
        let err = rt.execute(&p, p.global, 0).unwrap_err();
        assert!(err.message.contains("not found"));
    }

    #[test]
    fn error_statement_evaluates_to_error() {
        let p = Program::new();
        let mut rt = Runtime::new();
        let v = rt.process_expr(&p, &Expr::Error).unwrap();
        assert_eq!(v.ty, DataType::Error);
    }
}
