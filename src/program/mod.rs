//! The static environment: a tree of scopes, each holding a bound statement
//! list.
//!
//! Phrases arrive as ASTs and are bound into [`Expr`] trees inside the
//! current scope. Function definitions open a child scope that advances
//! through signature → body → defined; branch targets and forward function
//! references are linked after the fact, so mutually recursive phrases can
//! be performed in any order.

pub mod expr;

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::error::EvalError;
use crate::midi::IefCode;
use crate::runtime::ops::{self, OpGroup};
use crate::syntax::{symbol_to_str, Ast, AstNode, Symbol, SyntaxKind};
use crate::value::{new_seq, DataType, Sequence, SeqRef};

pub use expr::{
    Branch, Expr, FunctionCall, Operation, ScopeId, ScopeKey, SequenceLiteral, StmtIdx,
    ValueLiteral, Variable, UNLINKED,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Signature,
    Body,
    Defined,
}

/// A sequence literal waiting for its live capture to start.
pub struct SeqLitRequest {
    pub id: Symbol,
    pub note: u8,
    pub seq: SeqRef,
}

pub struct Scope {
    pub parent: Option<ScopeId>,
    pub chord: Symbol,
    pub key: Option<ScopeKey>,
    pub root_note: u8,
    pub stage: Stage,
    pub args: Vec<Symbol>,
    /// Superset of `args`; later variables are introduced by first use.
    pub vars: Vec<Symbol>,
    pub stmts: Vec<Expr>,
    pub children: Vec<ScopeId>,
    /// Literal captures not yet handed to the syntax parser.
    pub pending_literals: VecDeque<SeqLitRequest>,
    /// Every literal this scope has seen, for de-duplication by id.
    pub literals: Vec<(Symbol, SeqRef)>,
    pub ief_code: IefCode,
}

impl Scope {
    fn new(parent: Option<ScopeId>, chord: Symbol, stage: Stage) -> Self {
        Self {
            parent,
            chord,
            key: None,
            root_note: 0,
            stage,
            args: Vec::new(),
            vars: Vec::new(),
            stmts: Vec::new(),
            children: Vec::new(),
            pending_literals: VecDeque::new(),
            literals: Vec::new(),
            ief_code: IefCode::Default,
        }
    }
}

pub struct Program {
    scopes: Vec<Scope>,
    pub global: ScopeId,
    /// The scope currently receiving phrases.
    pub tail: ScopeId,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    pub fn new() -> Self {
        let global = Scope::new(None, Symbol::new(), Stage::Body);
        Self {
            scopes: vec![global],
            global: ScopeId(0),
            tail: ScopeId(0),
        }
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    pub fn at_global_scope(&self) -> bool {
        self.tail == self.global
    }

    pub fn global_stmt_len(&self) -> usize {
        self.scope(self.global).stmts.len()
    }

    /// Add one phrase. Returns `true` when a new statement landed in the
    /// global body and should be dispatched for execution.
    pub fn add_ast(&mut self, ast: &Ast) -> bool {
        if ast.error {
            return false;
        }
        let Some(root) = ast.root() else {
            return false;
        };

        let tail = self.tail;
        self.scope_mut(tail).ief_code = ast.ief_code;

        if root.kind == SyntaxKind::FunctionDef {
            self.process_function_def(root);
            return false;
        }

        match self.scope(tail).stage {
            Stage::Signature => {
                self.add_to_signature(tail, root);
                false
            }
            Stage::Body => {
                let appended = self.add_to_body(tail, root);
                appended && tail == self.global
            }
            Stage::Defined => false,
        }
    }

    fn process_function_def(&mut self, root: &AstNode) {
        let tail = self.tail;
        if self.scope(tail).chord == root.id {
            self.complete_stage(tail);
        } else {
            let id = ScopeId(self.scopes.len());
            self.scopes
                .push(Scope::new(Some(tail), root.id.clone(), Stage::Signature));
            self.tail = id;
        }
    }

    fn complete_stage(&mut self, id: ScopeId) {
        match self.scope(id).stage {
            Stage::Signature => {
                let scope = self.scope_mut(id);
                scope.key = Some(ScopeKey {
                    chord: scope.chord.clone(),
                    arity: scope.args.len(),
                });
                scope.vars = scope.args.clone();
                scope.stage = Stage::Body;
            }
            Stage::Body => {
                self.resolve_branch_links(id);
                self.scope_mut(id).stage = Stage::Defined;
                if let Some(parent) = self.scope(id).parent {
                    self.scope_mut(parent).children.push(id);
                    self.tail = parent;
                }
            }
            Stage::Defined => {}
        }
    }

    fn add_to_signature(&mut self, id: ScopeId, root: &AstNode) -> bool {
        if root.kind == SyntaxKind::Variable {
            self.scope_mut(id).args.push(root.id.clone());
            return true;
        }
        false
    }

    fn add_to_body(&mut self, id: ScopeId, root: &AstNode) -> bool {
        match self.build_statement(id, root) {
            Ok(expr) => {
                self.scope_mut(id).stmts.push(expr);
                true
            }
            Err(err) => {
                eprintln!("{err}");
                self.scope_mut(id).stmts.push(Expr::Error);
                false
            }
        }
    }

    /// Bind a phrase root. Branches and leftmost operators are only legal
    /// here.
    pub fn build_statement(&mut self, id: ScopeId, root: &AstNode) -> Result<Expr, EvalError> {
        match root.kind {
            SyntaxKind::Branch => Ok(Expr::Branch(self.build_branch(id, root)?)),
            SyntaxKind::Operator => Ok(Expr::Operation(self.build_operator_node(id, root, true)?)),
            _ => self.build_expr(id, root),
        }
    }

    fn build_expr(&mut self, id: ScopeId, node: &AstNode) -> Result<Expr, EvalError> {
        match node.kind {
            SyntaxKind::FunctionCall => Ok(Expr::FunctionCall(self.build_function_call(id, node)?)),
            SyntaxKind::Operator => Ok(Expr::Operation(self.build_operator_node(id, node, false)?)),
            SyntaxKind::Variable => Ok(Expr::Variable(self.build_variable(id, node))),
            SyntaxKind::ValueLiteral => Ok(Expr::ValueLiteral(build_value_literal(node))),
            SyntaxKind::SequenceLiteral => {
                Ok(Expr::SequenceLiteral(self.build_sequence_literal(id, node)))
            }
            _ => Err(EvalError::bind("malformed phrase")),
        }
    }

    fn build_function_call(
        &mut self,
        id: ScopeId,
        node: &AstNode,
    ) -> Result<FunctionCall, EvalError> {
        let mut args = Vec::with_capacity(node.children.len());
        for child in &node.children {
            args.push(self.build_expr(id, child)?);
        }

        let key = ScopeKey {
            chord: node.id.clone(),
            arity: args.len(),
        };
        let target = self.query_scope(id, &key);

        Ok(FunctionCall {
            chord: node.id.clone(),
            key,
            args,
            target,
        })
    }

    fn build_branch(&mut self, id: ScopeId, node: &AstNode) -> Result<Branch, EvalError> {
        let guard = if node.children.is_empty() {
            None
        } else {
            let note = node.id[0] as u8;
            let op = self.build_operation(id, note, OpGroup::Mi, &node.children, false)?;
            if op.ret != DataType::Value {
                return Err(EvalError::system("branch guard must produce a value"));
            }
            Some(Box::new(op))
        };

        Ok(Branch {
            id: node.id.clone(),
            guard,
            up: UNLINKED,
            down: UNLINKED,
        })
    }

    fn build_operator_node(
        &mut self,
        id: ScopeId,
        node: &AstNode,
        leftmost: bool,
    ) -> Result<Operation, EvalError> {
        let note = node.id[0] as u8;
        let group = ops::group_for_note(note, self.scope(id).root_note);
        self.build_operation(id, note, group, &node.children, leftmost)
    }

    /// Bind an operand chain left-associatively: `a op b op c` becomes
    /// `(a op b) op c`. A leftmost chain keeps its leftmost child as an
    /// assignment target; everything else is forced to a value type.
    fn build_operation(
        &mut self,
        id: ScopeId,
        note: u8,
        group: OpGroup,
        operands: &[AstNode],
        leftmost: bool,
    ) -> Result<Operation, EvalError> {
        let force_copy = !leftmost;
        let Some(first) = operands.first() else {
            return Err(EvalError::bind("operator without operands"));
        };

        let lhs = if leftmost && first.kind == SyntaxKind::Operator {
            // A chain like `a op b op c` parses nested; keep the leftmost
            // child an assignment target all the way down.
            Expr::Operation(self.build_operator_node(id, first, true)?)
        } else {
            self.build_expr(id, first)?
        };

        if operands.len() == 1 {
            return bind_operation(group, note, lhs, None, force_copy);
        }

        let rhs = self.build_expr(id, &operands[1])?;
        let mut op = bind_operation(group, note, lhs, Some(rhs), force_copy)?;

        for rest in &operands[2..] {
            let rhs = self.build_expr(id, rest)?;
            op = bind_operation(group, note, Expr::Operation(op), Some(rhs), force_copy)?;
        }

        Ok(op)
    }

    fn build_variable(&mut self, id: ScopeId, node: &AstNode) -> Variable {
        let scope = self.scope_mut(id);
        let stack_offset = match scope.vars.iter().position(|v| *v == node.id) {
            Some(pos) => pos,
            None => {
                scope.vars.push(node.id.clone());
                scope.vars.len() - 1
            }
        };
        Variable {
            id: node.id.clone(),
            stack_offset,
        }
    }

    fn build_sequence_literal(&mut self, id: ScopeId, node: &AstNode) -> SequenceLiteral {
        let scope = self.scope_mut(id);

        if let Some((_, seq)) = scope.literals.iter().find(|(lit_id, _)| *lit_id == node.id) {
            return SequenceLiteral {
                id: node.id.clone(),
                note: node.note_start,
                seq: seq.clone(),
            };
        }

        let seq = new_seq(Sequence::pending());
        scope.literals.push((node.id.clone(), seq.clone()));
        scope.pending_literals.push_back(SeqLitRequest {
            id: node.id.clone(),
            note: node.note_start,
            seq: seq.clone(),
        });

        SequenceLiteral {
            id: node.id.clone(),
            note: node.note_start,
            seq,
        }
    }

    /// Search this scope and its ancestors for a defined function.
    pub fn query_scope(&self, from: ScopeId, key: &ScopeKey) -> Option<ScopeId> {
        let mut cursor = Some(from);
        while let Some(id) = cursor {
            for &child in &self.scope(id).children {
                if self.scope(child).key.as_ref() == Some(key) {
                    return Some(child);
                }
            }
            cursor = self.scope(id).parent;
        }
        None
    }

    pub fn has_pending_literal(&self) -> bool {
        !self.scope(self.tail).pending_literals.is_empty()
    }

    pub fn take_pending_literal(&mut self) -> Option<SeqLitRequest> {
        self.scope_mut(self.tail).pending_literals.pop_front()
    }

    /// Link branch targets and forward function references. Safe to re-run
    /// as the global body grows.
    pub fn resolve_links(&mut self) {
        self.resolve_branch_links(self.global);
        self.resolve_function_links();
    }

    /// For each branch, the default targets fall through to the next
    /// statement; a later branch with the same id closes a loop: jumping
    /// up re-enters after the first branch, jumping down leaves past the
    /// second.
    fn resolve_branch_links(&mut self, id: ScopeId) {
        let stmts = &mut self.scope_mut(id).stmts;
        let len = stmts.len();

        for i in 0..len {
            let branch_id = match &stmts[i] {
                Expr::Branch(b) => b.id.clone(),
                _ => continue,
            };

            let partner = (i + 1..len).find(|&j| match &stmts[j] {
                Expr::Branch(b) => b.id == branch_id,
                _ => false,
            });

            let mut down = i + 1;
            if let Some(j) = partner {
                down = j + 1;
                if let Expr::Branch(b) = &mut stmts[j] {
                    b.up = i + 1;
                }
            }
            if let Expr::Branch(b) = &mut stmts[i] {
                b.down = down;
                if b.up == UNLINKED {
                    b.up = i + 1;
                }
            }
        }
    }

    fn resolve_function_links(&mut self) {
        // Resolution depends on the containing scope, so gather first and
        // patch second.
        let mut resolved: HashMap<(usize, ScopeKey), ScopeId> = HashMap::new();
        for idx in 0..self.scopes.len() {
            let mut keys = Vec::new();
            for stmt in &self.scopes[idx].stmts {
                collect_unresolved_calls(stmt, &mut keys);
            }
            for key in keys {
                if let Some(target) = self.query_scope(ScopeId(idx), &key) {
                    resolved.insert((idx, key), target);
                }
            }
        }

        for (idx, scope) in self.scopes.iter_mut().enumerate() {
            for stmt in &mut scope.stmts {
                patch_calls(stmt, idx, &resolved);
            }
        }
    }
}

fn bind_operation(
    group: OpGroup,
    note: u8,
    lhs: Expr,
    rhs: Option<Expr>,
    force_copy: bool,
) -> Result<Operation, EvalError> {
    let lhs_ty = lhs.return_type();
    let rhs_ty = rhs.as_ref().map_or(DataType::None, Expr::return_type);

    let (bound_lhs, bound_rhs, entry) =
        ops::resolve(group, lhs_ty, rhs_ty, force_copy).ok_or_else(|| {
            EvalError::bind(format!(
                "no {} operation for {} and {}",
                group.name(),
                lhs_ty.name(),
                rhs_ty.name()
            ))
        })?;

    Ok(Operation {
        lhs: Box::new(lhs),
        rhs: rhs.map(Box::new),
        lhs_ty: bound_lhs,
        rhs_ty: bound_rhs,
        note,
        group,
        name: entry.name,
        ret: entry.ret,
        kernel: entry.kernel,
    })
}

fn build_value_literal(node: &AstNode) -> ValueLiteral {
    let sym = &node.id;
    let mut value: i64 = 0;
    for &delta in &sym[1..] {
        value = value * 10 + (delta as i64).abs() % 10;
    }
    if sym.len() > 1 && sym[1] < 0 {
        value = -value;
    }
    ValueLiteral { value }
}

fn collect_unresolved_calls(expr: &Expr, out: &mut Vec<ScopeKey>) {
    match expr {
        Expr::FunctionCall(call) => {
            if call.target.is_none() {
                out.push(call.key.clone());
            }
            for arg in &call.args {
                collect_unresolved_calls(arg, out);
            }
        }
        Expr::Operation(op) => {
            collect_unresolved_calls(&op.lhs, out);
            if let Some(rhs) = &op.rhs {
                collect_unresolved_calls(rhs, out);
            }
        }
        Expr::Branch(branch) => {
            if let Some(guard) = &branch.guard {
                collect_unresolved_calls(&guard.lhs, out);
                if let Some(rhs) = &guard.rhs {
                    collect_unresolved_calls(rhs, out);
                }
            }
        }
        _ => {}
    }
}

fn patch_calls(expr: &mut Expr, scope_idx: usize, resolved: &HashMap<(usize, ScopeKey), ScopeId>) {
    match expr {
        Expr::FunctionCall(call) => {
            if call.target.is_none() {
                call.target = resolved.get(&(scope_idx, call.key.clone())).copied();
            }
            for arg in &mut call.args {
                patch_calls(arg, scope_idx, resolved);
            }
        }
        Expr::Operation(op) => {
            patch_calls(&mut op.lhs, scope_idx, resolved);
            if let Some(rhs) = &mut op.rhs {
                patch_calls(rhs, scope_idx, resolved);
            }
        }
        Expr::Branch(branch) => {
            if let Some(guard) = &mut branch.guard {
                patch_calls(&mut guard.lhs, scope_idx, resolved);
                if let Some(rhs) = &mut guard.rhs {
                    patch_calls(rhs, scope_idx, resolved);
                }
            }
        }
        _ => {}
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GLOBAL")?;
        writeln!(f, "--------")?;
        for stmt in &self.scope(self.global).stmts {
            writeln!(f, "    {stmt}")?;
        }
        for &child in &self.scope(self.global).children {
            self.fmt_scope(f, child)?;
        }
        writeln!(f, "--------")
    }
}

impl Program {
    fn fmt_scope(&self, f: &mut fmt::Formatter<'_>, id: ScopeId) -> fmt::Result {
        let scope = self.scope(id);
        let args: Vec<String> = scope.args.iter().map(symbol_to_str).collect();
        writeln!(
            f,
            "\nFN {}( {} ):",
            symbol_to_str(&scope.chord),
            args.join(", ")
        )?;
        for stmt in &scope.stmts {
            writeln!(f, "    {stmt}")?;
        }
        for &child in &scope.children {
            self.fmt_scope(f, child)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{notes_to_symbol, notes_to_symbol_sorted};

    fn leaf(kind: SyntaxKind, notes: &[u8]) -> AstNode {
        AstNode {
            kind,
            id: notes_to_symbol(notes),
            note_start: notes[0],
            children: Vec::new(),
        }
    }

    fn ast_with_root(root: AstNode) -> Ast {
        Ast {
            nodes: vec![root],
            ief_code: IefCode::Default,
            error: false,
        }
    }

    fn def_chord(notes: &[u8]) -> Ast {
        ast_with_root(AstNode {
            kind: SyntaxKind::FunctionDef,
            id: notes_to_symbol_sorted(notes),
            note_start: notes[0],
            children: Vec::new(),
        })
    }

    #[test]
    fn function_def_opens_signature_scope() {
        let mut p = Program::new();
        assert!(!p.add_ast(&def_chord(&[60, 64, 67])));
        assert!(!p.at_global_scope());
        let scope = p.scope(p.tail);
        assert_eq!(scope.stage, Stage::Signature);
        assert!(scope.key.is_none());
    }

    #[test]
    fn repeated_def_chord_advances_stages() {
        let mut p = Program::new();
        p.add_ast(&def_chord(&[60, 64, 67]));
        // Close the signature: grants the arity-qualified id.
        p.add_ast(&def_chord(&[60, 64, 67]));
        let tail = p.tail;
        assert_eq!(p.scope(tail).stage, Stage::Body);
        assert_eq!(p.scope(tail).key.as_ref().unwrap().to_string(), "ceg:0");

        // Close the body: the scope becomes visible to its parent.
        p.add_ast(&def_chord(&[60, 64, 67]));
        assert!(p.at_global_scope());
        assert_eq!(p.scope(p.global).children.len(), 1);
    }

    #[test]
    fn signature_collects_argument_names() {
        let mut p = Program::new();
        p.add_ast(&def_chord(&[60, 64, 67]));
        p.add_ast(&ast_with_root(leaf(SyntaxKind::Variable, &[72, 74])));
        p.add_ast(&def_chord(&[60, 64, 67]));
        let tail = p.tail;
        assert_eq!(p.scope(tail).args.len(), 1);
        assert_eq!(p.scope(tail).vars.len(), 1);
        assert_eq!(p.scope(tail).key.as_ref().unwrap().arity, 1);
    }

    #[test]
    fn value_literal_decodes_digits() {
        // Intervals 3, 1, 4, 1 upward: 3141.
        let node = leaf(SyntaxKind::ValueLiteral, &[70, 73, 74, 78, 79]);
        assert_eq!(build_value_literal(&node).value, 3141);
    }

    #[test]
    fn value_literal_first_interval_sets_sign() {
        let node = leaf(SyntaxKind::ValueLiteral, &[70, 67, 71]);
        assert_eq!(build_value_literal(&node).value, -34);
        let single = leaf(SyntaxKind::ValueLiteral, &[70]);
        assert_eq!(build_value_literal(&single).value, 0);
    }

    #[test]
    fn variables_bind_by_first_use() {
        let mut p = Program::new();
        let global = p.global;
        let x = leaf(SyntaxKind::Variable, &[60, 62]);
        let y = leaf(SyntaxKind::Variable, &[65, 67]);

        let expr = p.build_statement(global, &x).unwrap();
        match expr {
            Expr::Variable(v) => assert_eq!(v.stack_offset, 0),
            _ => panic!("expected variable"),
        }
        let expr = p.build_statement(global, &y).unwrap();
        match expr {
            Expr::Variable(v) => assert_eq!(v.stack_offset, 1),
            _ => panic!("expected variable"),
        }
        // Re-use binds to the same slot.
        let expr = p.build_statement(global, &x).unwrap();
        match expr {
            Expr::Variable(v) => assert_eq!(v.stack_offset, 0),
            _ => panic!("expected variable"),
        }
    }

    #[test]
    fn operator_chain_binds_left_associatively() {
        // x FA 1 2 → ADD( ADD( x, 1 ), 2 ) with the leftmost lhs kept SEQ.
        let mut p = Program::new();
        let global = p.global;
        let op = AstNode {
            kind: SyntaxKind::Operator,
            id: notes_to_symbol(&[65]),
            note_start: 65,
            children: vec![
                leaf(SyntaxKind::Variable, &[60, 62]),
                leaf(SyntaxKind::ValueLiteral, &[70, 71]),
                leaf(SyntaxKind::ValueLiteral, &[70, 72]),
            ],
        };
        let expr = p.build_statement(global, &op).unwrap();
        let Expr::Operation(outer) = expr else {
            panic!("expected operation");
        };
        assert_eq!(outer.name, "ADD");
        assert_eq!(outer.ret, DataType::Seq);
        let Expr::Operation(inner) = &*outer.lhs else {
            panic!("expected nested operation");
        };
        assert_eq!(inner.lhs_ty, DataType::Seq);
        assert!(matches!(&*inner.lhs, Expr::Variable(_)));
    }

    #[test]
    fn rhs_variable_widens_to_value_type() {
        let mut p = Program::new();
        let global = p.global;
        // A variable as a bare statement keeps SEQ; as a right-hand operand
        // it widens to VSEQ.
        let op = AstNode {
            kind: SyntaxKind::Operator,
            id: notes_to_symbol(&[65]),
            note_start: 65,
            children: vec![
                leaf(SyntaxKind::Variable, &[60, 62]),
                leaf(SyntaxKind::Variable, &[65, 67]),
            ],
        };
        let expr = p.build_statement(global, &op).unwrap();
        let Expr::Operation(outer) = expr else {
            panic!("expected operation");
        };
        assert_eq!(outer.lhs_ty, DataType::Seq);
        assert_eq!(outer.rhs_ty, DataType::Vseq);
    }

    #[test]
    fn unresolvable_overload_is_a_bind_error() {
        let mut p = Program::new();
        let global = p.global;
        // DO with an indexer lhs has no overload anywhere on the lattice.
        let op = AstNode {
            kind: SyntaxKind::Operator,
            id: notes_to_symbol(&[60]),
            note_start: 60,
            children: vec![AstNode {
                kind: SyntaxKind::Operator,
                id: notes_to_symbol(&[61]),
                note_start: 61,
                children: vec![
                    leaf(SyntaxKind::ValueLiteral, &[70, 71]),
                    leaf(SyntaxKind::ValueLiteral, &[70, 72]),
                ],
            }],
        };
        // Inner RE builds an INDEXER; outer DO cannot accept it.
        let err = p.build_statement(global, &op).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Bind);
    }

    #[test]
    fn sequence_literals_deduplicate_by_id() {
        let mut p = Program::new();
        let global = p.global;
        let lit = leaf(SyntaxKind::SequenceLiteral, &[40, 40, 40]);

        let a = p.build_statement(global, &lit).unwrap();
        assert!(p.has_pending_literal());
        let req = p.take_pending_literal().unwrap();
        assert!(!p.has_pending_literal());

        // Same id again: shares the first sequence, no new capture.
        let b = p.build_statement(global, &lit).unwrap();
        assert!(!p.has_pending_literal());

        let (Expr::SequenceLiteral(a), Expr::SequenceLiteral(b)) = (a, b) else {
            panic!("expected sequence literals");
        };
        assert!(std::sync::Arc::ptr_eq(&a.seq, &b.seq));
        assert!(std::sync::Arc::ptr_eq(&a.seq, &req.seq));
    }

    #[test]
    fn branch_pairs_link_into_loops() {
        let mut p = Program::new();
        let global = p.global;
        let branch = AstNode {
            kind: SyntaxKind::Branch,
            id: notes_to_symbol_sorted(&[60, 64]),
            note_start: 60,
            children: Vec::new(),
        };
        let body = leaf(SyntaxKind::Variable, &[50, 52]);

        p.add_ast(&ast_with_root(branch.clone()));
        p.add_ast(&ast_with_root(body));
        p.add_ast(&ast_with_root(branch.clone()));
        p.resolve_links();

        let stmts = &p.scope(global).stmts;
        let Expr::Branch(first) = &stmts[0] else {
            panic!("expected branch");
        };
        let Expr::Branch(second) = &stmts[2] else {
            panic!("expected branch");
        };
        assert_eq!(first.up, 1);
        assert_eq!(first.down, 3);
        assert_eq!(second.up, 1);
        assert_eq!(second.down, 3);
    }

    #[test]
    fn lone_branch_falls_through() {
        let mut p = Program::new();
        let global = p.global;
        let branch = AstNode {
            kind: SyntaxKind::Branch,
            id: notes_to_symbol_sorted(&[60, 64]),
            note_start: 60,
            children: Vec::new(),
        };
        p.add_ast(&ast_with_root(branch));
        p.add_ast(&ast_with_root(leaf(SyntaxKind::Variable, &[50, 52])));
        p.resolve_links();

        let Expr::Branch(b) = &p.scope(global).stmts[0] else {
            panic!("expected branch");
        };
        assert_eq!(b.up, 1);
        assert_eq!(b.down, 1);
    }

    #[test]
    fn forward_calls_resolve_after_definition() {
        let mut p = Program::new();
        let call = AstNode {
            kind: SyntaxKind::FunctionCall,
            id: notes_to_symbol_sorted(&[60, 64, 67]),
            note_start: 60,
            children: Vec::new(),
        };
        p.add_ast(&ast_with_root(call));
        let Expr::FunctionCall(fc) = &p.scope(p.global).stmts[0] else {
            panic!("expected call");
        };
        assert!(fc.target.is_none());

        // Define ceg with arity 0, then re-link.
        p.add_ast(&def_chord(&[60, 64, 67]));
        p.add_ast(&def_chord(&[60, 64, 67]));
        p.add_ast(&def_chord(&[60, 64, 67]));
        p.resolve_links();

        let Expr::FunctionCall(fc) = &p.scope(p.global).stmts[0] else {
            panic!("expected call");
        };
        assert!(fc.target.is_some());
    }

}
