//! Disambiguation of a finished concrete syntax tree into typed syntactic
//! forms.
//!
//! Roles are tried in priority order for each starting node: function
//! def/call, branch, operator, variable, value literal, sequence literal,
//! separator. The *split* pitch — the highest bass/chord pitch seen so far
//! in the subtree — decides whether a staccato note reads as a digit (above)
//! or a sequence-literal/separator stroke (below).

use crate::midi::IefCode;

use super::cst::{Cst, NodeId};
use super::symbol::{notes_to_symbol, notes_to_symbol_sorted, Symbol};

pub const FUNCTION_MIN_ID_LEN: usize = 3;
pub const BRANCH_ID_LEN: usize = 2;
pub const SEQ_LITERAL_MIN_ID_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxKind {
    FunctionDef,
    FunctionCall,
    Branch,
    Operator,
    Variable,
    ValueLiteral,
    SequenceLiteral,
    Error,
}

#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: SyntaxKind,
    pub id: Symbol,
    pub note_start: u8,
    pub children: Vec<AstNode>,
}

#[derive(Debug, Default)]
pub struct Ast {
    pub nodes: Vec<AstNode>,
    /// Override op-code carried by vendor SysEx for this phrase.
    pub ief_code: IefCode,
    pub error: bool,
}

impl Ast {
    pub fn from_cst(cst: &Cst) -> Self {
        let mut ast = Ast::default();
        let mut error = false;
        ast.nodes = traverse(cst, cst.head(), true, 0, &mut error);
        ast.error = error;
        ast
    }

    pub fn root(&self) -> Option<&AstNode> {
        self.nodes.first()
    }
}

fn is_chord_start(cst: &Cst, id: NodeId) -> bool {
    let n = cst.node(id);
    !n.excl_chord && n.has_child()
}

fn is_chord_extension(cst: &Cst, id: Option<NodeId>) -> bool {
    id.is_some_and(|id| {
        let n = cst.node(id);
        !n.excl_chord && !n.has_sibling()
    })
}

fn is_bass(cst: &Cst, id: NodeId) -> bool {
    let n = cst.node(id);
    !n.excl_bass && n.has_child()
}

fn is_melody_start(cst: &Cst, id: NodeId) -> bool {
    let n = cst.node(id);
    !n.excl_melody && n.has_child()
}

fn is_melody_continuation(cst: &Cst, id: Option<NodeId>) -> bool {
    id.is_some_and(|id| {
        let n = cst.node(id);
        !n.excl_melody && !n.has_sibling()
    })
}

fn is_staccato_above(cst: &Cst, id: Option<NodeId>, split: u8) -> bool {
    id.is_some_and(|id| {
        let n = cst.node(id);
        !n.excl_staccato && !n.has_child() && n.note > split
    })
}

fn is_staccato_below(cst: &Cst, id: Option<NodeId>, split: u8) -> bool {
    id.is_some_and(|id| {
        let n = cst.node(id);
        !n.excl_staccato && !n.has_child() && n.note <= split
    })
}

/// Disambiguate the node at `start` and every sibling after it.
fn traverse(
    cst: &Cst,
    start: Option<NodeId>,
    is_root: bool,
    split: u8,
    error: &mut bool,
) -> Vec<AstNode> {
    let Some(start_id) = start else {
        return Vec::new();
    };

    let split_start = split;
    let start_node = cst.node(start_id);
    let mut sibling = start_node.sibling;
    let mut child: Option<NodeId> = None;
    let mut split = split;

    let mut notes: Vec<u8> = vec![start_node.note];
    let note_start = start_node.note;

    let mut kind = None;
    let mut id: Symbol = Vec::new();

    // Function def/call or branch: a chord-start chain.
    if kind.is_none() && is_chord_start(cst, start_id) {
        split = split.max(start_node.note);
        let mut cursor = start_node.child;

        while is_chord_extension(cst, cursor) {
            let n = cst.node(cursor.unwrap());
            notes.push(n.note);
            split = split.max(n.note);
            cursor = n.child;
        }

        if notes.len() >= FUNCTION_MIN_ID_LEN {
            id = notes_to_symbol_sorted(&notes);
            kind = Some(if is_root && cursor.is_none() {
                SyntaxKind::FunctionDef
            } else {
                SyntaxKind::FunctionCall
            });
            child = cursor;
        } else if is_root && notes.len() == BRANCH_ID_LEN {
            id = notes_to_symbol_sorted(&notes);
            kind = Some(SyntaxKind::Branch);
            child = cursor;
        } else {
            // Fell through: retry the other roles from the start node.
            split = split_start;
            notes.truncate(1);
        }
    }

    // Operator: a bass with at least one child.
    if kind.is_none() && is_bass(cst, start_id) {
        split = split.max(start_node.note);
        id = notes_to_symbol(&notes);
        kind = Some(SyntaxKind::Operator);
        child = start_node.child;
    }

    // Variable: a melody run; must end without a child.
    if kind.is_none() && is_melody_start(cst, start_id) {
        let mut cursor = start_node.child;
        while is_melody_continuation(cst, cursor) {
            let n = cst.node(cursor.unwrap());
            notes.push(n.note);
            cursor = n.child;
        }

        id = notes_to_symbol(&notes);
        kind = Some(if cursor.is_none() {
            SyntaxKind::Variable
        } else {
            *error = true;
            SyntaxKind::Error
        });
        child = cursor;
    }

    // Value literal: staccato digits above the split.
    if kind.is_none() && is_staccato_above(cst, Some(start_id), split) {
        let mut cursor = start_node.sibling;
        while is_staccato_above(cst, cursor, split) {
            let n = cst.node(cursor.unwrap());
            notes.push(n.note);
            cursor = n.sibling;
        }

        id = notes_to_symbol(&notes);
        kind = Some(SyntaxKind::ValueLiteral);
        sibling = cursor;
    }

    // Sequence literal: a same-pitch staccato run below the split.
    if kind.is_none() && is_staccato_below(cst, Some(start_id), split) {
        let id_note = start_node.note;
        let mut cursor = start_node.sibling;
        while is_staccato_below(cst, cursor, split) && cst.node(cursor.unwrap()).note == id_note {
            notes.push(id_note);
            cursor = cursor.and_then(|c| cst.node(c).sibling);
        }

        if notes.len() >= SEQ_LITERAL_MIN_ID_LEN {
            id = notes_to_symbol(&notes);
            kind = Some(SyntaxKind::SequenceLiteral);
            sibling = cursor;
        } else {
            // A single staccato below the split is a separator: skip it.
            return traverse(cst, start_node.sibling, is_root, split_start, error);
        }
    }

    let kind = kind.unwrap_or_else(|| {
        *error = true;
        SyntaxKind::Error
    });

    let mut node = AstNode {
        kind,
        id,
        note_start,
        children: Vec::new(),
    };
    if node.kind != SyntaxKind::Error {
        node.children = traverse(cst, child, false, split, error);
    }

    let mut result = vec![node];
    result.extend(traverse(cst, sibling, is_root, split_start, error));
    result
}
