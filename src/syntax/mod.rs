//! Live chord grammar: MIDI stream → CST → disambiguated AST.

pub mod ast;
pub mod cst;
pub mod parser;
pub mod symbol;

pub use ast::{Ast, AstNode, SyntaxKind};
pub use cst::Cst;
pub use parser::SyntaxParser;
pub use symbol::{notes_to_symbol, notes_to_symbol_sorted, note_name, symbol_to_str, Symbol};
