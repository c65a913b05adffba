//! Single-line REPL echo.
//!
//! While a phrase is still being held, the interpreter shows what the
//! current tree would mean if the performer released everything now. The
//! line is re-rendered in place, padding over whatever the previous render
//! left behind.

use std::io::{self, Write};

use crate::program::{Expr, Program};
use crate::syntax::{symbol_to_str, Ast, Cst, SyntaxKind};

#[derive(Default)]
pub struct Printer {
    prev_len: usize,
}

impl Printer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo the phrase the CST currently spells, if it binds.
    pub fn echo(&mut self, cst: &Cst) {
        let ast = Ast::from_cst(cst);
        let Some(root) = ast.root() else {
            return;
        };

        if root.kind == SyntaxKind::FunctionDef {
            let line = format!("DEF {}", symbol_to_str(&root.id));
            self.print_line(&line);
            return;
        }

        // Bind in a scratch program so echoing never disturbs the real
        // environment.
        let mut scratch = Program::new();
        let global = scratch.global;
        if let Ok(expr) = scratch.build_statement(global, root) {
            if !matches!(expr, Expr::ValueLiteral(_)) {
                self.print_line(&expr.to_string());
            }
        }
    }

    pub fn print_line(&mut self, line: &str) {
        print!("  > {line}");
        if self.prev_len > line.len() {
            print!("{}", " ".repeat(self.prev_len - line.len()));
        }
        print!("\r");
        let _ = io::stdout().flush();
        self.prev_len = line.len();
    }

    pub fn print_result(&mut self, text: &str) {
        println!("{text}");
        self.prev_len = 0;
    }
}
