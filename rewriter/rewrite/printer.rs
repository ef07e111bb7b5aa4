// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use anyhow::Error as AnyError;
use std::rc::Rc;
use swc_common::SourceMap;
use swc_ecmascript::ast::Expr;
use swc_ecmascript::ast::Pat;
use swc_ecmascript::ast::Stmt;
use swc_ecmascript::codegen::text_writer::JsWriter;
use swc_ecmascript::codegen::Node;

/// The output side of a rewrite pass. Owns the byte buffer the module text
/// accumulates into, emits AST nodes through the code generator and raw
/// synthesized text directly, and exposes the byte offsets the hoister and
/// the post-emit fix-up work against.
pub struct Printer {
  source_map: Rc<SourceMap>,
  buf: Vec<u8>,
}

impl Printer {
  pub fn new(source_map: Rc<SourceMap>) -> Self {
    Self {
      source_map,
      buf: Vec::new(),
    }
  }

  /// Current length of the output buffer. Recorded before emitting so that
  /// later passes can address the emitted region.
  pub fn offset(&self) -> usize {
    self.buf.len()
  }

  pub fn print_raw(&mut self, text: &str) {
    self.buf.extend_from_slice(text.as_bytes());
  }

  pub fn print_stmt(&mut self, stmt: &Stmt) -> Result<(), AnyError> {
    self.emit_node(stmt)
  }

  pub fn print_expr(&mut self, expr: &Expr) -> Result<(), AnyError> {
    self.emit_node(expr)
  }

  /// Prints an expression into a scratch buffer and returns its text. Used
  /// when synthesized output embeds a printed fragment, e.g. the argument
  /// lists of a chained require invocation.
  pub fn stringify_expr(&self, expr: &Expr) -> Result<String, AnyError> {
    self.stringify_node(expr)
  }

  pub fn stringify_pat(&self, pat: &Pat) -> Result<String, AnyError> {
    self.stringify_node(pat)
  }

  /// Replaces everything from `start` to the end of the buffer with
  /// `text`. The placeholder resolution step rebuilds one statement's
  /// region at a time with this.
  pub fn replace_tail(&mut self, start: usize, text: &str) {
    self.buf.truncate(start);
    self.buf.extend_from_slice(text.as_bytes());
  }

  /// The emitted text from `start` to the end of the buffer.
  pub fn tail(&self, start: usize) -> Result<&str, AnyError> {
    Ok(std::str::from_utf8(&self.buf[start..])?)
  }

  pub fn into_string(self) -> Result<String, AnyError> {
    Ok(String::from_utf8(self.buf)?)
  }

  fn emit_node<N: Node>(&mut self, node: &N) -> Result<(), AnyError> {
    let source_map = self.source_map.clone();
    let writer =
      Box::new(JsWriter::new(source_map.clone(), "\n", &mut self.buf, None));
    let config = swc_ecmascript::codegen::Config { minify: false };
    let mut emitter = swc_ecmascript::codegen::Emitter {
      cfg: config,
      comments: None,
      cm: source_map,
      wr: writer,
    };
    node.emit_with(&mut emitter)?;
    Ok(())
  }

  fn stringify_node<N: Node>(&self, node: &N) -> Result<String, AnyError> {
    let mut buf = Vec::new();
    {
      let writer = Box::new(JsWriter::new(
        self.source_map.clone(),
        "\n",
        &mut buf,
        None,
      ));
      let config = swc_ecmascript::codegen::Config { minify: false };
      let mut emitter = swc_ecmascript::codegen::Emitter {
        cfg: config,
        comments: None,
        cm: self.source_map.clone(),
        wr: writer,
      };
      node.emit_with(&mut emitter)?;
    }
    let text = String::from_utf8(buf)?;
    Ok(text.trim_end().to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::parse_script;

  #[test]
  fn test_print_stmt_and_raw() {
    let parsed = parse_script("file:///a.js", "const a = 1;").unwrap();
    let mut printer = Printer::new(parsed.source_map());
    printer.print_raw("// banner\n");
    printer.print_stmt(&parsed.script().body[0]).unwrap();
    let text = printer.into_string().unwrap();
    assert!(text.starts_with("// banner\n"));
    assert!(text.contains("const a = 1;"));
  }

  #[test]
  fn test_stringify_expr() {
    use swc_ecmascript::ast::Stmt;

    let parsed = parse_script("file:///a.js", "a.b(1, two);").unwrap();
    let printer = Printer::new(parsed.source_map());
    let expr = match &parsed.script().body[0] {
      Stmt::Expr(expr_stmt) => &*expr_stmt.expr,
      _ => unreachable!(),
    };
    let text = printer.stringify_expr(expr).unwrap();
    assert_eq!(text, "a.b(1, two)");
  }

  #[test]
  fn test_replace_tail() {
    let parsed = parse_script("file:///a.js", ";").unwrap();
    let mut printer = Printer::new(parsed.source_map());
    printer.print_raw("abcdef");
    printer.replace_tail(3, "xyz");
    assert_eq!(printer.into_string().unwrap(), "abcxyz");
  }
}
