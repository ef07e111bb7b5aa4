// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use serde::Serialize;
use std::fmt;
use swc_common::DUMMY_SP;
use swc_ecmascript::ast::AssignExpr;
use swc_ecmascript::ast::AssignOp;
use swc_ecmascript::ast::Expr;
use swc_ecmascript::ast::ExprOrSuper;
use swc_ecmascript::ast::Invalid;
use swc_ecmascript::ast::MemberExpr;
use swc_ecmascript::ast::PatOrExpr;
use swc_ecmascript::ast::UnaryOp;
use swc_ecmascript::utils::ident::IdentLike;
use swc_ecmascript::utils::Id;
use swc_ecmascript::visit::Node;
use swc_ecmascript::visit::Visit;
use swc_ecmascript::visit::VisitWith;

use super::require::quote;
use super::require::unwrap_parens;
use super::symbols::Symbols;

/// Embedded in emitted text when a subexpression was replaced by a throwing
/// thunk; downstream snapshot tooling pattern-matches on this.
pub const CACHE_FAILURE_PREFIX: &str = "[SNAPSHOT_CACHE_FAILURE]";
/// Returned to the caller when rewriting a module was abandoned.
pub const REWRITE_FAILURE_PREFIX: &str = "[SNAPSHOT_REWRITE_FAILURE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationKind {
  /// The offending subtree is replaced with a throwing thunk and the
  /// module continues to be rewritten.
  Defer,
  /// Rewriting the module is abandoned and the original text is emitted.
  NoRewrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
  pub kind: ValidationKind,
  pub message: String,
}

impl ValidationError {
  pub fn defer(message: impl Into<String>) -> Self {
    Self {
      kind: ValidationKind::Defer,
      message: message.into(),
    }
  }

  pub fn no_rewrite(message: impl Into<String>) -> Self {
    Self {
      kind: ValidationKind::NoRewrite,
      message: message.into(),
    }
  }

  pub fn prefix(&self) -> &'static str {
    match self.kind {
      ValidationKind::Defer => CACHE_FAILURE_PREFIX,
      ValidationKind::NoRewrite => REWRITE_FAILURE_PREFIX,
    }
  }

  /// The throwing thunk that stands in for a deferred subtree.
  pub fn thunk(&self) -> String {
    format!(
      "(function () {{ throw new Error({}) }})()",
      quote(&format!("{} {}", self.prefix(), self.message))
    )
  }
}

impl fmt::Display for ValidationError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.prefix(), self.message)
  }
}

impl std::error::Error for ValidationError {}

fn assign_target_member(assign: &AssignExpr) -> Option<&MemberExpr> {
  let expr = match &assign.left {
    PatOrExpr::Expr(expr) => expr,
    PatOrExpr::Pat(pat) => match &**pat {
      swc_ecmascript::ast::Pat::Expr(expr) => expr,
      _ => return None,
    },
  };
  match unwrap_parens(expr) {
    Expr::Member(member) => Some(member),
    _ => None,
  }
}

fn is_function_value(symbols: &Symbols, expr: &Expr) -> bool {
  match unwrap_parens(expr) {
    Expr::Fn(_) | Expr::Arrow(_) => true,
    Expr::Ident(ident) => symbols.is_function(&ident.to_id()),
    _ => false,
  }
}

/// Rejects assignments that monkey-patch `process`: the patched function
/// would recurse into `get_process()` at resume time.
pub fn check_assignment(
  symbols: &Symbols,
  assign: &AssignExpr,
) -> Option<ValidationError> {
  if assign.op != AssignOp::Assign {
    return None;
  }
  let member = assign_target_member(assign)?;
  if member.computed {
    return None;
  }
  let obj = match &member.obj {
    ExprOrSuper::Expr(expr) => unwrap_parens(expr),
    ExprOrSuper::Super(_) => return None,
  };
  let obj_ident = match obj {
    Expr::Ident(ident) => ident,
    _ => return None,
  };
  if !symbols.is_process(&obj_ident.to_id()) {
    return None;
  }
  let prop = match &*member.prop {
    Expr::Ident(ident) => ident,
    _ => return None,
  };
  if !is_function_value(symbols, &assign.right) {
    return None;
  }
  Some(ValidationError::no_rewrite(format!(
    "Cannot override 'process.{}'",
    prop.sym
  )))
}

/// Detects a test expression that probes a host capability: a bare unbound
/// global, a property read off one, or a `typeof` comparison against one.
/// Probing a host capability at snapshot time is unsafe.
pub fn probe_error(symbols: &Symbols, test: &Expr) -> Option<ValidationError> {
  let name = probed_global(symbols, test)?;
  Some(ValidationError::defer(format!(
    "Cannot probe '{}' properties",
    name
  )))
}

fn probed_global(symbols: &Symbols, expr: &Expr) -> Option<String> {
  match unwrap_parens(expr) {
    Expr::Ident(ident) => symbols.probeable_global(&ident.to_id()),
    Expr::Member(member) => {
      let obj = match &member.obj {
        ExprOrSuper::Expr(expr) => unwrap_parens(expr),
        ExprOrSuper::Super(_) => return None,
      };
      match obj {
        Expr::Ident(ident) => symbols.probeable_global(&ident.to_id()),
        _ => None,
      }
    }
    Expr::Unary(unary) if unary.op == UnaryOp::TypeOf => {
      match unwrap_parens(&unary.arg) {
        Expr::Ident(ident) => symbols.probeable_global(&ident.to_id()),
        _ => None,
      }
    }
    Expr::Bin(bin) => probed_global(symbols, &bin.left)
      .or_else(|| probed_global(symbols, &bin.right)),
    _ => None,
  }
}

struct BindingRefFinder {
  id: Id,
  found: bool,
}

impl Visit for BindingRefFinder {
  fn visit_expr(&mut self, expr: &Expr, parent: &dyn Node) {
    if self.found {
      return;
    }
    if let Expr::Ident(ident) = expr {
      if ident.to_id() == self.id {
        self.found = true;
        return;
      }
    }
    swc_ecmascript::visit::visit_expr(self, expr, parent);
  }

  fn visit_member_expr(&mut self, member: &MemberExpr, parent: &dyn Node) {
    member.obj.visit_with(parent, self);
    if member.computed {
      member.prop.visit_with(parent, self);
    }
  }
}

/// True when the expression references the given binding, e.g. the
/// right-hand side of `debug = wrap(debug)`. Rewriting such an assignment
/// would recurse through the accessor forever.
pub fn references_binding(id: &Id, expr: &Expr) -> bool {
  let mut finder = BindingRefFinder {
    id: id.clone(),
    found: false,
  };
  expr.visit_with(&Invalid { span: DUMMY_SP }, &mut finder);
  finder.found
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::parse_script;
  use crate::ast::ParsedSource;
  use std::collections::HashSet;
  use swc_ecmascript::ast::Stmt;

  fn parse(source: &str) -> (ParsedSource, Symbols) {
    let parsed = parse_script("file:///a.js", source).unwrap();
    let symbols =
      Symbols::new(parsed.unresolved_ctxt(), HashSet::new(), HashSet::new());
    (parsed, symbols)
  }

  fn first_assign(parsed: &ParsedSource) -> AssignExpr {
    match &parsed.script().body[0] {
      Stmt::Expr(expr_stmt) => match &*expr_stmt.expr {
        Expr::Assign(assign) => assign.clone(),
        _ => unreachable!(),
      },
      _ => unreachable!(),
    }
  }

  fn first_if_test(parsed: &ParsedSource) -> Box<Expr> {
    match &parsed.script().body[0] {
      Stmt::If(if_stmt) => if_stmt.test.clone(),
      _ => unreachable!(),
    }
  }

  #[test]
  fn test_process_override_is_no_rewrite() {
    let (parsed, symbols) = parse("process.cwd = () => {};");
    let error =
      check_assignment(&symbols, &first_assign(&parsed)).unwrap();
    assert_eq!(error.kind, ValidationKind::NoRewrite);
    assert_eq!(error.message, "Cannot override 'process.cwd'");
    assert_eq!(
      error.to_string(),
      "[SNAPSHOT_REWRITE_FAILURE] Cannot override 'process.cwd'"
    );
  }

  #[test]
  fn test_process_override_function_expr() {
    let (parsed, symbols) = parse("process.exit = function () {};");
    assert!(check_assignment(&symbols, &first_assign(&parsed)).is_some());
  }

  #[test]
  fn test_process_non_function_assignment_is_fine() {
    let (parsed, symbols) = parse("process.title = 'app';");
    assert!(check_assignment(&symbols, &first_assign(&parsed)).is_none());
  }

  #[test]
  fn test_bound_process_is_fine() {
    let parsed = parse_script(
      "file:///a.js",
      "const process = {}; process.cwd = () => {};",
    )
    .unwrap();
    let symbols =
      Symbols::new(parsed.unresolved_ctxt(), HashSet::new(), HashSet::new());
    let assign = match &parsed.script().body[1] {
      Stmt::Expr(expr_stmt) => match &*expr_stmt.expr {
        Expr::Assign(assign) => assign.clone(),
        _ => unreachable!(),
      },
      _ => unreachable!(),
    };
    assert!(check_assignment(&symbols, &assign).is_none());
  }

  #[test]
  fn test_probe_bare_global() {
    let (parsed, symbols) = parse("if (Buffer) {}");
    let error = probe_error(&symbols, &first_if_test(&parsed)).unwrap();
    assert_eq!(error.kind, ValidationKind::Defer);
    assert_eq!(error.message, "Cannot probe 'Buffer' properties");
  }

  #[test]
  fn test_probe_property_read() {
    let (parsed, symbols) = parse("if (Buffer.isBuffer) {}");
    assert!(probe_error(&symbols, &first_if_test(&parsed)).is_some());
  }

  #[test]
  fn test_probe_typeof_comparison() {
    let (parsed, symbols) = parse("if (typeof process === 'undefined') {}");
    let error = probe_error(&symbols, &first_if_test(&parsed)).unwrap();
    assert_eq!(error.message, "Cannot probe 'process' properties");
  }

  #[test]
  fn test_probe_skips_bound_and_allowed_names() {
    let parsed =
      parse_script("file:///a.js", "const flag = true; if (flag) {}")
        .unwrap();
    let symbols =
      Symbols::new(parsed.unresolved_ctxt(), HashSet::new(), HashSet::new());
    let test = match &parsed.script().body[1] {
      Stmt::If(if_stmt) => if_stmt.test.clone(),
      _ => unreachable!(),
    };
    assert!(probe_error(&symbols, &test).is_none());

    let (parsed, symbols) = parse("if (Object.assign) {}");
    assert!(probe_error(&symbols, &first_if_test(&parsed)).is_none());
  }

  #[test]
  fn test_thunk_embeds_sentinel() {
    let error = ValidationError::defer("Cannot probe 'Buffer' properties");
    assert_eq!(
      error.thunk(),
      "(function () { throw new Error(\"[SNAPSHOT_CACHE_FAILURE] Cannot probe 'Buffer' properties\") })()"
    );
  }

  #[test]
  fn test_references_binding() {
    let parsed =
      parse_script("file:///a.js", "let debug = 1; debug = wrap(debug);")
        .unwrap();
    let (id, rhs) = match (&parsed.script().body[0], &parsed.script().body[1])
    {
      (Stmt::Decl(decl), Stmt::Expr(expr_stmt)) => {
        let id = match decl {
          swc_ecmascript::ast::Decl::Var(var_decl) => {
            match &var_decl.decls[0].name {
              swc_ecmascript::ast::Pat::Ident(ident) => ident.id.to_id(),
              _ => unreachable!(),
            }
          }
          _ => unreachable!(),
        };
        let rhs = match &*expr_stmt.expr {
          Expr::Assign(assign) => assign.right.clone(),
          _ => unreachable!(),
        };
        (id, rhs)
      }
      _ => unreachable!(),
    };
    assert!(references_binding(&id, &rhs));

    let parsed =
      parse_script("file:///a.js", "let debug = 1; other = wrap(1);")
        .unwrap();
    let rhs = match &parsed.script().body[1] {
      Stmt::Expr(expr_stmt) => match &*expr_stmt.expr {
        Expr::Assign(assign) => assign.right.clone(),
        _ => unreachable!(),
      },
      _ => unreachable!(),
    };
    assert!(!references_binding(&id, &rhs));
  }
}
