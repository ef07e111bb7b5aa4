// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use swc_ecmascript::ast::Expr;
use swc_ecmascript::ast::ExprOrSpread;
use swc_ecmascript::ast::ExprOrSuper;
use swc_ecmascript::ast::Lit;
use swc_ecmascript::ast::ObjectPatProp;
use swc_ecmascript::ast::Pat;
use swc_ecmascript::ast::PropName;
use swc_common::DUMMY_SP;
use swc_ecmascript::ast::Invalid;
use swc_ecmascript::utils::ident::IdentLike;
use swc_ecmascript::utils::Id;
use swc_ecmascript::visit::Node;
use swc_ecmascript::visit::Visit;
use swc_ecmascript::visit::VisitWith;

/// One link appended after the innermost `require(...)` call: either a bare
/// property access or a method invocation with its argument list.
#[derive(Debug, Clone)]
pub enum PropLink {
  Name(String),
  Call(String, Vec<ExprOrSpread>),
}

/// Canonical form of a recognized `require(...)` expression.
///
/// Reconstruction order is `require(<specifier>)`, then every entry of
/// `call_chain` as a direct invocation, then every entry of `prop_chain`.
/// Example: `require('a')('b').c.d` yields one call-chain entry (`'b'`) and
/// the property links `c` and `d`.
#[derive(Debug, Clone)]
pub struct RequireExpr {
  pub specifier: String,
  pub call_chain: Vec<Vec<ExprOrSpread>>,
  pub prop_chain: Vec<PropLink>,
  /// True when the module is invoked as part of the expression. Eagerly
  /// running a module at the top level is never snapshot safe, so this
  /// forces the rewrite regardless of the caller's require filter.
  pub invoked: bool,
}

impl RequireExpr {
  fn new(specifier: String) -> Self {
    Self {
      specifier,
      call_chain: Vec::new(),
      prop_chain: Vec::new(),
      invoked: false,
    }
  }
}

/// One identifier bound on the left of a recognized require declaration.
#[derive(Debug, Clone)]
pub struct Binding {
  pub id: Id,
  pub name: String,
  /// The member access appended to the require body when the binding came
  /// from an object pattern, e.g. `.foo` for `const { foo } = require(..)`.
  pub access: Option<String>,
  pub is_destructuring: bool,
}

pub(crate) fn unwrap_parens(expr: &Expr) -> &Expr {
  match expr {
    Expr::Paren(paren) => unwrap_parens(&paren.expr),
    _ => expr,
  }
}

fn callee_expr(callee: &ExprOrSuper) -> Option<&Expr> {
  match callee {
    ExprOrSuper::Expr(expr) => Some(unwrap_parens(expr)),
    ExprOrSuper::Super(_) => None,
  }
}

fn member_obj(obj: &ExprOrSuper) -> Option<&Expr> {
  match obj {
    ExprOrSuper::Expr(expr) => Some(unwrap_parens(expr)),
    ExprOrSuper::Super(_) => None,
  }
}

/// Matches the innermost `require("<specifier>")` call: the callee must be
/// the identifier `require` and the single argument a string literal.
pub fn match_require_call(expr: &Expr) -> Option<String> {
  let call = match unwrap_parens(expr) {
    Expr::Call(call) => call,
    _ => return None,
  };
  let callee = callee_expr(&call.callee)?;
  match callee {
    Expr::Ident(ident) if ident.sym == *"require" => {}
    _ => return None,
  }
  if call.args.len() != 1 || call.args[0].spread.is_some() {
    return None;
  }
  match &*call.args[0].expr {
    Expr::Lit(Lit::Str(specifier)) => Some(specifier.value.to_string()),
    _ => None,
  }
}

/// Recognizes the syntactic shapes a deferred require can take: the direct
/// call, property chains, chained direct invocations, and method-call links.
/// The innermost `require(...)` starts an empty `RequireExpr` and every
/// outer frame appends its own fragment, so collected fragments end up in
/// source order.
pub fn match_require_expr(expr: &Expr) -> Option<RequireExpr> {
  let expr = unwrap_parens(expr);
  if let Some(specifier) = match_require_call(expr) {
    return Some(RequireExpr::new(specifier));
  }
  match expr {
    Expr::Member(member) if !member.computed => {
      let mut require = match_require_expr(member_obj(&member.obj)?)?;
      let name = match &*member.prop {
        Expr::Ident(ident) => ident.sym.to_string(),
        _ => return None,
      };
      require.prop_chain.push(PropLink::Name(name));
      Some(require)
    }
    Expr::Call(call) => {
      let callee = callee_expr(&call.callee)?;
      match callee {
        // `<tgt>.name(args)`, a method invoked on the require result
        Expr::Member(member) if !member.computed => {
          let mut require = match_require_expr(member_obj(&member.obj)?)?;
          let name = match &*member.prop {
            Expr::Ident(ident) => ident.sym.to_string(),
            _ => return None,
          };
          require
            .prop_chain
            .push(PropLink::Call(name, call.args.clone()));
          Some(require)
        }
        // a chained direct invocation, `require('a')('b')`
        Expr::Call(_) => {
          let mut require = match_require_expr(callee)?;
          require.call_chain.push(call.args.clone());
          require.invoked = true;
          Some(require)
        }
        _ => None,
      }
    }
    _ => None,
  }
}

/// Extracts the bindings introduced by the left side of a require
/// declaration. Identifier patterns yield one binding; object patterns one
/// binding per property, flagged as destructuring so the accessor body
/// reaches into the require result. Anything else (array patterns, nested
/// patterns, defaults) is rejected and the caller falls back to emitting
/// the original declaration.
pub fn extract_bindings(pat: &Pat) -> Option<Vec<Binding>> {
  match pat {
    Pat::Ident(binding_ident) => Some(vec![Binding {
      id: binding_ident.id.to_id(),
      name: binding_ident.id.sym.to_string(),
      access: None,
      is_destructuring: false,
    }]),
    Pat::Object(object_pat) => {
      let mut bindings = Vec::new();
      for prop in &object_pat.props {
        match prop {
          ObjectPatProp::Assign(assign) => {
            if assign.value.is_some() {
              return None;
            }
            bindings.push(Binding {
              id: assign.key.to_id(),
              name: assign.key.sym.to_string(),
              access: Some(format!(".{}", assign.key.sym)),
              is_destructuring: true,
            });
          }
          ObjectPatProp::KeyValue(key_value) => {
            let ident = match &*key_value.value {
              Pat::Ident(binding_ident) => &binding_ident.id,
              _ => return None,
            };
            let access = match &key_value.key {
              PropName::Ident(key) => format!(".{}", key.sym),
              PropName::Str(key) => {
                format!("[{}]", quote(&key.value))
              }
              _ => return None,
            };
            bindings.push(Binding {
              id: ident.to_id(),
              name: ident.sym.to_string(),
              access: Some(access),
              is_destructuring: true,
            });
          }
          ObjectPatProp::Rest(_) => return None,
        }
      }
      Some(bindings)
    }
    _ => None,
  }
}

/// Quotes a string the way it must appear in emitted JavaScript.
pub fn quote(text: &str) -> String {
  // serializing a string cannot fail
  serde_json::to_string(text).unwrap()
}

struct RequireCallFinder {
  found: bool,
}

impl Visit for RequireCallFinder {
  fn visit_expr(&mut self, expr: &Expr, parent: &dyn Node) {
    if self.found {
      return;
    }
    if match_require_call(expr).is_some() {
      self.found = true;
      return;
    }
    swc_ecmascript::visit::visit_expr(self, expr, parent);
  }
}

/// True when the expression contains a `require("...")` call anywhere.
pub fn contains_require_call(expr: &Expr) -> bool {
  let mut finder = RequireCallFinder { found: false };
  expr.visit_with(&Invalid { span: DUMMY_SP }, &mut finder);
  finder.found
}
