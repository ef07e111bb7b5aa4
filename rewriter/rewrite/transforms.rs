// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use anyhow::Error as AnyError;
use swc_common::DUMMY_SP;
use swc_ecmascript::ast::AssignExpr;
use swc_ecmascript::ast::AssignOp;
use swc_ecmascript::ast::CallExpr;
use swc_ecmascript::ast::Decl;
use swc_ecmascript::ast::Expr;
use swc_ecmascript::ast::ExprOrSpread;
use swc_ecmascript::ast::ExprOrSuper;
use swc_ecmascript::ast::Ident;
use swc_ecmascript::ast::Invalid;
use swc_ecmascript::ast::KeyValueProp;
use swc_ecmascript::ast::Lit;
use swc_ecmascript::ast::MemberExpr;
use swc_ecmascript::ast::Pat;
use swc_ecmascript::ast::PatOrExpr;
use swc_ecmascript::ast::Prop;
use swc_ecmascript::ast::PropName;
use swc_ecmascript::ast::Stmt;
use swc_ecmascript::ast::VarDecl;
use swc_ecmascript::ast::VarDeclarator;
use swc_ecmascript::utils::ident::IdentLike;
use swc_ecmascript::visit::noop_fold_type;
use swc_ecmascript::visit::Fold;
use swc_ecmascript::visit::FoldWith;
use swc_ecmascript::visit::Node;
use swc_ecmascript::visit::Visit;
use swc_ecmascript::visit::VisitWith;

use super::require::contains_require_call;
use super::require::extract_bindings;
use super::require::match_require_expr;
use super::require::quote;
use super::require::unwrap_parens;
use super::require::Binding;
use super::require::PropLink;
use super::require::RequireExpr;
use super::symbols::accessor_call;
use super::symbols::accessor_decl;
use super::symbols::accessor_name;
use super::symbols::ResolvedName;
use super::symbols::Symbols;
use super::validate;
use super::RewriteContext;

static FILENAME_FALLBACK: &str =
  "(typeof __filename2 !== 'undefined' ? __filename2 : __filename)";
static DIRNAME_FALLBACK: &str =
  "(typeof __dirname2 !== 'undefined' ? __dirname2 : __dirname)";

/// An identifier node carrying raw output text. The code generator prints
/// identifier atoms verbatim, so this is how synthesized fragments are
/// spliced into otherwise printed subtrees.
pub fn raw_expr(text: &str) -> Expr {
  Expr::Ident(Ident::new(text.into(), DUMMY_SP))
}

/// Rewrites the identifiers of a printed subtree on the read side: installed
/// replacements and deferred globals print as their accessor calls, and
/// module-level bindings that may still be deferred later print as pending
/// placeholders. Also augments `require.resolve(..)` calls along the way.
pub struct NameFolder<'a> {
  symbols: &'a mut Symbols,
}

impl<'a> NameFolder<'a> {
  pub fn new(symbols: &'a mut Symbols) -> Self {
    Self { symbols }
  }
}

impl<'a> Fold for NameFolder<'a> {
  noop_fold_type!();

  fn fold_expr(&mut self, expr: Expr) -> Expr {
    match expr {
      Expr::Ident(ident) => match self.symbols.name_for(&ident) {
        ResolvedName::Original => Expr::Ident(ident),
        ResolvedName::Replaced(text) | ResolvedName::Pending(text) => {
          raw_expr(&text)
        }
      },
      _ => expr.fold_children_with(self),
    }
  }

  fn fold_member_expr(&mut self, member: MemberExpr) -> MemberExpr {
    // a non-computed property name is not a reference
    let obj = member.obj.fold_with(self);
    let prop = if member.computed {
      member.prop.fold_with(self)
    } else {
      member.prop
    };
    MemberExpr {
      span: member.span,
      obj,
      prop,
      computed: member.computed,
    }
  }

  fn fold_prop(&mut self, prop: Prop) -> Prop {
    match prop {
      Prop::Shorthand(ident) => match self.symbols.name_for(&ident) {
        ResolvedName::Original => Prop::Shorthand(ident),
        ResolvedName::Replaced(text) | ResolvedName::Pending(text) => {
          Prop::KeyValue(KeyValueProp {
            key: PropName::Ident(Ident::new(ident.sym.clone(), DUMMY_SP)),
            value: Box::new(raw_expr(&text)),
          })
        }
      },
      _ => prop.fold_children_with(self),
    }
  }

  fn fold_assign_expr(&mut self, assign: AssignExpr) -> AssignExpr {
    // assignment targets keep their original names; only a member target's
    // object side holds references
    let left = match assign.left {
      PatOrExpr::Expr(expr) => {
        if matches!(&*expr, Expr::Member(_)) {
          PatOrExpr::Expr(expr.fold_with(self))
        } else {
          PatOrExpr::Expr(expr)
        }
      }
      PatOrExpr::Pat(pat) => match *pat {
        Pat::Expr(expr) if matches!(&*expr, Expr::Member(_)) => {
          PatOrExpr::Pat(Box::new(Pat::Expr(expr.fold_with(self))))
        }
        pat => PatOrExpr::Pat(Box::new(pat)),
      },
    };
    AssignExpr {
      span: assign.span,
      op: assign.op,
      left,
      right: assign.right.fold_with(self),
    }
  }

  fn fold_call_expr(&mut self, call: CallExpr) -> CallExpr {
    let mut call = call.fold_children_with(self);
    if is_require_resolve(&call) {
      if call.args.len() == 1 {
        call.args.push(raw_arg(FILENAME_FALLBACK));
        call.args.push(raw_arg(DIRNAME_FALLBACK));
      } else {
        log::debug!(
          "skipping require.resolve with {} arguments",
          call.args.len()
        );
      }
    }
    call
  }
}

fn raw_arg(text: &str) -> ExprOrSpread {
  ExprOrSpread {
    spread: None,
    expr: Box::new(raw_expr(text)),
  }
}

fn is_require_resolve(call: &CallExpr) -> bool {
  let callee = match &call.callee {
    ExprOrSuper::Expr(expr) => unwrap_parens(expr),
    ExprOrSuper::Super(_) => return false,
  };
  let member = match callee {
    Expr::Member(member) if !member.computed => member,
    _ => return false,
  };
  let obj = match &member.obj {
    ExprOrSuper::Expr(expr) => unwrap_parens(expr),
    ExprOrSuper::Super(_) => return false,
  };
  matches!(obj, Expr::Ident(ident) if ident.sym == *"require")
    && matches!(&*member.prop, Expr::Ident(ident) if ident.sym == *"resolve")
}

pub fn fold_stmt(symbols: &mut Symbols, stmt: &Stmt) -> Stmt {
  stmt.clone().fold_with(&mut NameFolder::new(symbols))
}

pub fn fold_expr(symbols: &mut Symbols, expr: &Expr) -> Expr {
  expr.clone().fold_with(&mut NameFolder::new(symbols))
}

struct DeferredRefFinder<'a> {
  symbols: &'a Symbols,
  found: bool,
}

impl<'a> Visit for DeferredRefFinder<'a> {
  fn visit_expr(&mut self, expr: &Expr, parent: &dyn Node) {
    if self.found {
      return;
    }
    if let Expr::Ident(ident) = expr {
      let id = ident.to_id();
      if self.symbols.has_replacement(&id)
        || self.symbols.global_needs_defer(&id)
      {
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

  fn visit_prop(&mut self, prop: &Prop, parent: &dyn Node) {
    if let Prop::Shorthand(ident) = prop {
      let id = ident.to_id();
      if self.symbols.has_replacement(&id)
        || self.symbols.global_needs_defer(&id)
      {
        self.found = true;
        return;
      }
    }
    swc_ecmascript::visit::visit_prop(self, prop, parent);
  }
}

/// True when the expression references a name that has already been put
/// behind an accessor, or a global that must be deferred.
pub fn references_deferred(symbols: &Symbols, expr: &Expr) -> bool {
  let mut finder = DeferredRefFinder {
    symbols,
    found: false,
  };
  expr.visit_with(&Invalid { span: DUMMY_SP }, &mut finder);
  finder.found
}

/// Stringifies the argument list of a call, with replacements applied.
pub fn args_source(
  ctx: &mut RewriteContext,
  args: &[ExprOrSpread],
) -> Result<String, AnyError> {
  let mut parts = Vec::new();
  for arg in args {
    let folded = fold_expr(&mut ctx.symbols, &arg.expr);
    let text = ctx.printer.stringify_expr(&folded)?;
    if arg.spread.is_some() {
      parts.push(format!("...{}", text));
    } else {
      parts.push(text);
    }
  }
  Ok(parts.join(", "))
}

/// Reconstructs the source text of a recognized require expression:
/// `require(<specifier>)`, the chained invocations, then the property links.
fn require_source(
  ctx: &mut RewriteContext,
  require: &RequireExpr,
) -> Result<String, AnyError> {
  let mut source = format!("require({})", quote(&require.specifier));
  for args in &require.call_chain {
    source.push('(');
    source.push_str(&args_source(ctx, args)?);
    source.push(')');
  }
  for link in &require.prop_chain {
    match link {
      PropLink::Name(name) => {
        source.push('.');
        source.push_str(name);
      }
      PropLink::Call(name, args) => {
        source.push('.');
        source.push_str(name);
        source.push('(');
        source.push_str(&args_source(ctx, args)?);
        source.push(')');
      }
    }
  }
  Ok(source)
}

/// The classification of one declarator in a `var`/`let`/`const` statement.
enum MaybeRequireDecl {
  /// The initializer is a recognized require; defer it per binding.
  Require {
    require: RequireExpr,
    bindings: Vec<Binding>,
    /// Every binding already has an accessor installed by an earlier
    /// declaration; skip this declarator entirely.
    drop_decl: bool,
  },
  /// The initializer references a previously deferred name or global;
  /// re-export it through an accessor of its own.
  RequireReference { bindings: Vec<Binding> },
  /// A plain declarator, printed unchanged.
  Original,
}

fn classify_declarator(
  ctx: &RewriteContext,
  declarator: &VarDeclarator,
) -> MaybeRequireDecl {
  let init = match &declarator.init {
    Some(init) => init,
    None => return MaybeRequireDecl::Original,
  };
  if let Some(require) = match_require_expr(init) {
    // an invoked module always gets deferred, the filter cannot keep it
    if require.invoked || ctx.should_replace(&require.specifier) {
      if let Some(bindings) = extract_bindings(&declarator.name) {
        let drop_decl = bindings
          .iter()
          .all(|binding| ctx.symbols.has_replacement(&binding.id));
        return MaybeRequireDecl::Require {
          require,
          bindings,
          drop_decl,
        };
      }
    }
    return MaybeRequireDecl::Original;
  }
  if references_deferred(&ctx.symbols, init) {
    if let Some(bindings) = extract_bindings(&declarator.name) {
      return MaybeRequireDecl::RequireReference { bindings };
    }
  }
  MaybeRequireDecl::Original
}

fn declarator_may_rewrite(
  ctx: &RewriteContext,
  declarator: &VarDeclarator,
) -> bool {
  match &declarator.init {
    Some(init) => {
      contains_require_call(init) || references_deferred(&ctx.symbols, init)
    }
    None => false,
  }
}

/// Replaces declarator initializers that probe a host capability through a
/// ternary with a throwing thunk, collecting the validation errors.
fn validated_var_decl(
  ctx: &mut RewriteContext,
  var_decl: &VarDecl,
) -> Option<VarDecl> {
  if !ctx.options.strict {
    return None;
  }
  let mut modified = None;
  for (i, declarator) in var_decl.decls.iter().enumerate() {
    let test = match &declarator.init {
      Some(init) => match unwrap_parens(init) {
        Expr::Cond(cond) => &cond.test,
        _ => continue,
      },
      None => continue,
    };
    if let Some(error) = validate::probe_error(&ctx.symbols, test) {
      log::debug!("{}", error);
      let thunk = error.thunk();
      ctx.errors.push(error);
      let decl = modified.get_or_insert_with(|| var_decl.clone());
      decl.decls[i].init = Some(Box::new(raw_expr(&thunk)));
    }
  }
  modified
}

/// Handles a top-level `var`/`let`/`const` statement. Returns false when
/// nothing in it needs rewriting and the caller should print it unchanged.
pub fn rewrite_var_decl(
  ctx: &mut RewriteContext,
  var_decl: &VarDecl,
) -> Result<bool, AnyError> {
  let validated = validated_var_decl(ctx, var_decl);
  let var_decl = match &validated {
    Some(modified) => modified,
    None => var_decl,
  };

  let any_rewrites = var_decl
    .decls
    .iter()
    .any(|declarator| declarator_may_rewrite(ctx, declarator));
  if !any_rewrites {
    if validated.is_some() {
      let folded = fold_stmt(
        &mut ctx.symbols,
        &Stmt::Decl(Decl::Var(var_decl.clone())),
      );
      ctx.printer.print_stmt(&folded)?;
      return Ok(true);
    }
    return Ok(false);
  }

  // the combined statement is split; declarators are processed left to
  // right so a replacement installed by one is visible to the next
  for declarator in &var_decl.decls {
    match classify_declarator(ctx, declarator) {
      MaybeRequireDecl::Require {
        require,
        bindings,
        drop_decl,
      } => {
        if drop_decl {
          log::debug!(
            "dropping duplicate require declaration of {}",
            require.specifier
          );
          continue;
        }
        // the body is rebuilt per binding so that pending name slots
        // inside it are minted once per printed occurrence
        for binding in bindings {
          if ctx.symbols.has_replacement(&binding.id) {
            continue;
          }
          let body = require_source(ctx, &require)?;
          emit_accessor_decl(ctx, &binding, &body)?;
        }
      }
      MaybeRequireDecl::RequireReference { bindings } => {
        let init = match &declarator.init {
          Some(init) => init,
          None => unreachable!("a require reference always has an init"),
        };
        for binding in bindings {
          if ctx.symbols.has_replacement(&binding.id) {
            continue;
          }
          let folded = fold_expr(&mut ctx.symbols, init);
          let body = ctx.printer.stringify_expr(&folded)?;
          emit_accessor_decl(ctx, &binding, &body)?;
        }
      }
      MaybeRequireDecl::Original => {
        let single = VarDecl {
          span: DUMMY_SP,
          kind: var_decl.kind,
          declare: false,
          decls: vec![declarator.clone()],
        };
        let folded =
          fold_stmt(&mut ctx.symbols, &Stmt::Decl(Decl::Var(single)));
        ctx.printer.print_stmt(&folded)?;
      }
    }
  }
  Ok(true)
}

fn emit_accessor_decl(
  ctx: &mut RewriteContext,
  binding: &Binding,
  body: &str,
) -> Result<(), AnyError> {
  let body = match &binding.access {
    Some(access) => format!("{}{}", body, access),
    None => body.to_string(),
  };
  log::debug!("deferring '{}' behind an accessor", binding.name);
  ctx
    .symbols
    .replace(binding.id.clone(), accessor_call(&binding.name));
  ctx.printer.print_raw(&format!("let {};\n", binding.name));
  ctx.printer.print_raw(&format!(
    "function {} {{\n  return {} = {} || ({})\n}}\n",
    accessor_decl(&binding.name),
    binding.name,
    binding.name,
    body
  ));
  Ok(())
}

/// One target on the left of a (possibly chained) assignment.
enum AssignTarget<'a> {
  Ident(&'a Ident),
  Member(&'a MemberExpr),
  Other,
}

fn assign_target(left: &PatOrExpr) -> AssignTarget {
  let expr = match left {
    PatOrExpr::Expr(expr) => unwrap_parens(expr),
    PatOrExpr::Pat(pat) => match &**pat {
      Pat::Ident(binding_ident) => {
        return AssignTarget::Ident(&binding_ident.id)
      }
      Pat::Expr(expr) => unwrap_parens(expr),
      _ => return AssignTarget::Other,
    },
  };
  match expr {
    Expr::Ident(ident) => AssignTarget::Ident(ident),
    Expr::Member(member) => AssignTarget::Member(member),
    _ => AssignTarget::Other,
  }
}

/// Walks `a = b = <rhs>` down to the final right-hand side, collecting the
/// targets in source order.
fn assignment_chain(assign: &AssignExpr) -> (Vec<AssignTarget>, &Expr) {
  let mut targets = vec![assign_target(&assign.left)];
  let mut rhs: &Expr = &assign.right;
  loop {
    match unwrap_parens(rhs) {
      Expr::Assign(inner) if inner.op == AssignOp::Assign => {
        targets.push(assign_target(&inner.left));
        rhs = &inner.right;
      }
      other => return (targets, other),
    }
  }
}

fn member_obj_ident<'b>(member: &'b MemberExpr) -> Option<&'b Ident> {
  match &member.obj {
    ExprOrSuper::Expr(expr) => match unwrap_parens(expr) {
      Expr::Ident(ident) => Some(ident),
      _ => None,
    },
    ExprOrSuper::Super(_) => None,
  }
}

/// Matches `exports.<name>`, `module.exports.<name>` and `exports['<name>']`
/// targets, yielding the object text and the export name.
fn exports_target(member: &MemberExpr) -> Option<(String, String)> {
  let obj_text = match &member.obj {
    ExprOrSuper::Expr(expr) => match unwrap_parens(expr) {
      Expr::Ident(ident) if ident.sym == *"exports" => "exports",
      Expr::Member(inner) if !inner.computed => {
        let obj = member_obj_ident(inner)?;
        let prop = match &*inner.prop {
          Expr::Ident(ident) => ident,
          _ => return None,
        };
        if obj.sym == *"module" && prop.sym == *"exports" {
          "module.exports"
        } else {
          return None;
        }
      }
      _ => return None,
    },
    ExprOrSuper::Super(_) => return None,
  };
  let name = if member.computed {
    match &*member.prop {
      Expr::Lit(Lit::Str(name)) => name.value.to_string(),
      _ => return None,
    }
  } else {
    match &*member.prop {
      Expr::Ident(ident) => ident.sym.to_string(),
      _ => return None,
    }
  };
  Some((obj_text.to_string(), name))
}

fn is_module_exports(member: &MemberExpr) -> bool {
  if member.computed {
    return false;
  }
  let obj = match member_obj_ident(member) {
    Some(ident) => ident,
    None => return false,
  };
  let prop = match &*member.prop {
    Expr::Ident(ident) => ident,
    _ => return false,
  };
  obj.sym == *"module" && prop.sym == *"exports"
}

/// Handles a top-level assignment statement. Returns false when the
/// statement should be printed unchanged.
pub fn rewrite_assignment(
  ctx: &mut RewriteContext,
  assign: &AssignExpr,
) -> Result<bool, AnyError> {
  if assign.op != AssignOp::Assign {
    return Ok(false);
  }
  let (targets, rhs) = assignment_chain(assign);

  let require = match_require_expr(rhs)
    .filter(|require| require.invoked || ctx.should_replace(&require.specifier));

  if let Some(require) = require {
    if targets.len() == 1 {
      if let AssignTarget::Member(member) = &targets[0] {
        // `module.exports = require(..)` re-exports the whole module and
        // must stay eager
        if is_module_exports(member) {
          return Ok(false);
        }
        if let Some((obj_text, name)) = exports_target(member) {
          let body = require_source(ctx, &require)?;
          log::debug!("deferring export '{}' behind a getter", name);
          ctx.printer.print_raw(&format!(
            "Object.defineProperty({}, {}, {{ get: () => {} }});\n",
            obj_text,
            quote(&name),
            body
          ));
          return Ok(true);
        }
        return Ok(false);
      }
    }
    if !targets_are_wrappable(ctx, &targets) {
      return Ok(false);
    }
    // chained assignments split into independent accessor bodies
    for target in &targets {
      if let AssignTarget::Ident(ident) = target {
        let body = require_source(ctx, &require)?;
        emit_late_accessor(ctx, ident, &body)?;
      }
    }
    return Ok(true);
  }

  if references_deferred(&ctx.symbols, rhs) {
    if !targets_are_wrappable(ctx, &targets) {
      return Ok(false);
    }
    // a self-referential assignment like `debug = wrap(debug)` would
    // recurse through the accessor
    for target in &targets {
      if let AssignTarget::Ident(ident) = target {
        if validate::references_binding(&ident.to_id(), rhs) {
          log::debug!("skipping self-referential assignment to {}", ident.sym);
          return Ok(false);
        }
      }
    }
    for target in &targets {
      if let AssignTarget::Ident(ident) = target {
        let folded = fold_expr(&mut ctx.symbols, rhs);
        let body = ctx.printer.stringify_expr(&folded)?;
        emit_late_accessor(ctx, ident, &body)?;
      }
    }
    return Ok(true);
  }

  Ok(false)
}

fn targets_are_wrappable(
  ctx: &RewriteContext,
  targets: &[AssignTarget],
) -> bool {
  targets.iter().all(|target| match target {
    AssignTarget::Ident(ident) => {
      !ctx.symbols.is_unwrappable(&ident.to_id())
    }
    _ => false,
  })
}

/// Emits `__get_x__ = function() { .. }` for a late assignment, tracking
/// the accessor name for hoisting. Unlike the declaration form, the
/// accessor here is an assigned function expression, so its name must be
/// declared before this point in the file.
fn emit_late_accessor(
  ctx: &mut RewriteContext,
  ident: &Ident,
  body: &str,
) -> Result<(), AnyError> {
  let name = ident.sym.to_string();
  let accessor = accessor_name(&name);
  if !ctx.top_level_vars.contains(&accessor) {
    ctx.top_level_vars.track(&accessor, ctx.printer.offset());
  }
  ctx.symbols.replace(ident.to_id(), accessor_call(&name));
  ctx.printer.print_raw(&format!(
    "{} = function() {{\n  return {} = {} || ({})\n}};\n",
    accessor, name, name, body
  ));
  Ok(())
}
