// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use anyhow::Error as AnyError;
use std::collections::HashSet;
use std::rc::Rc;
use swc_ecmascript::ast::AssignOp;
use swc_ecmascript::ast::BlockStmtOrExpr;
use swc_ecmascript::ast::Decl;
use swc_ecmascript::ast::Expr;
use swc_ecmascript::ast::ExprOrSpread;
use swc_ecmascript::ast::ExprOrSuper;
use swc_ecmascript::ast::Ident;
use swc_ecmascript::ast::MemberExpr;
use swc_ecmascript::ast::ObjectPatProp;
use swc_ecmascript::ast::Pat;
use swc_ecmascript::ast::PatOrExpr;
use swc_ecmascript::ast::Stmt;
use swc_ecmascript::utils::ident::IdentLike;
use swc_ecmascript::utils::Id;

use crate::ast::parse_script;
use crate::ast::ParsedSource;

pub mod fixup;
pub mod hoist;
pub mod printer;
pub mod require;
pub mod symbols;
pub mod transforms;
pub mod validate;

use hoist::TopLevelVars;
use printer::Printer;
use require::unwrap_parens;
use symbols::Symbols;
use validate::ValidationError;

/// Options which can be adjusted when rewriting a module.
pub struct RewriteOptions {
  /// Decides whether an otherwise-recognized require of the given
  /// specifier should be deferred. When absent, every recognized require
  /// is deferred. A require whose module is invoked in the same expression
  /// is always deferred regardless of this filter.
  pub should_replace_require: Option<Rc<dyn Fn(&str) -> bool>>,
  /// The module body is a bundler registration of the shape
  /// `__commonJS["..."] = function (..) { .. }`; rewriting descends into
  /// the wrapper function as if its body were the top of the module.
  pub wrapped: bool,
  /// Enables the validator. Outside strict mode unsafe top-level patterns
  /// are emitted unchanged.
  pub strict: bool,
}

impl Default for RewriteOptions {
  fn default() -> Self {
    RewriteOptions {
      should_replace_require: None,
      wrapped: false,
      strict: true,
    }
  }
}

/// The result of rewriting one module.
#[derive(Debug)]
pub struct RewriteOutput {
  pub js: String,
  pub validation_errors: Vec<ValidationError>,
}

/// Per-module state accumulated during a single rewrite pass. Owned by
/// exactly one pass; nothing here is shared.
pub(crate) struct RewriteContext<'a> {
  pub options: &'a RewriteOptions,
  pub symbols: Symbols,
  pub printer: Printer,
  pub top_level_vars: TopLevelVars,
  pub errors: Vec<ValidationError>,
  pub no_rewrite: bool,
}

impl<'a> RewriteContext<'a> {
  pub fn should_replace(&self, specifier: &str) -> bool {
    match &self.options.should_replace_require {
      Some(filter) => filter(specifier),
      None => true,
    }
  }
}

/// Rewrites a parsed CommonJS module so that it can run at snapshot time:
/// recognized requires and host-global accesses are deferred behind lazy
/// accessors, unsafe patterns are replaced by throwing thunks or abandon
/// the rewrite altogether.
pub fn rewrite_module(
  parsed: &ParsedSource,
  options: &RewriteOptions,
) -> Result<RewriteOutput, AnyError> {
  log::debug!("rewriting {}", parsed.specifier());
  let (functions, deferrable) =
    collect_module_bindings(&parsed.script().body, options.wrapped);
  let mut ctx = RewriteContext {
    options,
    symbols: Symbols::new(parsed.unresolved_ctxt(), functions, deferrable),
    printer: Printer::new(parsed.source_map()),
    top_level_vars: TopLevelVars::new(),
    errors: Vec::new(),
    no_rewrite: false,
  };

  process_stmts(&mut ctx, &parsed.script().body)?;

  if ctx.no_rewrite {
    log::debug!("abandoning rewrite of {}", parsed.specifier());
    let mut printer = Printer::new(parsed.source_map());
    for stmt in &parsed.script().body {
      printer.print_stmt(stmt)?;
    }
    return Ok(RewriteOutput {
      js: printer.into_string()?,
      validation_errors: ctx.errors,
    });
  }

  debug_assert_eq!(
    ctx.symbols.unresolved_pending(),
    0,
    "every pending name slot must be resolved by end of pass"
  );

  let js = ctx.printer.into_string()?;
  let js = fixup::apply_fixups(js, &ctx.symbols, &mut ctx.top_level_vars);
  let js = hoist::splice_declarations(js, &ctx.top_level_vars);
  Ok(RewriteOutput {
    js,
    validation_errors: ctx.errors,
  })
}

/// Parses and rewrites in one step.
pub fn rewrite_source(
  specifier: &str,
  source: &str,
  options: &RewriteOptions,
) -> Result<RewriteOutput, AnyError> {
  rewrite_module(&parse_script(specifier, source)?, options)
}

fn process_stmts(
  ctx: &mut RewriteContext,
  stmts: &[Stmt],
) -> Result<(), AnyError> {
  for stmt in stmts {
    process_stmt(ctx, stmt)?;
    if ctx.no_rewrite {
      return Ok(());
    }
  }
  Ok(())
}

fn process_stmt(
  ctx: &mut RewriteContext,
  stmt: &Stmt,
) -> Result<(), AnyError> {
  let region_start = ctx.printer.offset();
  match stmt {
    Stmt::Decl(Decl::Var(var_decl)) => {
      if !transforms::rewrite_var_decl(ctx, var_decl)? {
        default_print(ctx, stmt)?;
      }
    }
    Stmt::Expr(expr_stmt) => {
      let expr = unwrap_parens(&expr_stmt.expr);
      process_expr_stmt(ctx, stmt, expr)?;
      if ctx.no_rewrite {
        return Ok(());
      }
    }
    Stmt::If(if_stmt) => {
      let mut deferred = None;
      if ctx.options.strict {
        if let Some(error) = validate::probe_error(&ctx.symbols, &if_stmt.test)
        {
          log::debug!("{}", error);
          let mut if_stmt = if_stmt.clone();
          if_stmt.test = Box::new(transforms::raw_expr(&error.thunk()));
          ctx.errors.push(error);
          deferred = Some(Stmt::If(if_stmt));
        }
      }
      match deferred {
        Some(stmt) => default_print(ctx, &stmt)?,
        None => default_print(ctx, stmt)?,
      }
    }
    Stmt::Return(return_stmt) => {
      let mut deferred = None;
      if ctx.options.strict {
        if let Some(arg) = &return_stmt.arg {
          if let Expr::Cond(cond) = unwrap_parens(arg) {
            if let Some(error) = validate::probe_error(&ctx.symbols, &cond.test)
            {
              log::debug!("{}", error);
              let mut return_stmt = return_stmt.clone();
              return_stmt.arg =
                Some(Box::new(transforms::raw_expr(&error.thunk())));
              ctx.errors.push(error);
              deferred = Some(Stmt::Return(return_stmt));
            }
          }
        }
      }
      match deferred {
        Some(stmt) => default_print(ctx, &stmt)?,
        None => default_print(ctx, stmt)?,
      }
    }
    _ => default_print(ctx, stmt)?,
  }
  fixup::resolve_placeholders(&mut ctx.printer, &mut ctx.symbols, region_start)
}

fn process_expr_stmt(
  ctx: &mut RewriteContext,
  stmt: &Stmt,
  expr: &Expr,
) -> Result<(), AnyError> {
  if ctx.options.wrapped {
    if let Some((member, params, body)) = match_wrapper(expr) {
      return emit_wrapped(ctx, member, params, body);
    }
  }
  if let Expr::Assign(assign) = expr {
    if ctx.options.strict {
      if let Some(error) = validate::check_assignment(&ctx.symbols, assign) {
        log::debug!("{}", error);
        ctx.errors.push(error);
        ctx.no_rewrite = true;
        return Ok(());
      }
    }
    if transforms::rewrite_assignment(ctx, assign)? {
      return Ok(());
    }
    return default_print(ctx, stmt);
  }
  if let Some(iife) = match_iife(expr) {
    return emit_iife(ctx, &iife);
  }
  default_print(ctx, stmt)
}

fn default_print(
  ctx: &mut RewriteContext,
  stmt: &Stmt,
) -> Result<(), AnyError> {
  let folded = transforms::fold_stmt(&mut ctx.symbols, stmt);
  ctx.printer.print_stmt(&folded)
}

/// A function literal that is directly invoked where it stands. Statements
/// in its body run at the top of the module, so rewriting descends into it;
/// any other function body is left for use time, when the host is back.
struct Iife<'a> {
  name: Option<&'a Ident>,
  params: Vec<&'a Pat>,
  body: &'a [Stmt],
  /// `call` or `apply` when the literal is invoked through one of those.
  method: Option<&'a str>,
  args: &'a [ExprOrSpread],
  is_arrow: bool,
}

fn iife_parts(
  expr: &Expr,
) -> Option<(Option<&Ident>, Vec<&Pat>, &[Stmt], bool)> {
  match unwrap_parens(expr) {
    Expr::Fn(fn_expr) => {
      let function = &fn_expr.function;
      if function.is_async || function.is_generator {
        return None;
      }
      let body = function.body.as_ref()?;
      Some((
        fn_expr.ident.as_ref(),
        function.params.iter().map(|param| &param.pat).collect(),
        &body.stmts,
        false,
      ))
    }
    Expr::Arrow(arrow) => {
      if arrow.is_async {
        return None;
      }
      match &arrow.body {
        BlockStmtOrExpr::BlockStmt(block) => {
          Some((None, arrow.params.iter().collect(), &block.stmts, true))
        }
        BlockStmtOrExpr::Expr(_) => None,
      }
    }
    _ => None,
  }
}

fn match_iife(expr: &Expr) -> Option<Iife> {
  let call = match unwrap_parens(expr) {
    Expr::Call(call) => call,
    _ => return None,
  };
  let callee = match &call.callee {
    ExprOrSuper::Expr(callee) => unwrap_parens(callee),
    ExprOrSuper::Super(_) => return None,
  };
  if let Some((name, params, body, is_arrow)) = iife_parts(callee) {
    return Some(Iife {
      name,
      params,
      body,
      method: None,
      args: &call.args,
      is_arrow,
    });
  }
  if let Expr::Member(member) = callee {
    if member.computed {
      return None;
    }
    let method = match &*member.prop {
      Expr::Ident(ident) if ident.sym == *"call" => "call",
      Expr::Ident(ident) if ident.sym == *"apply" => "apply",
      _ => return None,
    };
    let obj = match &member.obj {
      ExprOrSuper::Expr(obj) => unwrap_parens(obj),
      ExprOrSuper::Super(_) => return None,
    };
    let (name, params, body, is_arrow) = iife_parts(obj)?;
    return Some(Iife {
      name,
      params,
      body,
      method: Some(method),
      args: &call.args,
      is_arrow,
    });
  }
  None
}

fn emit_iife(ctx: &mut RewriteContext, iife: &Iife) -> Result<(), AnyError> {
  let mut params = Vec::new();
  for pat in &iife.params {
    params.push(ctx.printer.stringify_pat(pat)?);
  }
  let params = params.join(", ");
  if iife.is_arrow {
    ctx.printer.print_raw(&format!("(({}) => {{\n", params));
  } else {
    match iife.name {
      Some(name) => ctx
        .printer
        .print_raw(&format!("(function {}({}) {{\n", name.sym, params)),
      None => ctx.printer.print_raw(&format!("(function ({}) {{\n", params)),
    }
  }

  process_stmts(ctx, iife.body)?;
  if ctx.no_rewrite {
    return Ok(());
  }

  let args = transforms::args_source(ctx, iife.args)?;
  match iife.method {
    Some(method) => {
      ctx.printer.print_raw(&format!("}}).{}({});\n", method, args))
    }
    None => ctx.printer.print_raw(&format!("}})({});\n", args)),
  }
  Ok(())
}

fn match_wrapper(expr: &Expr) -> Option<(&MemberExpr, Vec<&Pat>, &[Stmt])> {
  let assign = match unwrap_parens(expr) {
    Expr::Assign(assign) if assign.op == AssignOp::Assign => assign,
    _ => return None,
  };
  let target = match &assign.left {
    PatOrExpr::Expr(target) => unwrap_parens(target),
    PatOrExpr::Pat(pat) => match &**pat {
      Pat::Expr(target) => unwrap_parens(target),
      _ => return None,
    },
  };
  let member = match target {
    Expr::Member(member) if member.computed => member,
    _ => return None,
  };
  // only the bundler registration form is a wrapper; other function-valued
  // member assignments run at use time
  match &member.obj {
    ExprOrSuper::Expr(obj) => match unwrap_parens(obj) {
      Expr::Ident(ident) if ident.sym == *"__commonJS" => {}
      _ => return None,
    },
    ExprOrSuper::Super(_) => return None,
  }
  let function = match unwrap_parens(&assign.right) {
    Expr::Fn(fn_expr) => &fn_expr.function,
    _ => return None,
  };
  if function.is_async || function.is_generator {
    return None;
  }
  let body = function.body.as_ref()?;
  Some((
    member,
    function.params.iter().map(|param| &param.pat).collect(),
    &body.stmts,
  ))
}

fn emit_wrapped(
  ctx: &mut RewriteContext,
  member: &MemberExpr,
  params: Vec<&Pat>,
  body: &[Stmt],
) -> Result<(), AnyError> {
  let target = ctx.printer.stringify_expr(&Expr::Member(member.clone()))?;
  let mut param_texts = Vec::new();
  for pat in params {
    param_texts.push(ctx.printer.stringify_pat(pat)?);
  }
  ctx.printer.print_raw(&format!(
    "{} = function ({}) {{\n",
    target,
    param_texts.join(", ")
  ));

  process_stmts(ctx, body)?;
  if ctx.no_rewrite {
    return Ok(());
  }

  ctx.printer.print_raw("};\n");
  Ok(())
}

fn collect_module_bindings(
  stmts: &[Stmt],
  wrapped: bool,
) -> (HashSet<Id>, HashSet<Id>) {
  let mut functions = HashSet::new();
  let mut deferrable = HashSet::new();
  collect_stmts(stmts, wrapped, &mut functions, &mut deferrable);
  (functions, deferrable)
}

fn collect_stmts(
  stmts: &[Stmt],
  wrapped: bool,
  functions: &mut HashSet<Id>,
  deferrable: &mut HashSet<Id>,
) {
  for stmt in stmts {
    match stmt {
      Stmt::Decl(Decl::Var(var_decl)) => {
        for declarator in &var_decl.decls {
          collect_pat_ids(&declarator.name, deferrable);
        }
      }
      Stmt::Decl(Decl::Fn(fn_decl)) => {
        functions.insert(fn_decl.ident.to_id());
        deferrable.insert(fn_decl.ident.to_id());
      }
      Stmt::Decl(Decl::Class(class_decl)) => {
        deferrable.insert(class_decl.ident.to_id());
      }
      Stmt::Expr(expr_stmt) => {
        let expr = unwrap_parens(&expr_stmt.expr);
        if let Some(iife) = match_iife(expr) {
          collect_stmts(iife.body, wrapped, functions, deferrable);
        } else if wrapped {
          if let Some((_, _, body)) = match_wrapper(expr) {
            collect_stmts(body, wrapped, functions, deferrable);
          }
        }
      }
      _ => {}
    }
  }
}

/// Visits a pattern node, recursively collecting the ids of every name
/// that ends up in the local scope.
fn collect_pat_ids(pat: &Pat, ids: &mut HashSet<Id>) {
  match pat {
    Pat::Ident(binding_ident) => {
      ids.insert(binding_ident.id.to_id());
    }
    Pat::Array(array_pat) => {
      for elem in array_pat.elems.iter().flatten() {
        collect_pat_ids(elem, ids);
      }
    }
    Pat::Rest(rest_pat) => collect_pat_ids(&rest_pat.arg, ids),
    Pat::Object(object_pat) => {
      for prop in &object_pat.props {
        match prop {
          ObjectPatProp::Assign(assign) => {
            ids.insert(assign.key.to_id());
          }
          ObjectPatProp::KeyValue(key_value) => {
            collect_pat_ids(&key_value.value, ids);
          }
          ObjectPatProp::Rest(rest) => collect_pat_ids(&rest.arg, ids),
        }
      }
    }
    Pat::Assign(assign_pat) => collect_pat_ids(&assign_pat.left, ids),
    _ => {}
  }
}
