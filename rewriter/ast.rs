// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use anyhow::Error as AnyError;
use std::error::Error;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::RwLock;
use swc_common::errors::Diagnostic;
use swc_common::errors::DiagnosticBuilder;
use swc_common::errors::Emitter;
use swc_common::errors::Handler;
use swc_common::errors::HandlerFlags;
use swc_common::FileName;
use swc_common::Globals;
use swc_common::Loc;
use swc_common::Mark;
use swc_common::SourceMap;
use swc_common::Span;
use swc_common::SyntaxContext;
use swc_ecmascript::ast::Script;
use swc_ecmascript::parser::lexer::Lexer;
use swc_ecmascript::parser::EsConfig;
use swc_ecmascript::parser::JscTarget;
use swc_ecmascript::parser::StringInput;
use swc_ecmascript::parser::Syntax;
use swc_ecmascript::transforms::resolver::resolver_with_mark;
use swc_ecmascript::visit::FoldWith;

static TARGET: JscTarget = JscTarget::Es2020;

/// A buffer for collecting diagnostic messages from the AST parser.
#[derive(Debug)]
pub struct DiagnosticBuffer(Vec<String>);

impl Error for DiagnosticBuffer {}

impl fmt::Display for DiagnosticBuffer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = self.0.join(",");
    f.pad(&s)
  }
}

impl DiagnosticBuffer {
  pub fn from_error_buffer<F>(error_buffer: ErrorBuffer, get_loc: F) -> Self
  where
    F: Fn(Span) -> Loc,
  {
    let s = error_buffer.0.read().unwrap().clone();
    let diagnostics = s
      .iter()
      .map(|d| {
        let mut msg = d.message();

        if let Some(span) = d.span.primary_span() {
          let loc = get_loc(span);
          let file_name = match &loc.file.name {
            FileName::Custom(n) => n.clone(),
            _ => loc.file.name.to_string(),
          };
          msg = format!(
            "{} at {}:{}:{}",
            msg, file_name, loc.line, loc.col_display
          );
        }

        msg
      })
      .collect::<Vec<String>>();

    Self(diagnostics)
  }
}

/// A buffer for collecting errors from the AST parser.
#[derive(Debug, Clone)]
pub struct ErrorBuffer(Arc<RwLock<Vec<Diagnostic>>>);

impl ErrorBuffer {
  pub fn new() -> Self {
    Self(Arc::new(RwLock::new(Vec::new())))
  }
}

impl Emitter for ErrorBuffer {
  fn emit(&mut self, db: &DiagnosticBuilder) {
    self.0.write().unwrap().push((**db).clone());
  }
}

fn get_es_config() -> EsConfig {
  EsConfig {
    class_private_methods: true,
    class_private_props: true,
    class_props: true,
    dynamic_import: true,
    export_default_from: true,
    export_namespace_from: true,
    import_meta: true,
    nullish_coalescing: true,
    num_sep: true,
    optional_chaining: true,
    top_level_await: false,
    ..EsConfig::default()
  }
}

/// A parsed CommonJS module, resolved so that every identifier carries its
/// canonical syntax context. This is the input to the rewrite pass.
pub struct ParsedSource {
  specifier: String,
  script: Script,
  source_map: Rc<SourceMap>,
  unresolved_ctxt: SyntaxContext,
}

impl ParsedSource {
  pub fn specifier(&self) -> &str {
    &self.specifier
  }

  pub fn script(&self) -> &Script {
    &self.script
  }

  pub fn source_map(&self) -> Rc<SourceMap> {
    self.source_map.clone()
  }

  /// The syntax context carried by references that have no binding site in
  /// the module, i.e. references to the ambient global scope.
  pub fn unresolved_ctxt(&self) -> SyntaxContext {
    self.unresolved_ctxt
  }
}

/// Parses the source of a CommonJS module as a script and runs the resolver
/// pass over it so identifier references can be classified by the rewriter.
///
/// # Arguments
///
/// - `specifier` - The module specifier for the module.
/// - `source` - The source code for the module.
///
pub fn parse_script(
  specifier: &str,
  source: &str,
) -> Result<ParsedSource, AnyError> {
  let source_map = Rc::new(SourceMap::default());
  let source_file = source_map.new_source_file(
    FileName::Custom(specifier.to_string()),
    source.to_string(),
  );
  let error_buffer = ErrorBuffer::new();
  let input = StringInput::from(&*source_file);

  let handler = Handler::with_emitter_and_flags(
    Box::new(error_buffer.clone()),
    HandlerFlags {
      can_emit_warnings: true,
      dont_buffer_diagnostics: true,
      ..HandlerFlags::default()
    },
  );

  let lexer = Lexer::new(Syntax::Es(get_es_config()), TARGET, input, None);
  let mut parser = swc_ecmascript::parser::Parser::new_from(lexer);

  let sm = source_map.clone();
  let script = parser.parse_script().map_err(move |err| {
    let mut diagnostic = err.into_diagnostic(&handler);
    diagnostic.emit();

    AnyError::from(DiagnosticBuffer::from_error_buffer(error_buffer, |span| {
      sm.lookup_char_pos(span.lo)
    }))
  })?;

  let (script, unresolved_ctxt) =
    swc_common::GLOBALS.set(&Globals::new(), || {
      let top_level_mark = Mark::fresh(Mark::root());
      let script = script.fold_with(&mut resolver_with_mark(top_level_mark));
      let unresolved_ctxt =
        SyntaxContext::empty().apply_mark(top_level_mark);
      (script, unresolved_ctxt)
    });

  Ok(ParsedSource {
    specifier: specifier.to_string(),
    script,
    source_map,
    unresolved_ctxt,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_script() {
    let parsed = parse_script("file:///a.js", "const a = require('a');")
      .expect("could not parse script");
    assert_eq!(parsed.script().body.len(), 1);
    assert_eq!(parsed.specifier(), "file:///a.js");
  }

  #[test]
  fn test_parse_script_error() {
    let result = parse_script("file:///bad.js", "const a = ;");
    assert!(result.is_err());
  }

  #[test]
  fn test_unresolved_ctxt_distinguishes_bindings() {
    use swc_ecmascript::ast::Decl;
    use swc_ecmascript::ast::Pat;
    use swc_ecmascript::ast::Stmt;

    let parsed = parse_script("file:///a.js", "let bound = 1;")
      .expect("could not parse script");
    let ctxt = match &parsed.script().body[0] {
      Stmt::Decl(Decl::Var(var_decl)) => match &var_decl.decls[0].name {
        Pat::Ident(ident) => ident.id.span.ctxt,
        _ => unreachable!(),
      },
      _ => unreachable!(),
    };
    assert_ne!(ctxt, parsed.unresolved_ctxt());
  }
}
