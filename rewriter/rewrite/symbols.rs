// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use std::collections::HashMap;
use std::collections::HashSet;
use swc_common::SyntaxContext;
use swc_ecmascript::ast::Ident;
use swc_ecmascript::utils::ident::IdentLike;
use swc_ecmascript::utils::Id;

/// Globals that must not be touched while the snapshot is being built. A
/// bare reference to one of these is rewritten to a `get_<name>()` call that
/// the snapshot shell provides at resume time.
const DEFERRED_GLOBALS: &[&str] =
  &["process", "document", "global", "window", "console"];

/// Globals that are always safe to reference eagerly.
const ALLOWED_GLOBALS: &[&str] = &["require", "Object"];

pub fn accessor_name(id: &str) -> String {
  format!("__get_{}__", id)
}

/// The accessor invocation, parenthesized because callers paste it into
/// arbitrary expression positions.
pub fn accessor_call(id: &str) -> String {
  format!("({}())", accessor_name(id))
}

/// The head used when declaring the accessor, `function <head> { .. }`.
pub fn accessor_decl(id: &str) -> String {
  format!("{}()", accessor_name(id))
}

pub fn global_call(name: &str) -> String {
  format!("get_{}()", name)
}

/// Follows the symbol table to the canonical identity of a reference. With
/// the resolver pass already applied, the identifier's syntax context is
/// canonical, so this is a plain projection.
pub fn resolve(ident: &Ident) -> Id {
  ident.to_id()
}

/// A name substitution installed for a canonical reference. Once installed,
/// every subsequent name query for the reference yields `replaced`.
#[derive(Debug, Clone)]
pub struct Replacement {
  pub original: String,
  pub replaced: String,
}

/// A reference that was printed before any decision was made about it: the
/// byte offset where its original name landed in the output, for the
/// post-emit fix-up to revisit.
#[derive(Debug, Clone)]
pub struct NamedReference {
  pub offset: usize,
  pub id: Id,
  pub original: String,
}

/// A reference about to be printed whose replacement is not decided yet.
/// The emitter prints a unique placeholder token in its place; placeholder
/// resolution swaps the token back to the original name and records the
/// exact byte offset as a `NamedReference`.
#[derive(Debug, Clone)]
pub struct PendingName {
  pub id: Id,
  pub original: String,
}

/// The outcome of a name query for one identifier occurrence.
pub enum ResolvedName {
  /// Print the original name.
  Original,
  /// Print this text instead of the name.
  Replaced(String),
  /// Print this placeholder; the occurrence may still become an accessor
  /// call later in the pass.
  Pending(String),
}

/// The symbol/reference layer of one module rewrite. Classifies canonical
/// references, owns installed replacements, and records the pending name
/// slots consumed by the post-emit fix-up.
pub struct Symbols {
  unresolved_ctxt: SyntaxContext,
  /// Names bound by top-level function declarations.
  functions: HashSet<Id>,
  /// Module-level bindings that could still be put behind an accessor by a
  /// later statement. Only these need pending name slots.
  deferrable: HashSet<Id>,
  replacements: HashMap<Id, Replacement>,
  pending: Vec<PendingName>,
  resolved_pending: usize,
  named: Vec<NamedReference>,
}

impl Symbols {
  pub fn new(
    unresolved_ctxt: SyntaxContext,
    functions: HashSet<Id>,
    deferrable: HashSet<Id>,
  ) -> Self {
    Self {
      unresolved_ctxt,
      functions,
      deferrable,
      replacements: HashMap::new(),
      pending: Vec::new(),
      resolved_pending: 0,
      named: Vec::new(),
    }
  }

  /// True when the reference has no binding site in the module, i.e. it
  /// refers to the ambient global scope.
  pub fn is_unbound(&self, id: &Id) -> bool {
    id.1 == self.unresolved_ctxt
  }

  pub fn is_function(&self, id: &Id) -> bool {
    self.functions.contains(id)
  }

  /// True when the reference is the ambient `process` global.
  pub fn is_process(&self, id: &Id) -> bool {
    self.is_unbound(id) && id.0 == *"process"
  }

  /// True when the reference cannot be hidden behind an accessor because
  /// module-system binding requires it to resolve at load time.
  pub fn is_unwrappable(&self, id: &Id) -> bool {
    self.is_unbound(id) || id.0 == *"exports" || id.0 == *"module"
  }

  /// `(name, needs_defer)` for references into the ambient global scope.
  pub fn global_entity<'i>(&self, id: &'i Id) -> Option<(&'i str, bool)> {
    if !self.is_unbound(id) {
      return None;
    }
    let name: &str = &id.0;
    Some((name, self.global_needs_defer(id)))
  }

  pub fn global_needs_defer(&self, id: &Id) -> bool {
    self.is_unbound(id)
      && DEFERRED_GLOBALS.contains(&&*id.0)
      && !ALLOWED_GLOBALS.contains(&&*id.0)
  }

  /// The name of an unbound global whose presence must not be probed at
  /// snapshot time. Allow-listed globals are always present.
  pub fn probeable_global(&self, id: &Id) -> Option<String> {
    if self.is_unbound(id) && !ALLOWED_GLOBALS.contains(&&*id.0) {
      Some(id.0.to_string())
    } else {
      None
    }
  }

  /// Installs a replacement for a canonical reference. Installing twice is
  /// a no-op; the first replacement wins.
  pub fn replace(&mut self, id: Id, replaced: String) {
    if self.replacements.contains_key(&id) {
      return;
    }
    log::trace!("replace {} -> {}", id.0, replaced);
    self.replacements.insert(
      id.clone(),
      Replacement {
        original: id.0.to_string(),
        replaced,
      },
    );
  }

  pub fn replacement(&self, id: &Id) -> Option<&Replacement> {
    self.replacements.get(id)
  }

  pub fn has_replacement(&self, id: &Id) -> bool {
    self.replacements.contains_key(id)
  }

  /// Resolves the text to print for one identifier occurrence. Deferred
  /// globals are renamed on the read side here rather than by mutating the
  /// symbol table.
  pub fn name_for(&mut self, ident: &Ident) -> ResolvedName {
    let id = resolve(ident);
    if let Some(replacement) = self.replacements.get(&id) {
      return ResolvedName::Replaced(replacement.replaced.clone());
    }
    if self.global_needs_defer(&id) {
      return ResolvedName::Replaced(global_call(&ident.sym));
    }
    if self.deferrable.contains(&id) {
      let placeholder = self.placeholder_for(&id);
      return ResolvedName::Pending(placeholder);
    }
    ResolvedName::Original
  }

  fn placeholder_for(&mut self, id: &Id) -> String {
    let key = self.pending.len();
    self.pending.push(PendingName {
      id: id.clone(),
      original: id.0.to_string(),
    });
    format!("__PENDING_REF_{}__", key)
  }

  pub fn pending(&self, key: usize) -> Option<&PendingName> {
    self.pending.get(key)
  }

  pub fn mark_pending_resolved(&mut self) {
    self.resolved_pending += 1;
  }

  pub fn unresolved_pending(&self) -> usize {
    self.pending.len() - self.resolved_pending
  }

  pub fn record_named(&mut self, named: NamedReference) {
    self.named.push(named);
  }

  pub fn named_references(&self) -> &[NamedReference] {
    &self.named
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use swc_common::Mark;
  use swc_common::DUMMY_SP;

  fn unresolved_ctxt() -> SyntaxContext {
    swc_common::GLOBALS.set(&swc_common::Globals::new(), || {
      SyntaxContext::empty().apply_mark(Mark::fresh(Mark::root()))
    })
  }

  fn unbound_id(sym: &str, ctxt: SyntaxContext) -> Id {
    (sym.into(), ctxt)
  }

  #[test]
  fn test_accessor_names_are_stable() {
    assert_eq!(accessor_name("foo"), "__get_foo__");
    assert_eq!(accessor_call("foo"), "(__get_foo__())");
    assert_eq!(accessor_decl("foo"), "__get_foo__()");
    assert_eq!(global_call("process"), "get_process()");
  }

  #[test]
  fn test_replace_is_idempotent() {
    let ctxt = unresolved_ctxt();
    let mut symbols =
      Symbols::new(ctxt, HashSet::new(), HashSet::new());
    let id = unbound_id("foo", SyntaxContext::empty());
    symbols.replace(id.clone(), "(__get_foo__())".to_string());
    symbols.replace(id.clone(), "other".to_string());
    assert_eq!(
      symbols.replacement(&id).unwrap().replaced,
      "(__get_foo__())"
    );
  }

  #[test]
  fn test_global_needs_defer() {
    let ctxt = unresolved_ctxt();
    let symbols = Symbols::new(ctxt, HashSet::new(), HashSet::new());
    assert!(symbols.global_needs_defer(&unbound_id("process", ctxt)));
    assert!(symbols.global_needs_defer(&unbound_id("console", ctxt)));
    assert!(!symbols.global_needs_defer(&unbound_id("require", ctxt)));
    assert!(!symbols.global_needs_defer(&unbound_id("Object", ctxt)));
    assert!(!symbols.global_needs_defer(&unbound_id("Buffer", ctxt)));
    // a bound `process` is not the global
    assert!(!symbols
      .global_needs_defer(&unbound_id("process", SyntaxContext::empty())));
  }

  #[test]
  fn test_global_entity() {
    let ctxt = unresolved_ctxt();
    let symbols = Symbols::new(ctxt, HashSet::new(), HashSet::new());
    assert_eq!(
      symbols.global_entity(&unbound_id("window", ctxt)),
      Some(("window", true))
    );
    assert_eq!(
      symbols.global_entity(&unbound_id("Buffer", ctxt)),
      Some(("Buffer", false))
    );
    assert_eq!(
      symbols.global_entity(&unbound_id("local", SyntaxContext::empty())),
      None
    );
    assert!(symbols.is_process(&unbound_id("process", ctxt)));
    assert!(!symbols.is_process(&unbound_id("process", SyntaxContext::empty())));
  }

  #[test]
  fn test_unwrappable() {
    let ctxt = unresolved_ctxt();
    let symbols = Symbols::new(ctxt, HashSet::new(), HashSet::new());
    assert!(symbols.is_unwrappable(&unbound_id("anything", ctxt)));
    assert!(
      symbols.is_unwrappable(&unbound_id("exports", SyntaxContext::empty()))
    );
    assert!(
      symbols.is_unwrappable(&unbound_id("module", SyntaxContext::empty()))
    );
    assert!(
      !symbols.is_unwrappable(&unbound_id("local", SyntaxContext::empty()))
    );
  }

  #[test]
  fn test_name_for_records_pending() {
    let ctxt = unresolved_ctxt();
    let local: Id = ("foo".into(), SyntaxContext::empty());
    let mut deferrable = HashSet::new();
    deferrable.insert(local.clone());
    let mut symbols = Symbols::new(ctxt, HashSet::new(), deferrable);

    let ident = Ident::new("foo".into(), DUMMY_SP);
    match symbols.name_for(&ident) {
      ResolvedName::Pending(placeholder) => {
        assert_eq!(placeholder, "__PENDING_REF_0__");
      }
      _ => panic!("expected a pending name"),
    }
    assert_eq!(symbols.pending(0).unwrap().original, "foo");
  }
}
