// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
  static ref USE_STRICT_RE: Regex =
    Regex::new(r#"(?m)^[ \t]*("use strict"|'use strict');?"#).unwrap();
  static ref WRAPPER_RE: Regex =
    Regex::new(r#"__commonJS\[[^\]]+\]\s*=\s*function\s*\([^)]*\)\s*\{"#)
      .unwrap();
}

/// An accessor name that must be declared before the byte offset at which a
/// late assignment first used it.
#[derive(Debug, Clone)]
pub struct TopLevelVar {
  pub name: String,
  pub offset: usize,
}

/// The ordered set of names the hoister declares at end of pass. Accessor
/// *function declarations* are hoisted by JavaScript semantics and never
/// land here; only the assignment targets of late-assigned accessors do.
#[derive(Debug, Default)]
pub struct TopLevelVars {
  vars: Vec<TopLevelVar>,
}

impl TopLevelVars {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.vars.is_empty()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.vars.iter().any(|var| var.name == name)
  }

  /// Tracks a name for hoisting. Returns false when the name was already
  /// tracked by an earlier use.
  pub fn track(&mut self, name: &str, offset: usize) -> bool {
    if self.contains(name) {
      return false;
    }
    log::trace!("hoist {} (used at {})", name, offset);
    self.vars.push(TopLevelVar {
      name: name.to_string(),
      offset,
    });
    true
  }

  pub fn offsets_mut(&mut self) -> impl Iterator<Item = &mut usize> {
    self.vars.iter_mut().map(|var| &mut var.offset)
  }
}

/// Positions at which a hoisted declaration may be inserted, in priority
/// order: after every `"use strict"` directive's terminating newline,
/// failing those after a bundler wrapper opener, failing those the start of
/// the file.
fn find_anchors(js: &str) -> Vec<usize> {
  let mut anchors: Vec<usize> = USE_STRICT_RE
    .find_iter(js)
    .map(|m| after_newline(js, m.end()))
    .collect();
  if anchors.is_empty() {
    anchors = WRAPPER_RE
      .find_iter(js)
      .map(|m| after_newline(js, m.end()))
      .collect();
  }
  if anchors.is_empty() {
    anchors.push(0);
  }
  anchors
}

fn after_newline(js: &str, pos: usize) -> usize {
  match js[pos..].find('\n') {
    Some(i) => pos + i + 1,
    None => js.len(),
  }
}

/// Splices one `let a, b, …;` declaration per anchor into the emitted text.
/// Each tracked name belongs to the greatest anchor below its first use;
/// names used before every anchor are declared at the start of the file.
pub fn splice_declarations(mut js: String, vars: &TopLevelVars) -> String {
  if vars.is_empty() {
    return js;
  }
  let anchors = find_anchors(&js);

  let mut groups: Vec<(usize, Vec<&str>)> =
    anchors.iter().map(|anchor| (*anchor, Vec::new())).collect();
  groups.sort_by_key(|(anchor, _)| *anchor);
  for var in &vars.vars {
    let slot = groups
      .iter_mut()
      .rev()
      .find(|(anchor, _)| *anchor <= var.offset);
    match slot {
      Some((_, names)) => names.push(&var.name),
      None => {
        if groups.first().map(|(anchor, _)| *anchor) != Some(0) {
          groups.insert(0, (0, Vec::new()));
        }
        groups[0].1.push(&var.name);
      }
    }
  }

  let mut delta = 0;
  for (anchor, names) in groups {
    if names.is_empty() {
      continue;
    }
    let decl = format!("let {};\n", names.join(", "));
    log::debug!("hoisting {} declaration(s) at offset {}", names.len(), anchor);
    js.insert_str(anchor + delta, &decl);
    delta += decl.len();
  }
  js
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_track_dedupes() {
    let mut vars = TopLevelVars::new();
    assert!(vars.track("__get_a__", 10));
    assert!(!vars.track("__get_a__", 20));
    assert!(vars.track("__get_b__", 30));
    assert!(vars.contains("__get_a__"));
  }

  #[test]
  fn test_splice_at_file_start() {
    let mut vars = TopLevelVars::new();
    vars.track("__get_a__", 8);
    let js = "let a;\n__get_a__ = function() {};\n".to_string();
    let out = splice_declarations(js, &vars);
    assert_eq!(
      out,
      "let __get_a__;\nlet a;\n__get_a__ = function() {};\n"
    );
  }

  #[test]
  fn test_splice_after_use_strict() {
    let js = "\"use strict\";\nlet a;\na = 1;\n".to_string();
    let mut vars = TopLevelVars::new();
    vars.track("__get_a__", js.len() - 1);
    let out = splice_declarations(js, &vars);
    assert_eq!(
      out,
      "\"use strict\";\nlet __get_a__;\nlet a;\na = 1;\n"
    );
  }

  #[test]
  fn test_splice_after_wrapper_opener() {
    let js = "__commonJS[\"/a.js\"] = function (require, module, exports) {\nlet a;\na = 1;\n};\n"
      .to_string();
    let offset = js.find("a = 1").unwrap();
    let mut vars = TopLevelVars::new();
    vars.track("__get_a__", offset);
    let out = splice_declarations(js, &vars);
    assert!(out.starts_with(
      "__commonJS[\"/a.js\"] = function (require, module, exports) {\nlet __get_a__;\n"
    ));
  }

  #[test]
  fn test_splice_partitions_by_anchor() {
    let js = "\"use strict\";\nfirst();\n\"use strict\";\nsecond();\n"
      .to_string();
    let first_use = js.find("first").unwrap();
    let second_use = js.find("second").unwrap();
    let mut vars = TopLevelVars::new();
    vars.track("__get_a__", first_use);
    vars.track("__get_b__", second_use);
    let out = splice_declarations(js, &vars);
    assert_eq!(
      out,
      "\"use strict\";\nlet __get_a__;\nfirst();\n\"use strict\";\nlet __get_b__;\nsecond();\n"
    );
  }

  #[test]
  fn test_use_before_all_anchors_lands_at_start() {
    let js = "early();\n\"use strict\";\nlate();\n".to_string();
    let mut vars = TopLevelVars::new();
    vars.track("__get_a__", 2);
    let out = splice_declarations(js, &vars);
    assert!(out.starts_with("let __get_a__;\nearly();\n"));
  }
}
