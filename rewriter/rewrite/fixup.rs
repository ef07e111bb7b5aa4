// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use anyhow::Error as AnyError;

use super::hoist::TopLevelVars;
use super::printer::Printer;
use super::symbols::NamedReference;
use super::symbols::Symbols;

const PLACEHOLDER_HEAD: &str = "__PENDING_REF_";

/// Swaps the placeholder tokens printed for still-undecided references in
/// the region from `region_start` to the end of the buffer back to their
/// original names, recording the exact byte offset of each as a
/// `NamedReference` for the end-of-pass fix-up.
pub fn resolve_placeholders(
  printer: &mut Printer,
  symbols: &mut Symbols,
  region_start: usize,
) -> Result<(), AnyError> {
  let region = printer.tail(region_start)?;
  if !region.contains(PLACEHOLDER_HEAD) {
    return Ok(());
  }
  let region = region.to_string();

  let mut out = String::with_capacity(region.len());
  let mut rest = region.as_str();
  let mut records = Vec::new();
  while let Some(i) = rest.find(PLACEHOLDER_HEAD) {
    out.push_str(&rest[..i]);
    let after = &rest[i + PLACEHOLDER_HEAD.len()..];
    let key = after
      .find("__")
      .and_then(|end| after[..end].parse::<usize>().ok().map(|k| (k, end)));
    let (key, end) = match key {
      Some(parsed) => parsed,
      None => {
        // not one of ours, emit the text verbatim
        out.push_str(PLACEHOLDER_HEAD);
        rest = after;
        continue;
      }
    };
    let pending = match symbols.pending(key) {
      Some(pending) => pending.clone(),
      None => panic!("unknown pending reference {}", key),
    };
    records.push(NamedReference {
      offset: region_start + out.len(),
      id: pending.id.clone(),
      original: pending.original.clone(),
    });
    out.push_str(&pending.original);
    symbols.mark_pending_resolved();
    rest = &after[end + 2..];
  }
  out.push_str(rest);

  printer.replace_tail(region_start, &out);
  for record in records {
    symbols.record_named(record);
  }
  Ok(())
}

fn is_word_byte(b: u8) -> bool {
  b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Finds the next word-boundary occurrence of `word` at or after `from`.
fn find_word(text: &str, from: usize, word: &str) -> Option<usize> {
  let bytes = text.as_bytes();
  for (i, _) in text[from..].match_indices(word) {
    let start = from + i;
    let end = start + word.len();
    let boundary_before = start == 0 || !is_word_byte(bytes[start - 1]);
    let boundary_after = end >= bytes.len() || !is_word_byte(bytes[end]);
    if boundary_before && boundary_after {
      return Some(start);
    }
  }
  None
}

/// Applies the recorded name slots in ascending byte-offset order: every
/// reference that was printed before its replacement was decided is patched
/// to the replacement text in one compacting rebuild of the buffer. Hoist
/// offsets recorded during the pass are translated across the applied
/// deltas so the hoister sees post-fix-up coordinates.
pub fn apply_fixups(
  js: String,
  symbols: &Symbols,
  vars: &mut TopLevelVars,
) -> String {
  let mut patches: Vec<(&NamedReference, &str)> = symbols
    .named_references()
    .iter()
    .filter_map(|named| {
      symbols
        .replacement(&named.id)
        .map(|replacement| (named, replacement.replaced.as_str()))
    })
    .collect();
  if patches.is_empty() {
    return js;
  }
  patches.sort_by_key(|(named, _)| named.offset);
  log::debug!("fixing up {} deferred reference(s)", patches.len());

  let mut out = String::with_capacity(js.len());
  let mut last = 0;
  let mut deltas: Vec<(usize, isize)> = Vec::new();
  for (named, replaced) in patches {
    let pos = match find_word(&js, named.offset.max(last), &named.original) {
      Some(pos) => pos,
      None => panic!(
        "named reference '{}' not found at offset {}",
        named.original, named.offset
      ),
    };
    out.push_str(&js[last..pos]);
    out.push_str(replaced);
    deltas
      .push((pos, replaced.len() as isize - named.original.len() as isize));
    last = pos + named.original.len();
  }
  out.push_str(&js[last..]);

  for offset in vars.offsets_mut() {
    let shift: isize = deltas
      .iter()
      .take_while(|(pos, _)| *pos < *offset)
      .map(|(_, delta)| *delta)
      .sum();
    *offset = (*offset as isize + shift) as usize;
  }

  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::parse_script;
  use std::collections::HashSet;
  use swc_common::SyntaxContext;
  use swc_common::DUMMY_SP;
  use swc_ecmascript::ast::Ident;
  use swc_ecmascript::utils::Id;

  fn symbols_with_deferrable(name: &str) -> (Symbols, Id) {
    let parsed = parse_script("file:///a.js", ";").unwrap();
    let id: Id = (name.into(), SyntaxContext::empty());
    let mut deferrable = HashSet::new();
    deferrable.insert(id.clone());
    (
      Symbols::new(parsed.unresolved_ctxt(), HashSet::new(), deferrable),
      id,
    )
  }

  fn printer() -> Printer {
    let parsed = parse_script("file:///a.js", ";").unwrap();
    Printer::new(parsed.source_map())
  }

  #[test]
  fn test_resolve_placeholders_records_offsets() {
    let (mut symbols, _id) = symbols_with_deferrable("foo");
    let mut printer = printer();

    let ident = Ident::new("foo".into(), DUMMY_SP);
    let placeholder = match symbols.name_for(&ident) {
      crate::rewrite::symbols::ResolvedName::Pending(p) => p,
      _ => panic!("expected pending"),
    };
    printer.print_raw(&format!("return {};\n", placeholder));
    resolve_placeholders(&mut printer, &mut symbols, 0).unwrap();

    let text = printer.into_string().unwrap();
    assert_eq!(text, "return foo;\n");
    assert_eq!(symbols.named_references().len(), 1);
    assert_eq!(symbols.named_references()[0].offset, 7);
    assert_eq!(symbols.unresolved_pending(), 0);
  }

  #[test]
  fn test_apply_fixups_patches_late_replacements() {
    let (mut symbols, id) = symbols_with_deferrable("foo");
    let mut printer = printer();

    let ident = Ident::new("foo".into(), DUMMY_SP);
    let placeholder = match symbols.name_for(&ident) {
      crate::rewrite::symbols::ResolvedName::Pending(p) => p,
      _ => panic!("expected pending"),
    };
    printer.print_raw(&format!("function f() {{ return {}; }}\n", placeholder));
    resolve_placeholders(&mut printer, &mut symbols, 0).unwrap();

    // the declaration later in the pass installs the accessor
    symbols.replace(id, "(__get_foo__())".to_string());

    let mut vars = TopLevelVars::new();
    vars.track("__get_bar__", 30);
    let js = printer.into_string().unwrap();
    let out = apply_fixups(js, &symbols, &mut vars);
    assert_eq!(out, "function f() { return (__get_foo__()); }\n");
    // the tracked offset moved by the patch delta
    let translated: Vec<usize> = vars.offsets_mut().map(|o| *o).collect();
    assert_eq!(translated, vec![30 + "(__get_foo__())".len() - "foo".len()]);
  }

  #[test]
  fn test_apply_fixups_without_replacement_is_verbatim() {
    let (mut symbols, _id) = symbols_with_deferrable("foo");
    let mut printer = printer();
    let ident = Ident::new("foo".into(), DUMMY_SP);
    let placeholder = match symbols.name_for(&ident) {
      crate::rewrite::symbols::ResolvedName::Pending(p) => p,
      _ => panic!("expected pending"),
    };
    printer.print_raw(&format!("use({});\n", placeholder));
    resolve_placeholders(&mut printer, &mut symbols, 0).unwrap();
    let js = printer.into_string().unwrap();
    let out = apply_fixups(js, &symbols, &mut TopLevelVars::new());
    assert_eq!(out, "use(foo);\n");
  }

  #[test]
  fn test_find_word_respects_boundaries() {
    let text = "foo2 = afoo; foo.bar";
    assert_eq!(find_word(text, 0, "foo"), Some(13));
    assert_eq!(find_word(text, 14, "foo"), None);
  }
}
