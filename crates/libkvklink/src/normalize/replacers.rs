use std::sync::LazyLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

/// Characters dropped or rewritten before a name is cut into n-grams.
///
/// Removal patterns map to the empty string, `&` is spelled out and the
/// separators become spaces so the surrounding words stay apart.
const NGRAM_SYMBOLS: &[(&str, &str)] = &[
  ("\"", ""),
  ("'", ""),
  ("[", ""),
  ("]", ""),
  ("(", ""),
  (")", ""),
  ("{", ""),
  ("}", ""),
  ("|", ""),
  (".", ""),
  ("/", ""),
  ("&", "and"),
  (",", " "),
  ("-", " "),
];

pub(crate) static SYMBOLS: LazyLock<(AhoCorasick, Vec<&'static str>)> = LazyLock::new(|| {
  let patterns = NGRAM_SYMBOLS.iter().map(|(pattern, _)| *pattern).collect::<Vec<_>>();
  let replacements = NGRAM_SYMBOLS.iter().map(|(_, replacement)| *replacement).collect::<Vec<_>>();

  (
    AhoCorasickBuilder::new()
      .match_kind(MatchKind::LeftmostFirst)
      .build(patterns)
      .expect("could not build symbol replacer"),
    replacements,
  )
});

pub(crate) fn replace_symbols(haystack: &str) -> String {
  let (aho, replacements) = &*SYMBOLS;

  aho.replace_all(haystack, replacements)
}
