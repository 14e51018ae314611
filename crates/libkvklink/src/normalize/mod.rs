//! Company name canonicalization.
//!
//! Two variants exist. [`clean_element`] is the light form used for alias
//! keys and registry names. [`clean_for_ngrams`] is the strict form applied
//! right before a name is cut into character n-grams. Both are total and
//! idempotent.

mod latinize;
pub(crate) mod replacers;

use itertools::Itertools;

use crate::normalize::{latinize::latinize, replacers::replace_symbols};

const QUOTES_AND_BRACKETS: [char; 4] = ['"', '\'', '[', ']'];

/// Token dropped from names before vectorization.
const DROPPED_TOKEN: &str = "bd";

/// Light normalization: strips quotes and square brackets, surrounding
/// whitespace, and lowercases.
pub fn clean_element(raw: &str) -> String {
  raw.chars().filter(|c| !QUOTES_AND_BRACKETS.contains(c)).collect::<String>().trim().to_lowercase()
}

/// Strict normalization feeding the n-gram vectorizer.
///
/// The result is either empty or padded with exactly one space on each side,
/// so that n-grams at the edges of the string carry word boundaries.
pub fn clean_for_ngrams(raw: &str) -> String {
  let lowered = latinize(&clean_element(raw)).to_lowercase();
  let replaced = replace_symbols(&lowered);
  let titled = title_case(&replaced);

  let collapsed = titled.split_whitespace().filter(|token| !token.eq_ignore_ascii_case(DROPPED_TOKEN)).join(" ");

  if collapsed.is_empty() {
    return collapsed;
  }

  format!(" {collapsed} ")
}

/// Uppercases the first letter of every word and lowercases the rest. A word
/// starts at any letter not directly preceded by another letter, so `3m`
/// becomes `3M`.
fn title_case(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  let mut previous_is_letter = false;

  for c in value.chars() {
    if previous_is_letter {
      out.extend(c.to_lowercase());
    } else {
      out.extend(c.to_uppercase());
    }

    previous_is_letter = c.is_alphabetic();
  }

  out
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  #[test]
  fn clean_element() {
    assert_eq!(super::clean_element("  \"Albert Heijn\" "), "albert heijn");
    assert_eq!(super::clean_element("['ING Groep']"), "ing groep");
    assert_eq!(super::clean_element(""), "");
  }

  #[test]
  fn clean_for_ngrams() {
    assert_eq!(super::clean_for_ngrams("Acme Corp"), " Acme Corp ");
    assert_eq!(super::clean_for_ngrams("AHOLD-DELHAIZE N.V."), " Ahold Delhaize Nv ");
    assert_eq!(super::clean_for_ngrams("C&A  (Nederland)"), " Canda Nederland ");
    assert_eq!(super::clean_for_ngrams("Koninklijke  Philips, Eindhoven"), " Koninklijke Philips Eindhoven ");
    assert_eq!(super::clean_for_ngrams("3m nederland"), " 3M Nederland ");
    assert_eq!(super::clean_for_ngrams("Coöperatie Rabobank"), " Cooperatie Rabobank ");
  }

  #[test]
  fn clean_for_ngrams_drops_bd_token() {
    assert_eq!(super::clean_for_ngrams("Holding BD Amsterdam"), " Holding Amsterdam ");
    assert_eq!(super::clean_for_ngrams("BDO Accountants"), " Bdo Accountants ");
  }

  #[test]
  fn clean_for_ngrams_empty() {
    assert_eq!(super::clean_for_ngrams(""), "");
    assert_eq!(super::clean_for_ngrams("   "), "");
    assert_eq!(super::clean_for_ngrams("[] ()"), "");
  }

  proptest! {
    #[test]
    fn clean_element_is_idempotent(raw in "[a-zA-Z0-9 \"'\\[\\]éÖ\t]{0,40}") {
      let once = super::clean_element(&raw);

      prop_assert_eq!(super::clean_element(&once), once);
    }

    #[test]
    fn clean_for_ngrams_is_idempotent(raw in "[a-zA-Z0-9 &,.()'\\-/|éöü]{0,40}") {
      let once = super::clean_for_ngrams(&raw);

      prop_assert_eq!(super::clean_for_ngrams(&once), once);
    }
  }
}
