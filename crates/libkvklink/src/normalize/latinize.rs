use any_ascii::any_ascii;

pub(crate) fn latinize(value: &str) -> String {
  if value.is_ascii() {
    return value.to_string();
  }

  any_ascii(value)
}

#[cfg(test)]
mod tests {
  #[test]
  fn latinize() {
    assert_eq!(super::latinize("Coöperatie"), "Cooperatie");
    assert_eq!(super::latinize("Café Müller"), "Cafe Muller");
    assert_eq!(super::latinize("Acme"), "Acme");
  }
}
