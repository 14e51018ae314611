use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use libkvklink::prelude::*;

const PREFIXES: &[&str] = &["Acme", "Zeta", "Noord", "Holland", "Delta", "Van Dijk", "De Boer", "Jansen", "Bakker", "Visser"];
const SUFFIXES: &[&str] = &["Software", "Logistiek", "Bouw", "Transport", "Installatietechniek", "Holding", "Beheer", "Advies"];

fn registry() -> Vec<CanonicalEntity> {
  (0..20_000u32)
    .map(|n| {
      let name = format!("{} {} {n}", PREFIXES[n as usize % PREFIXES.len()], SUFFIXES[n as usize % SUFFIXES.len()]);

      CanonicalEntity::builder(Identifier::parse(&format!("{:08}", n + 1)).unwrap()).names(&[&name]).description("software").build()
    })
    .collect()
}

fn postings(c: &mut Criterion) {
  let index = SimilarityIndex::build(&registry(), 3).unwrap();
  let query = index.transform("Acme Software 1230");

  c.bench_function("postings_top_k", |b| b.iter(|| black_box(index.search(&query, 5, 0.8).unwrap())));
}

fn exhaustive(c: &mut Criterion) {
  let index = SimilarityIndex::build(&registry(), 3).unwrap();
  let query = index.transform("Acme Software 1230");

  c.bench_function("exhaustive_top_k", |b| b.iter(|| black_box(index.search_exhaustive(&query, 5, 0.8).unwrap())));
}

fn resolve(c: &mut Criterion) {
  let kb = KnowledgeBase::from_entities(registry(), LinkParams::default()).unwrap();

  c.bench_function("resolve", |b| b.iter(|| black_box(kb.resolve("De Boer Bouw B.V.").unwrap())));
}

criterion_group!(benches, postings, exhaustive, resolve);
criterion_main!(benches);
