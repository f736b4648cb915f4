// Analysis pipeline: extraction, content identity, quota, cache, grading,
// result normalization and history. Handlers live here too; everything else in
// the crate is infrastructure around this module.

pub mod cache_store;
pub mod extractor;
pub mod handlers;
pub mod history;
pub mod identity;
pub mod invoker;
pub mod normalizer;
pub mod pipeline;
pub mod prompts;
pub mod quota;

#[cfg(test)]
pub mod memory;
