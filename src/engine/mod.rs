pub mod assignment;
pub mod graph;
pub mod projector;
pub mod tokens;
pub mod verification;

#[cfg(test)]
pub(crate) mod fixtures;
