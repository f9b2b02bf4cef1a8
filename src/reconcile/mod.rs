//! Reconciliation: snapshot comparison, summary statistics and diff artifacts.

pub mod engine;
pub mod output;

#[cfg(test)]
mod test_properties;
