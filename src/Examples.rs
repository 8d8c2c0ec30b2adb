//! examples of usage of RustedTrustRegion
/// Trust region minimization examples
pub mod trust_region_examples;
