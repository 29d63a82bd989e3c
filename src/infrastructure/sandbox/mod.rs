pub mod predicate;

pub use predicate::PredicateEvaluator;
