pub mod pattern_classifier;
pub mod report;

pub use pattern_classifier::PatternClassifier;
pub use report::build_report;
