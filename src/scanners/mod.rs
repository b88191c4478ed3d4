pub mod catapult;
pub mod extractor;
pub mod service;

pub use catapult::CatapultScanner;
pub use service::{ScanService, ScanState, ScanStatus};
