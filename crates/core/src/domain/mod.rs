pub mod availability;
pub mod phase;
pub mod report;
