pub mod attendance;
pub mod backup;
pub mod core;
pub mod dashboard;
pub mod fees;
pub mod reports;
pub mod setup;
pub mod students;
