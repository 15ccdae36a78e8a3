pub mod conversion;
pub mod runner;
pub mod upload;
