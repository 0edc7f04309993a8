pub mod config;
pub mod diff;
pub mod pipeline;
pub mod report;
pub mod sandbox;
pub mod stage;
pub mod testcases;
