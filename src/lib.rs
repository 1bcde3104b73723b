pub mod controller;
pub mod desktop;
pub mod error;
pub mod keyboard;
pub mod model;
pub mod planner;
pub mod signal;
pub mod sim;
pub mod strategy;
pub mod timing;
pub mod trace;
pub mod typo;
