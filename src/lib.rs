pub mod config;
pub mod db;
pub mod logging;
pub mod review;
