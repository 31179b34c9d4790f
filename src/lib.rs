pub mod aggregate;
pub mod config;
pub mod corpus;
pub mod detector;
pub mod error;
pub mod http;
pub mod matching;
pub mod report;
pub mod runner;
