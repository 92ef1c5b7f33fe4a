#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod benchmark;
pub mod engine;
pub mod merge;
pub mod pipeline;
pub mod pivot;
pub mod types;

#[path = "../io/mod.rs"]
pub mod io;

#[path = "../report/mod.rs"]
pub mod report;
