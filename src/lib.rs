#![deny(dead_code)]
#![deny(unused_imports)]
pub mod config;
pub mod data;
pub mod impute;
pub mod pool;
pub mod risk;
pub mod table;
