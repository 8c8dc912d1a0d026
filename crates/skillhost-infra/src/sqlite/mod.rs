pub mod pool;
pub mod run;
