pub mod check;
pub mod monitor;
pub mod run;
