pub mod agent;
pub mod macro_run;
