pub mod cli;
pub mod daemon;
pub mod run;
pub mod schedules;
