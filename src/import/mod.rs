pub mod audit;
pub mod config;
pub mod dates;
pub mod day;
pub mod episode;
pub mod paths;
pub mod progress;
pub mod prompts;
pub mod runner;
pub mod segment;
pub mod shutdown;
pub mod util;
pub mod warn;
