#![warn(clippy::unwrap_used)]
mod macros;
mod simulation;
mod testapi;
mod testmatch;
pub mod types;
pub mod utils;
pub mod vectors;

pub use simulation::{client_list, vector_dir, SimError, Simulation};
pub use testapi::{run_suite, Client, ClientTestSpec, Suite, Test, TestSpec, CLIENT_HTTP_PORT};
pub use testmatch::TestMatcher;
