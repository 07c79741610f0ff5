//! Side-effecting collaborators: run control, solver processes, working
//! directories and output files.

pub mod config;
pub mod layout;
pub mod manifest;
pub mod process;
pub mod solver;
pub mod transmutation;
pub mod transport;
pub mod writer;
pub mod xs_data;
