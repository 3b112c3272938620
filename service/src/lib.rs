//! Process-level infrastructure shared by the board binaries: command line and
//! environment configuration, plus logger setup.

pub mod config;
pub mod logging;
