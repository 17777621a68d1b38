//! One module per subcommand.
pub mod call;
pub mod catalog;
pub mod serve;
