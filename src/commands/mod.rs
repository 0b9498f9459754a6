pub mod migrate;
pub mod tfvars;

pub use migrate::MigrateCommand;
pub use tfvars::GenerateTfvarsCommand;
