pub mod env;
pub mod plans;
pub mod settings;
