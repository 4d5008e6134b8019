/// Database connection and schema creation
pub mod database;

/// Settings loaded from config.toml and environment variables
pub mod settings;

pub use settings::Settings;
