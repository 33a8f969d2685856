use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Another instance already holds this name (case-insensitive).
    #[error("instance name '{name}' is already taken")]
    Duplicate { name: String },

    /// A persisted column holds a value this build does not understand.
    #[error("corrupt {column} value in store: '{value}'")]
    Corrupt { column: &'static str, value: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{message}")]
    Message { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

