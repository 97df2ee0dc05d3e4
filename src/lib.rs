#[macro_use]
extern crate log;

pub mod backend;
pub mod browse;
pub mod db_meta;
pub mod groups;
pub mod logger;
pub mod media;
pub mod objects;
pub mod scan;
pub mod schema;
pub mod sqlite;
#[cfg(test)]
pub mod testutil;
pub mod track;

pub const MEDIAD_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),
    DatabaseError(rusqlite::Error),
    OtherError,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Error {
        Error::DatabaseError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::IoError(e) => write!(f, "{}", e),
            Error::DatabaseError(e) => write!(f, "{}", e),
            Error::OtherError => write!(f, "Other error"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
