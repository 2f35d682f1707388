#![allow(missing_docs)]

use bson::document::ValueAccessError;
use mongodb::error::Error as MongoError;
use mongodb::error::{ErrorKind, WriteFailure};
use std::result::Result as StdResult;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("mongodb driver error")]
    Mongo {
        #[from]
        source: MongoError,
    },
    #[error("postgres error")]
    Postgres {
        #[from]
        source: postgres::Error,
    },
    #[error("mongodb document value error")]
    Bson {
        #[from]
        source: ValueAccessError,
    },
    #[error("check permission for database {db:?} failed, connection string: {uri:?}, detailed: {detail}")]
    PermissionError { uri: String, db: String, detail: String },
    #[error("namespace {ns:?} is not present in the schema")]
    UnknownNamespace { ns: String },
    #[error("namespace {0:?} is not of the form <database>.<collection>")]
    BadNamespace(String),
    #[error("collection {ns:?} maps no column to the _id field")]
    NoPrimaryKey { ns: String },
    #[error("unsupported column type {sql_type:?} for {table}.{column}")]
    UnsupportedColumnType {
        table: String,
        column: String,
        sql_type: String,
    },
    #[error("cannot coerce {value} into {table}.{column}")]
    ValueCoercion {
        table: String,
        column: String,
        value: String,
    },
    #[error("oplog delete selector for {ns:?} carries no _id")]
    NoSelectorId { ns: String },
    #[error("the oplog has no entries; is the source a replica set member?")]
    EmptyOplog,
}

pub type Result<T> = StdResult<T, SyncError>;

/// How the retry harness should treat a failure, decided once at the
/// driver boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Generic source connection or operation failure; worth retrying.
    Transient,
    /// Duplicate key (codes 11000/11001); waiting cannot fix it.
    DuplicateKey,
    /// The server discarded our cursor; the surrounding operation is dead.
    CursorInvalidated,
    /// Everything else, including all target-side errors; propagate.
    Other,
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Mongo { source } => classify_mongo(source),
            _ => ErrorClass::Other,
        }
    }
}

fn classify_mongo(err: &MongoError) -> ErrorClass {
    match err.kind.as_ref() {
        ErrorKind::Command(c) => classify_code_message(Some(c.code), &c.message),
        ErrorKind::Write(WriteFailure::WriteError(w)) => {
            classify_code_message(Some(w.code), &w.message)
        }
        ErrorKind::Write(_) => ErrorClass::Transient,
        ErrorKind::BulkWrite(failure) => {
            let duplicate = failure.write_errors.as_ref().map_or(false, |errs| {
                errs.iter().any(|w| is_duplicate_key_code(w.code))
            });
            if duplicate {
                ErrorClass::DuplicateKey
            } else {
                ErrorClass::Transient
            }
        }
        ErrorKind::Io(_)
        | ErrorKind::ConnectionPoolCleared { .. }
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::DnsResolve { .. } => ErrorClass::Transient,
        _ => ErrorClass::Other,
    }
}

pub(crate) fn classify_code_message(code: Option<i32>, message: &str) -> ErrorClass {
    match code {
        Some(code) if is_duplicate_key_code(code) => ErrorClass::DuplicateKey,
        // server-side CursorNotFound.
        Some(43) => ErrorClass::CursorInvalidated,
        _ if message.starts_with("Query response returned CURSOR_NOT_FOUND") => {
            ErrorClass::CursorInvalidated
        }
        _ => ErrorClass::Transient,
    }
}

fn is_duplicate_key_code(code: i32) -> bool {
    code == 11000 || code == 11001
}
