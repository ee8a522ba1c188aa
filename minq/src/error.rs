use crate::transaction::TransactionStatus;
use mongodb::{
    bson::Document,
    error::{ErrorKind, WriteFailure},
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MinqError>;

/// Mongo server error code for a violated unique index.
pub(crate) const DUPLICATE_KEY: i32 = 11000;

/// Mongo server error code for a write conflict, most commonly caused by
/// mutating the same field twice in one update.
pub(crate) const WRITE_CONFLICT: i32 = 112;

pub(crate) const WRITE_CONFLICT_HELP: &str = "This is usually the result of updating the same \
    field more than once in the same query. Mongo does not allow this and the driver does not \
    handle it well. Split the mutations into separate updates.";

#[derive(Debug, Error)]
pub enum MinqError {
    /// A field selector could not be compiled to a storage key. Always a
    /// programming error; never retried.
    #[error("unable to render field selector to a storage key: {reason}")]
    Render { reason: String },

    /// A terminal operation was invoked on a request chain that already
    /// executed. Carries the filter rendered at first execution.
    #[error(
        "the request chain was previously consumed by another action; \
         this is not allowed to prevent accidental DB spam (filter: {filter})"
    )]
    ConsumedRequest { filter: String },

    /// A request chain reached a terminal operation with zero clauses and no
    /// `all()` flag. Operating on an unconstrained filter is unsafe.
    #[error("refusing to execute an unconstrained filter; use all() to target the whole collection")]
    EmptyFilter,

    /// An update chain reached execution without a single mutation.
    #[error("the update chain contains no mutations")]
    EmptyUpdate,

    #[error("nothing to insert; at least one document is required")]
    EmptyInsert,

    /// A replace-by-id was attempted on a document that has never been
    /// assigned an identifier.
    #[error("document has no id; insert it before replacing it")]
    MissingId,

    /// A uniquely-constrained field was violated. Identification of the
    /// offending document is best-effort: with more than one failure in a
    /// batch the position cannot be trusted and is left unset.
    #[error("unique constraint violated; operation cannot proceed")]
    UniqueConstraint {
        suspected_position: Option<usize>,
        suspected_failure: Option<Document>,
        #[source]
        source: Box<mongodb::error::Error>,
    },

    #[error("write conflict encountered; check that you aren't updating the same field multiple times in one query")]
    WriteConflict {
        help: &'static str,
        #[source]
        source: Box<mongodb::error::Error>,
    },

    /// `search()` was invoked on a document type with no string-bearing
    /// fields.
    #[error("`{type_name}` has no string fields and cannot be searched")]
    NotSearchable { type_name: &'static str },

    /// A strict commit/abort was attempted on a transaction that already
    /// left the `Open` state.
    #[error("unable to commit or abort the transaction; it was already {status:?}")]
    TransactionState { status: TransactionStatus },

    #[error(transparent)]
    Mongo(Box<mongodb::error::Error>),
}

impl From<mongodb::error::Error> for MinqError {
    fn from(error: mongodb::error::Error) -> Self {
        Self::Mongo(Box::new(error))
    }
}

impl From<mongodb::bson::ser::Error> for MinqError {
    fn from(error: mongodb::bson::ser::Error) -> Self {
        Self::Render {
            reason: error.to_string(),
        }
    }
}

/// Maps a single-write driver error onto the MINQ taxonomy. Duplicate keys
/// become [`MinqError::UniqueConstraint`] (without a suspect; the caller may
/// attach one) and write conflicts become [`MinqError::WriteConflict`].
pub(crate) fn classify_write_error(error: mongodb::error::Error) -> MinqError {
    let code = match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => Some(write_error.code),
        ErrorKind::Command(command_error) => Some(command_error.code),
        _ => None,
    };

    match code {
        Some(DUPLICATE_KEY) => MinqError::UniqueConstraint {
            suspected_position: None,
            suspected_failure: None,
            source: Box::new(error),
        },
        Some(WRITE_CONFLICT) => MinqError::WriteConflict {
            help: WRITE_CONFLICT_HELP,
            source: Box::new(error),
        },
        _ => MinqError::Mongo(Box::new(error)),
    }
}
