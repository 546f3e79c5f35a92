use thiserror::Error;

/// Boxed error returned by a [`SchemaExecutor`](crate::SchemaExecutor).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("model {app_label}.{model_name} not found")]
    ModelNotFound {
        app_label: String,
        model_name: String,
    },

    #[error("unknown operation tag: {0}")]
    UnknownOperation(String),

    #[error("expected {expected}, found {found}")]
    InvalidExpressionType { expected: String, found: String },

    /// A DDL statement failed. The executor's error is kept as the source.
    #[error("{source}")]
    Ddl {
        sql: String,
        #[source]
        source: BoxError,
    },

    #[error("model {model} has no field {field:?}")]
    FieldNotFound { model: String, field: String },

    #[error("unsupported lookup {lookup:?} on {field:?}")]
    UnsupportedLookup { field: String, lookup: String },

    #[error("replay failed: {0}")]
    Replay(String),

    #[error("expression chain is finalized and cannot record more operations")]
    ChainFinalized,

    #[error("model {model} has no constraint named {name:?}")]
    UnknownConstraint { model: String, name: String },

    #[error("model {model} already has a constraint named {name:?}")]
    DuplicateConstraint { model: String, name: String },

    #[error("model {0} is already registered")]
    DuplicateModel(String),

    #[error("model {model} uses unrecognized option {option:?}")]
    UnknownOption { model: String, option: String },

    #[error("malformed deconstructed value: {0}")]
    Deconstruct(String),

    #[error("cannot inline query parameters: {0}")]
    Sql(#[from] tripwire_sql::InlineError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn model_not_found(app_label: &str, model_name: &str) -> Self {
        Error::ModelNotFound {
            app_label: app_label.to_string(),
            model_name: model_name.to_string(),
        }
    }

    pub(crate) fn invalid_type(expected: &str, found: impl Into<String>) -> Self {
        Error::InvalidExpressionType {
            expected: expected.to_string(),
            found: found.into(),
        }
    }

    pub(crate) fn deconstruct(msg: impl Into<String>) -> Self {
        Error::Deconstruct(msg.into())
    }
}
