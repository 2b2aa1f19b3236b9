use thiserror::Error;

/// Result alias for `clusterops`.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
///
/// Configuration and precondition errors are raised before any remote call
/// or mutation. Partial-write failures are never errors: they are reported in
/// [`BatchResult::failed_documents`](crate::store::BatchResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad algorithm name, bad parameters, unsupported field count.
    Configuration,
    /// Operation would clobber existing results, or state not ready.
    Precondition,
    /// Remote data or in-memory data does not have the expected shape.
    Data,
    /// A clustering backend was compiled out.
    OptionalDependency,
    /// A whole request/response round with the document store failed.
    Store,
}

/// Errors returned by clustering, binding and orchestration.
#[derive(Debug, Error)]
pub enum Error {
    /// Input was empty.
    #[error("empty input provided")]
    EmptyInput,

    /// Vector dimension mismatch.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Found dimension.
        found: usize,
    },

    /// Invalid number of clusters requested.
    #[error("cannot create {requested} clusters from {n_items} items")]
    InvalidClusterCount {
        /// Requested count.
        requested: usize,
        /// Number of items.
        n_items: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Error message.
        message: String,
    },

    /// No clustering strategy is registered under this name.
    #[error("unknown clustering algorithm '{0}'")]
    UnknownAlgorithm(String),

    /// The strategy exists but its backend was not compiled in.
    #[error("clustering algorithm '{algorithm}' is unavailable: rebuild with `--features {feature}`")]
    FeatureUnavailable {
        /// Strategy name.
        algorithm: String,
        /// Cargo feature that provides it.
        feature: &'static str,
    },

    /// The algorithm does not provide the requested capability.
    #[error("'{algorithm}' does not support {capability}")]
    Unsupported {
        /// Strategy name.
        algorithm: &'static str,
        /// Missing capability.
        capability: &'static str,
    },

    /// Centers or centroids requested before `fit_transform`.
    #[error("'{0}' has not been fitted yet")]
    NotFitted(&'static str),

    /// More vector fields were supplied than the operation handles.
    #[error("{operation} supports at most {max} vector field(s), got {found}")]
    TooManyVectorFields {
        /// Operation name.
        operation: &'static str,
        /// Maximum supported.
        max: usize,
        /// Number supplied.
        found: usize,
    },

    /// Clustering output already exists at the label path.
    #[error("clustering results already exist at '{field}'; pass overwrite to replace them")]
    ResultsAlreadyExist {
        /// Label path present in the schema.
        field: String,
    },

    /// The cluster label field is absent from facet results.
    #[error("no clusters found for alias '{alias}' (field '{field}' is missing)")]
    MissingCluster {
        /// Alias looked up.
        alias: String,
        /// Label path looked up.
        field: String,
    },

    /// A document lacks a field the operation requires.
    #[error("document '{id}' is missing field '{field}'")]
    MissingField {
        /// Document id (or `<unknown>`).
        id: String,
        /// Missing field path.
        field: String,
    },

    /// A field that should hold a numeric vector does not.
    #[error("field '{field}' of document '{id}' is not a numeric vector")]
    InvalidVector {
        /// Document id.
        id: String,
        /// Field path.
        field: String,
    },

    /// Two sequences that must be zipped have different lengths.
    #[error("length mismatch: {left} {left_name} vs {right} {right_name}")]
    LengthMismatch {
        /// Left-hand description.
        left_name: &'static str,
        /// Left-hand length.
        left: usize,
        /// Right-hand description.
        right_name: &'static str,
        /// Right-hand length.
        right: usize,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A request to the document store failed as a whole.
    #[error("document store error: {0}")]
    Store(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for [`Error::InvalidParameter`].
    pub fn invalid_parameter(name: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownAlgorithm(_)
            | Error::InvalidParameter { .. }
            | Error::InvalidClusterCount { .. }
            | Error::TooManyVectorFields { .. }
            | Error::Unsupported { .. }
            | Error::Config(_) => ErrorKind::Configuration,
            Error::ResultsAlreadyExist { .. } | Error::NotFitted(_) => ErrorKind::Precondition,
            Error::EmptyInput
            | Error::DimensionMismatch { .. }
            | Error::MissingCluster { .. }
            | Error::MissingField { .. }
            | Error::InvalidVector { .. }
            | Error::LengthMismatch { .. }
            | Error::Json(_) => ErrorKind::Data,
            Error::FeatureUnavailable { .. } => ErrorKind::OptionalDependency,
            Error::Store(_) => ErrorKind::Store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_errors_are_distinct_from_data_errors() {
        let missing = Error::FeatureUnavailable {
            algorithm: "hdbscan".into(),
            feature: "hdbscan",
        };
        assert_eq!(missing.kind(), ErrorKind::OptionalDependency);
        assert!(missing.to_string().contains("--features hdbscan"));

        let data = Error::MissingField {
            id: "a".into(),
            field: "v".into(),
        };
        assert_eq!(data.kind(), ErrorKind::Data);
    }

    #[test]
    fn precondition_message_names_field() {
        let err = Error::ResultsAlreadyExist {
            field: "_cluster_.v.kmeans_3".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(err.to_string().contains("_cluster_.v.kmeans_3"));
    }
}
