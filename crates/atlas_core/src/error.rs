use thiserror::Error;

/// Fatal error categories surfaced by the solve pipeline.
///
/// Everything is reported through `anyhow::Error`; these variants exist so
/// call sites (and tests) can downcast to the category instead of matching
/// on message text.
#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("system is not square: {equations} equations for {variables} variables")]
    NonSquareSystem { equations: usize, variables: usize },

    #[error("parameter `{0}` is required by the problem but missing from the sweep and fixed specifications")]
    MissingParameter(String),

    #[error("parameter `{0}` is specified more than once")]
    DuplicateParameter(String),

    #[error("unknown symbol `{0}`")]
    UnknownSymbol(String),

    #[error("degenerate linearization at grid point {point}: derivative coefficient matrix is singular")]
    DegenerateLinearization { point: usize },

    #[error("no steady states found at any grid point")]
    NoSolutionsFound,

    #[error("index has {got} dimensions but the grid has {ndim}")]
    BadIndex { got: usize, ndim: usize },

    #[error("unsupported branch sorting strategy `{0}`")]
    UnsupportedSorting(String),
}
