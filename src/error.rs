/// Error type for the ELF64 writer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unsupported target architecture: {0:?}")]
    UnsupportedArch(crate::module::TargetArch),

    #[error("external-call patch cannot be resolved in an executable")]
    UnsupportedPatch,

    #[error("internal layout error: expected write cursor at {expected}, found {actual}")]
    LayoutMismatch { expected: usize, actual: usize },

    #[error("failed to allocate {requested} bytes for the output buffer or an auxiliary table")]
    AllocationFailure { requested: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
