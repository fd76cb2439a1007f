use thiserror::Error;

// ---

#[derive(Debug, Error)]
pub enum CellsimError {
    // ---
    #[error("config error: {0}")]
    Config(String),

    #[error("{op} failed on interface {iface}: {source}")]
    Socket {
        op: &'static str,
        iface: String,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---

pub type Result<T> = std::result::Result<T, CellsimError>;
