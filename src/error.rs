#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config {path}: {source}")]
    Config {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// The cluster could not be queried for workloads. This aborts a batch.
    #[error("cluster query failed: {0}")]
    Query(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("could not start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
