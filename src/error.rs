/// Broad failure category, used by callers that react differently to
/// "no data", "bad configuration" and genuine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A component or setting could not be resolved from the configuration.
    Config,
    /// The target has no usable photometry.
    NoPhotometry,
    /// A weighted reduction received no samples or only zero weights.
    EmptyDistribution,
    /// The external sampler failed or produced unusable output.
    Inference,
    /// Filesystem failure.
    Io,
    /// A cache artifact could not be written or decoded.
    Cache,
    /// Malformed input file.
    Input,
}

impl ErrorKind {
    fn default_exit_code(self) -> u8 {
        match self {
            ErrorKind::Config | ErrorKind::Input => 2,
            ErrorKind::NoPhotometry => 3,
            ErrorKind::EmptyDistribution => 4,
            ErrorKind::Inference => 5,
            ErrorKind::Io | ErrorKind::Cache => 6,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    kind: ErrorKind,
    message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            exit_code: kind.default_exit_code(),
            kind,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn no_photometry(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoPhotometry, message)
    }

    pub fn empty_distribution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmptyDistribution, message)
    }

    pub fn inference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Inference, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cache, message)
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Input, message)
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
