/// Input rejected before any network call is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyPrompt,
    MissingCredential,
    NonAsciiCredential,
    InvalidCount { count: u8, max: u8 },
    TooManyReferenceImages { count: usize, max: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyPrompt => write!(f, "enter a prompt"),
            ValidationError::MissingCredential => write!(f, "enter an API key"),
            ValidationError::NonAsciiCredential => {
                write!(f, "the API key may only contain ASCII letters, digits and symbols")
            }
            ValidationError::InvalidCount { count, max } => {
                write!(f, "image count {count} is outside 1..={max}")
            }
            ValidationError::TooManyReferenceImages { count, max } => {
                write!(f, "{count} reference images given, at most {max} are allowed")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    Validation(ValidationError),
    /// The submit call was rejected; carries the server message when present.
    Submission(String),
    /// A status or result call failed at the HTTP level.
    Transport(String),
    /// A response body did not match any known shape.
    Decode(String),
    Upload(String),
    /// The remote job reported `FAILED`.
    Failed(String),
    Cancelled,
    Timeout { attempts: u32 },
    MissingCredential,
}

impl JobError {
    /// Cancellation is a normal terminal state, everything else is a failure.
    pub fn is_failure(&self) -> bool {
        !matches!(self, JobError::Cancelled)
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::Validation(err) => write!(f, "{err}"),
            JobError::Submission(msg) => write!(f, "submission failed: {msg}"),
            JobError::Transport(msg) => write!(f, "{msg}"),
            JobError::Decode(msg) => write!(f, "unexpected response: {msg}"),
            JobError::Upload(msg) => write!(f, "upload failed: {msg}"),
            JobError::Failed(msg) => write!(f, "{msg}"),
            JobError::Cancelled => write!(f, "generation was cancelled"),
            JobError::Timeout { attempts } => write!(
                f,
                "timed out: image generation is taking too long ({attempts} status checks)"
            ),
            JobError::MissingCredential => write!(f, "API key not found"),
        }
    }
}

impl std::error::Error for JobError {}

impl From<ValidationError> for JobError {
    fn from(err: ValidationError) -> Self {
        JobError::Validation(err)
    }
}
