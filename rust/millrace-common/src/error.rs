use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    /// The stage (or queue) no longer accepts work.
    pub fn closed(stage: impl Into<String>) -> Error {
        Error(ErrorKind::Closed { stage: stage.into() }.into())
    }

    /// The predecessor of a stage was canceled and has nothing left to hand out.
    pub fn exhausted(stage: impl Into<String>) -> Error {
        Error(ErrorKind::Exhausted { stage: stage.into() }.into())
    }

    pub fn spawn(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Spawn {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.kind(), ErrorKind::Closed { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("'{stage}' is already canceled")]
    Closed { stage: String },

    #[error("predecessor of '{stage}' is canceled and drained")]
    Exhausted { stage: String },

    #[error("failed to spawn thread for '{context}': {source}")]
    Spawn {
        context: String,
        source: std::io::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}
