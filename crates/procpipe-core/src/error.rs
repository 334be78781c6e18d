use crate::process::ExitDisposition;
use thiserror::Error;

/// Core error types for process stream operations
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream is already bound to a process")]
    AlreadyBound,

    #[error("cannot bind a stream that has already closed")]
    BindAfterClose,

    #[error("invalid channel configuration: {0}")]
    Config(String),

    #[error("abnormal termination: {message}")]
    AbnormalTermination {
        disposition: ExitDisposition,
        message: String,
    },

    #[error("failed to spawn process `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process channel i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Check if this error was raised by a bind attempt rather than by the
    /// process itself. Bind errors are returned, never emitted as events.
    pub fn is_bind_error(&self) -> bool {
        matches!(
            self,
            StreamError::AlreadyBound
                | StreamError::BindAfterClose
                | StreamError::Config(_)
                | StreamError::Spawn { .. }
        )
    }

    /// Check if this error reports an abnormal process termination
    pub fn is_abnormal_termination(&self) -> bool {
        matches!(self, StreamError::AbnormalTermination { .. })
    }

    /// Exit disposition carried by this error, if any
    pub fn disposition(&self) -> Option<ExitDisposition> {
        match self {
            StreamError::AbnormalTermination { disposition, .. } => Some(*disposition),
            _ => None,
        }
    }

    /// Build the abnormal-termination error from the captured error-channel
    /// bytes, falling back to a generic message naming the disposition when
    /// the process wrote nothing to its error output.
    pub fn abnormal(disposition: ExitDisposition, error_output: &[u8]) -> Self {
        let captured = String::from_utf8_lossy(error_output).trim().to_string();
        let message = if captured.is_empty() {
            format!("process terminated by {disposition}")
        } else {
            captured
        };

        StreamError::AbnormalTermination {
            disposition,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(StreamError::AlreadyBound.is_bind_error());
        assert!(StreamError::BindAfterClose.is_bind_error());
        assert!(StreamError::Config("event_capacity must be at least 1".to_string()).is_bind_error());
        assert!(
            StreamError::Spawn {
                command: "missing".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }
            .is_bind_error()
        );

        let abnormal = StreamError::abnormal(ExitDisposition::Code(2), b"");
        assert!(!abnormal.is_bind_error());
        assert!(abnormal.is_abnormal_termination());
        assert_eq!(abnormal.disposition(), Some(ExitDisposition::Code(2)));
    }

    #[test]
    fn test_abnormal_uses_error_output() {
        let err = StreamError::abnormal(ExitDisposition::Code(1), b"  command not found\n");
        let display = format!("{err}");
        assert!(display.contains("command not found"));
        assert!(!display.contains('\n'));
    }

    #[test]
    fn test_abnormal_without_error_output_names_disposition() {
        let err = StreamError::abnormal(ExitDisposition::Signal(9), b"   \n");
        let display = format!("{err}");
        assert!(display.contains("signal 9"));
    }

    #[test]
    fn test_error_display() {
        let err = StreamError::Spawn {
            command: "identify".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let display = format!("{err}");
        assert!(display.contains("identify"));

        let err = StreamError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(format!("{err}").contains("i/o error"));
    }
}
