//! Error classification for user-facing notifications.
//!
//! Maps a failure onto client/server/network, and each class onto the short
//! notification the front-end shows instead of the raw error text.

use crate::error::VimoError;

/// Error classification for deciding what to tell the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Client errors (400-499) - bad input or unknown session, retrying won't help
    Client,
    /// Server errors (500-599) - backend trouble, may succeed later
    Server,
    /// Network errors - backend unreachable, timeouts
    Network,
}

/// Classify an error message into an ErrorType
pub fn classify_error(error: &str) -> ErrorType {
    if error.contains("status 400")
        || error.contains("Bad Request")
        || error.contains("status 401")
        || error.contains("status 403")
        || error.contains("status 404")
        || error.contains("status 409")
        || error.contains("status 422")
        || error.contains("Not Found")
        || error.contains("Validation error")
        || error.contains("is required")
    {
        return ErrorType::Client;
    }

    if error.contains("status 5")
        || error.contains("Internal Server Error")
        || error.contains("Service Unavailable")
        || error.contains("Gateway Timeout")
    {
        return ErrorType::Server;
    }

    ErrorType::Network
}

pub fn classify(error: &VimoError) -> ErrorType {
    match error {
        VimoError::Validation(_) => ErrorType::Client,
        VimoError::Http(e) if e.is_timeout() || e.is_connect() => ErrorType::Network,
        VimoError::Http(e) => match e.status() {
            Some(status) if status.is_client_error() => ErrorType::Client,
            Some(status) if status.is_server_error() => ErrorType::Server,
            _ => ErrorType::Network,
        },
        other => classify_error(&other.to_string()),
    }
}

/// Short notification text for an error class
pub fn notification_for(error: &VimoError) -> &'static str {
    match classify(error) {
        ErrorType::Client => "The request was rejected. Check your input and try again.",
        ErrorType::Server => "The processing service hit an error. Please try again later.",
        ErrorType::Network => {
            "Cannot reach the processing service. Make sure it is running and try again."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_client_errors() {
        assert_eq!(classify_error("status 400: video_path_list is required"), ErrorType::Client);
        assert_eq!(classify_error("status 404: Session not found"), ErrorType::Client);
        assert_eq!(classify_error("Bad Request"), ErrorType::Client);
    }

    #[test]
    fn test_classify_server_errors() {
        assert_eq!(classify_error("status 500: Status check error"), ErrorType::Server);
        assert_eq!(classify_error("status 503"), ErrorType::Server);
        assert_eq!(classify_error("Gateway Timeout"), ErrorType::Server);
    }

    #[test]
    fn test_classify_network_errors() {
        assert_eq!(classify_error("Connection refused"), ErrorType::Network);
        assert_eq!(classify_error("operation timed out"), ErrorType::Network);
    }

    #[test]
    fn test_classify_typed_errors() {
        assert_eq!(
            classify(&VimoError::backend(404, "Query status not found")),
            ErrorType::Client
        );
        assert_eq!(classify(&VimoError::backend(500, "boom")), ErrorType::Server);
        assert_eq!(
            classify(&VimoError::Validation("Question is empty".into())),
            ErrorType::Client
        );
        assert!(notification_for(&VimoError::Other("Connection reset".into()))
            .contains("Cannot reach"));
    }
}
