//! Classify HTTP status, curl errors and fetch errors into retry kinds.

use crate::fetch::FetchError;
use crate::retry::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        408 => ErrorKind::Timeout,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
        || e.is_ssl_connect_error()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Other
}

/// Classify a fetch error into an ErrorKind.
pub fn classify(e: &FetchError) -> ErrorKind {
    match e {
        FetchError::Timeout => ErrorKind::Timeout,
        FetchError::HttpStatus(code) => classify_http_status(*code),
        FetchError::Network(ce) => classify_curl_error(ce),
        FetchError::PartialTransfer { .. } => ErrorKind::Connection,
        FetchError::TooLarge { .. }
        | FetchError::InvalidUrl(_)
        | FetchError::Storage(_)
        | FetchError::Cancelled
        | FetchError::Internal(_) => ErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_429_and_503_throttled() {
        assert_eq!(classify_http_status(429), ErrorKind::Throttled);
        assert_eq!(classify_http_status(503), ErrorKind::Throttled);
    }

    #[test]
    fn http_5xx_retryable() {
        assert!(matches!(classify_http_status(500), ErrorKind::Http5xx(500)));
        assert!(matches!(classify_http_status(502), ErrorKind::Http5xx(502)));
    }

    #[test]
    fn http_4xx_other() {
        assert_eq!(classify_http_status(404), ErrorKind::Other);
        assert_eq!(classify_http_status(403), ErrorKind::Other);
    }

    #[test]
    fn fetch_errors() {
        assert_eq!(
            classify(&FetchError::HttpStatus(503)),
            ErrorKind::Throttled
        );
        assert_eq!(
            classify(&FetchError::PartialTransfer {
                expected: 10,
                received: 4
            }),
            ErrorKind::Connection
        );
        assert_eq!(
            classify(&FetchError::TooLarge { limit: 1 }),
            ErrorKind::Other
        );
        assert_eq!(classify(&FetchError::Cancelled), ErrorKind::Other);
        let disk_full = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(classify(&FetchError::Storage(disk_full)), ErrorKind::Other);
    }
}
