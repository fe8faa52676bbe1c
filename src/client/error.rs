use std::error::Error as _;

use thiserror::Error;

use super::conn::tcp::TcpConnectionError;

/// Errors from the default HTTP/1.1 and h2c transports.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The request URI can't be sent by this transport.
    #[error("invalid uri: {0}")]
    InvalidUri(String),

    /// The pooled client failed to dial or to exchange the request.
    #[error("transport: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
}

impl Error {
    /// The dial failure behind this error, if no connection could be established.
    pub fn connect_error(&self) -> Option<&TcpConnectionError> {
        let Error::Transport(error) = self else {
            return None;
        };

        let mut source = error.source();
        while let Some(error) = source {
            if let Some(connect) = error.downcast_ref::<TcpConnectionError>() {
                return Some(connect);
            }
            source = error.source();
        }
        None
    }

    /// True when the connect timeout elapsed before a connection was established.
    pub fn is_timeout(&self) -> bool {
        self.connect_error()
            .is_some_and(TcpConnectionError::is_timeout)
    }

    /// True when the failure happened before any bytes were exchanged with the server.
    pub fn is_connect(&self) -> bool {
        matches!(self, Error::Transport(error) if error.is_connect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(Error: std::error::Error, Send, Sync, Into<crate::BoxError>);

    #[test]
    fn invalid_uri_display() {
        let error = Error::InvalidUri("missing authority".into());
        assert_eq!(error.to_string(), "invalid uri: missing authority");
        assert!(!error.is_connect());
        assert!(!error.is_timeout());
        assert!(error.connect_error().is_none());
    }
}
