use relay_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{service} request failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },
    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("reply handle rejected: {0}")]
    InvalidHandle(String),
    #[error("{service} response could not be read: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
    #[error("{service} did not answer in time")]
    Timeout { service: &'static str },
    #[error("{0} is not configured")]
    Disabled(&'static str),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidHandle(_) => ErrorKind::InvalidHandle,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Transport { .. } | Self::Status { .. } | Self::Decode { .. } | Self::Disabled(_) => {
                ErrorKind::Transport
            }
        }
    }

    pub(crate) fn transport(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { service }
        } else {
            Self::Transport {
                service,
                message: err.to_string(),
            }
        }
    }
}

pub(crate) fn clip_body(body: String) -> String {
    const LIMIT: usize = 512;
    if body.len() <= LIMIT {
        return body;
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            ClientError::InvalidHandle("expired".to_string()).kind(),
            ErrorKind::InvalidHandle
        );
        assert_eq!(
            ClientError::Status {
                service: "line",
                status: 500,
                body: String::new()
            }
            .kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            ClientError::Timeout { service: "openai" }.kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn long_bodies_are_clipped_on_char_boundary() {
        let body = "ก".repeat(400);
        let clipped = clip_body(body);
        assert!(clipped.ends_with("..."));
        assert!(clipped.len() <= 515);
    }
}
