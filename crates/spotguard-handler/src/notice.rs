use spotguard_core::imds::{ImdsClient, ImdsError, StatusCode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Absent,
    Present { detail: String },
}

#[derive(Debug, thiserror::Error)]
pub enum NoticeError {
    #[error("unauthorized access to metadata service (status 401); a session token is likely required or invalid")]
    Unauthorized,
    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),
    #[error(transparent)]
    Request(#[from] ImdsError),
}

/// Polls the reclamation-notice endpoint.
#[derive(Debug)]
pub struct NoticeChecker {
    imds: ImdsClient,
    endpoint: String,
}

impl NoticeChecker {
    pub fn new(imds: ImdsClient, endpoint: impl Into<String>) -> Self {
        Self {
            imds,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn check(&self) -> Result<Notice, NoticeError> {
        let resp = self.imds.get(&self.endpoint).await?;
        match resp.status {
            StatusCode::OK => Ok(Notice::Present { detail: resp.body }),
            StatusCode::NOT_FOUND => Ok(Notice::Absent),
            StatusCode::UNAUTHORIZED => Err(NoticeError::Unauthorized),
            other => Err(NoticeError::UnexpectedStatus(other.as_u16())),
        }
    }
}
