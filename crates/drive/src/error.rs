use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("client secrets file has neither an \"installed\" nor a \"web\" section")]
    MissingClientSection,
    #[error("token endpoint rejected the request ({status}): {body}")]
    TokenEndpoint { status: u16, body: String },
    #[error("access token expired and no refresh token is available")]
    NoRefreshToken,
    #[error("drive {operation} failed ({status}): {body}")]
    Api {
        operation: &'static str,
        status: u16,
        body: String,
    },
}
