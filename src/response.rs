use serde::Serialize;

/// JSON envelope shared by every API endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
        }
    }
}

/// Returned by the status endpoint: enough for the browser to derive the
/// passphrase proof, nothing about the content.
#[derive(Debug, Serialize)]
pub struct NoteStatus {
    pub verify_salt: String,
    pub requires_passphrase: bool,
}
