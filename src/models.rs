use serde::Serialize;

// Body of a 429 response
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub success: bool,
    pub message: String,
    pub retry_after: u64, // seconds
}

impl RejectionBody {
    pub fn new(message: impl Into<String>, retry_after: u64) -> Self {
        Self {
            success: false,
            message: message.into(),
            retry_after,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub healthy_backends: usize,
}
