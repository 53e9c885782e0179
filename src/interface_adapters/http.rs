// Shared HTTP response types for rejected upgrade requests.

#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
