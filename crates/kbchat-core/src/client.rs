use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::documents::{validate_upload, Document, UploadReceipt};
use crate::error::{ChatError, Result};

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_docs: Option<Vec<String>>,
}

impl ChatRequest {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            selected_docs: None,
        }
    }

    /// Restrict retrieval to the named documents. An empty selection means all.
    pub fn with_documents(mut self, documents: Vec<String>) -> Self {
        self.selected_docs = if documents.is_empty() { None } else { Some(documents) };
        self
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// HTTP client for the knowledge base backend.
///
/// Keeps a cookie store so the session cookie set at login is sent with
/// every request.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Open the chat stream. The returned response body is the event stream.
    pub async fn open_chat_stream(&self, request: &ChatRequest) -> Result<Response> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await?;

        check_status(response).await
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let url = format!("{}/api/documents", self.base_url);

        let response = self.client.get(&url).send().await?;
        let documents: Vec<Document> = check_status(response).await?.json().await?;
        debug!(count = documents.len(), "fetched documents");
        Ok(documents)
    }

    pub async fn delete_document(&self, id: i64) -> Result<()> {
        let url = format!("{}/api/documents/{}", self.base_url, id);

        let response = self.client.delete(&url).send().await?;
        check_status(response).await?;
        info!(document_id = id, "deleted document");
        Ok(())
    }

    /// Upload a file as `multipart/form-data` under the `file` field.
    pub async fn upload_document(&self, path: &Path) -> Result<UploadReceipt> {
        let metadata = tokio::fs::metadata(path).await?;
        let file_name = validate_upload(path, metadata.len())?;
        let bytes = tokio::fs::read(path).await?;

        let part = Part::bytes(bytes).file_name(file_name.clone());
        let form = Form::new().part("file", part);

        let url = format!("{}/api/upload", self.base_url);
        let response = self.client.post(&url).multipart(form).send().await?;
        let receipt: UploadReceipt = check_status(response).await?.json().await?;
        info!(file = %file_name, size_kb = receipt.size_kb, "uploaded document");
        Ok(receipt)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    Err(ChatError::Status {
        status,
        detail: error_detail(&text),
    })
}

/// Pull a readable message out of an error body such as `{"detail": "..."}`.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_chat_request_omits_empty_selection() {
        let body = serde_json::to_value(ChatRequest::new("hi").with_documents(Vec::new())).unwrap();
        assert_eq!(body, serde_json::json!({"message": "hi"}));

        let body = serde_json::to_value(ChatRequest::new("hi").with_documents(vec!["a.pdf".into()])).unwrap();
        assert_eq!(body, serde_json::json!({"message": "hi", "selected_docs": ["a.pdf"]}));
    }

    #[test]
    fn test_error_detail_variants() {
        assert_eq!(error_detail(r#"{"detail": "File too large. Max 50MB"}"#), "File too large. Max 50MB");
        assert_eq!(error_detail(r#"{"detail": [1]}"#), "[1]");
        assert_eq!(error_detail("Internal Server Error\n"), "Internal Server Error");
    }

    #[tokio::test]
    async fn test_chat_stream_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_json(serde_json::json!({"message": "What is in my notes?"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("data: [DONE]\n\n"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(&server.uri()).unwrap();
        let response = client
            .open_chat_stream(&ChatRequest::new("What is in my notes?"))
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_chat_stream_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({"detail": "Not authenticated"})))
            .mount(&server)
            .await;

        let client = ChatClient::new(&server.uri()).unwrap();
        let err = client.open_chat_stream(&ChatRequest::new("hi")).await.unwrap_err();
        match err {
            ChatError::Status { status, detail } => {
                assert_eq!(status.as_u16(), 401);
                assert_eq!(detail, "Not authenticated");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_and_delete_documents() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 7, "filename": "handbook.pdf", "page_count": 12, "upload_date": "2024-05-01T10:00:00"},
                {"id": 3, "filename": "notes.txt", "page_count": null}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/documents/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(&server.uri()).unwrap();
        let documents = client.list_documents().await.unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].filename, "handbook.pdf");
        assert_eq!(documents[0].page_count, Some(12));
        assert_eq!(documents[1].page_count, None);

        client.delete_document(7).await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "File uploaded & processing started",
                "filename": "alice_notes.txt",
                "size_kb": 0,
                "status": "processing"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("notes.txt");
        let mut file = std::fs::File::create(&file_path).unwrap();
        writeln!(file, "meeting notes").unwrap();

        let client = ChatClient::new(&server.uri()).unwrap();
        let receipt = client.upload_document(&file_path).await.unwrap();
        assert_eq!(receipt.filename, "alice_notes.txt");
        assert_eq!(receipt.status, "processing");
    }

    #[tokio::test]
    async fn test_upload_rejects_unsupported_type_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("archive.zip");
        std::fs::write(&file_path, b"PK").unwrap();

        let client = ChatClient::new(&server.uri()).unwrap();
        let err = client.upload_document(&file_path).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidUpload(_)));
    }

    #[tokio::test]
    async fn test_upload_surfaces_backend_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "detail": "Invalid file type: .md. Allowed: PDF, TXT, DOCX, MD, CSV"
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("readme.md");
        std::fs::write(&file_path, b"# readme").unwrap();

        let client = ChatClient::new(&server.uri()).unwrap();
        let err = client.upload_document(&file_path).await.unwrap_err();
        assert_eq!(
            err.user_message("Upload failed"),
            "Invalid file type: .md. Allowed: PDF, TXT, DOCX, MD, CSV"
        );
    }
}
