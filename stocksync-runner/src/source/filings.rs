//! Filings API client (JSON).

use super::dates::{filings_param, parse_published};
use super::http::HttpClient;
use super::{FilingDocument, FilingsSource};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use stocksync_core::config::SourceConfig;
use stocksync_core::error::SourceError;

/// Public announcements channel.
const CHANNEL_ID: u32 = 1;
/// English documents.
const LANGUAGE_ID: u32 = 2;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    channel_id: u32,
    date_from: String,
    date_to: String,
    is_push_request: &'static str,
    issuer_id: u64,
    language_id: u32,
    page: u32,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentSummary {
    document_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentBody {
    document_id: i64,
    #[serde(default)]
    content: Option<String>,
    published_date: String,
    #[serde(default)]
    attachments: Option<Vec<Attachment>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Attachment {
    attachment_id: i64,
    attachment_type: AttachmentType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentType {
    mime_type: String,
}

pub struct FilingsClient {
    http: HttpClient,
    base_url: String,
}

impl FilingsClient {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(Self::new(HttpClient::new(config)?, &config.filings_base_url))
    }
}

#[async_trait]
impl FilingsSource for FilingsClient {
    async fn document_ids(
        &self,
        filer_id: u64,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<i64>, SourceError> {
        let url = format!("{}/public/documents", self.base_url);
        let request = SearchRequest {
            channel_id: CHANNEL_ID,
            date_from: filings_param(from),
            date_to: filings_param(to),
            is_push_request: "false",
            issuer_id: filer_id,
            language_id: LANGUAGE_ID,
            page: 1,
        };
        let envelope: Envelope<Vec<DocumentSummary>> = self.http.post_json(&url, &request).await?;
        Ok(envelope
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|d| d.document_id)
            .collect())
    }

    async fn document(&self, document_id: i64) -> Result<Option<FilingDocument>, SourceError> {
        let url = format!("{}/public/documents/single/{document_id}", self.base_url);
        let envelope: Envelope<DocumentBody> = match self.http.get_json(&url).await {
            Ok(envelope) => envelope,
            Err(SourceError::Fatal {
                status: Some(404), ..
            }) => return Ok(None),
            Err(e) => return Err(e),
        };
        envelope.data.map(into_document).transpose()
    }
}

fn into_document(body: DocumentBody) -> Result<FilingDocument, SourceError> {
    Ok(FilingDocument {
        document_id: body.document_id,
        content: body.content.unwrap_or_default(),
        published: parse_published(&body.published_date)?,
        attachments: body
            .attachments
            .unwrap_or_default()
            .into_iter()
            .map(|a| format!("{}:{}", a.attachment_id, a.attachment_type.mime_type))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn search_request_uses_api_field_names() {
        let request = SearchRequest {
            channel_id: CHANNEL_ID,
            date_from: "2024-01-01T00:00:00".into(),
            date_to: "2024-02-01T00:00:00".into(),
            is_push_request: "false",
            issuer_id: 17,
            language_id: LANGUAGE_ID,
            page: 1,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["channelId"], 1);
        assert_eq!(json["issuerId"], 17);
        assert_eq!(json["isPushRequest"], "false");
        assert_eq!(json["dateFrom"], "2024-01-01T00:00:00");
    }

    #[test]
    fn decodes_search_results() {
        let raw = r#"{"data":[{"documentId":101,"other":1},{"documentId":102}]}"#;
        let envelope: Envelope<Vec<DocumentSummary>> = serde_json::from_str(raw).unwrap();
        let ids: Vec<i64> = envelope.data.unwrap().into_iter().map(|d| d.document_id).collect();
        assert_eq!(ids, vec![101, 102]);

        let empty: Envelope<Vec<DocumentSummary>> = serde_json::from_str(r#"{"data":null}"#).unwrap();
        assert!(empty.data.is_none());
    }

    #[test]
    fn decodes_single_document() {
        let raw = r#"{"data":{
            "documentId": 555,
            "content": "Notice of AGM",
            "publishedDate": "2024-03-05T09:15:00.437",
            "attachments": [
                {"attachmentId": 9, "attachmentType": {"mimeType": "application/pdf"}}
            ]
        }}"#;
        let envelope: Envelope<DocumentBody> = serde_json::from_str(raw).unwrap();
        let doc = into_document(envelope.data.unwrap()).unwrap();
        assert_eq!(doc.document_id, 555);
        assert_eq!(doc.published, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(doc.attachments, vec!["9:application/pdf"]);
    }

    #[test]
    fn missing_optional_fields_default() {
        let raw = r#"{"data":{"documentId":1,"publishedDate":"2024-03-05T09:15:00","attachments":null}}"#;
        let envelope: Envelope<DocumentBody> = serde_json::from_str(raw).unwrap();
        let doc = into_document(envelope.data.unwrap()).unwrap();
        assert!(doc.content.is_empty());
        assert!(doc.attachments.is_empty());
    }
}
