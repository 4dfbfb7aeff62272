//! Request and response bodies of the multipart endpoints.
//!
//! The server speaks the S3 XML dialect; some deployments answer with
//! JSON instead, so the parsers accept both.

use serde::{Deserialize, Serialize};

use crate::client::{CompletedPart, ObjectDescriptor};
use crate::error::UploadError;

/// `InitiateMultipartUploadResult` response.
#[derive(Debug, Deserialize)]
#[serde(rename = "InitiateMultipartUploadResult")]
pub struct InitiateMultipartUploadResult {
    #[serde(rename = "Bucket", default)]
    pub bucket: Option<String>,
    #[serde(rename = "Key", default)]
    pub key: Option<String>,
    #[serde(rename = "UploadId", default)]
    pub upload_id: Option<String>,
}

/// `CompleteMultipartUpload` request body.
#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
pub struct CompleteMultipartUpload<'a> {
    #[serde(rename = "Part")]
    pub parts: &'a [CompletedPart],
}

/// `CompleteMultipartUploadResult` response.
#[derive(Debug, Default, Deserialize)]
#[serde(rename = "CompleteMultipartUploadResult")]
pub struct CompleteMultipartUploadResult {
    #[serde(rename = "Location", default)]
    pub location: Option<String>,
    #[serde(rename = "Bucket", default)]
    pub bucket: Option<String>,
    #[serde(rename = "Key", default)]
    pub key: Option<String>,
    #[serde(rename = "ETag", default)]
    pub etag: Option<String>,
}

/// JSON answer of a plain PUT: `{"success": true, "destination": "/a/b"}`.
#[derive(Debug, Deserialize)]
pub struct PutObjectResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub destination: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonInitiate {
    #[serde(alias = "UploadId", alias = "upload_id")]
    #[serde(rename = "uploadId")]
    upload_id: Option<String>,
}

/// Extracts the upload id from an initiate response body.
pub fn parse_upload_id(body: &str) -> Result<String, UploadError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(UploadError::Initiation("empty initiate response".into()));
    }

    let id = if body.starts_with('{') {
        let parsed: JsonInitiate = serde_json::from_str(body)?;
        parsed.upload_id
    } else {
        let parsed: InitiateMultipartUploadResult =
            quick_xml::de::from_str(body).map_err(|e| UploadError::Xml(e.to_string()))?;
        parsed.upload_id
    };

    match id.map(|s| s.trim().to_string()) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(UploadError::Initiation(
            "initiate succeeded but returned no upload id".into(),
        )),
    }
}

/// Serializes the complete request body. Parts are sorted by part number.
pub fn complete_request_body(parts: &[CompletedPart]) -> Result<String, UploadError> {
    let mut sorted = parts.to_vec();
    sorted.sort_by_key(|p| p.part_number);

    let mut buffer = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    quick_xml::se::to_writer(
        &mut buffer,
        &CompleteMultipartUpload { parts: &sorted },
    )
    .map_err(|e| UploadError::Xml(e.to_string()))?;
    Ok(buffer)
}

/// Parses a complete response. An empty or unrecognized body still yields
/// a descriptor carrying the raw text.
pub fn parse_complete_response(body: &str) -> ObjectDescriptor {
    let trimmed = body.trim();
    let parsed = if trimmed.starts_with('<') {
        quick_xml::de::from_str::<CompleteMultipartUploadResult>(trimmed).unwrap_or_default()
    } else {
        CompleteMultipartUploadResult::default()
    };

    ObjectDescriptor {
        location: parsed.location,
        bucket: parsed.bucket,
        key: parsed.key,
        entity_tag: parsed.etag,
        raw: body.to_string(),
    }
}

/// Parses the answer of a whole-file PUT.
pub fn parse_put_response(body: &str, etag: Option<String>) -> ObjectDescriptor {
    let destination = serde_json::from_str::<PutObjectResponse>(body.trim())
        .ok()
        .filter(|r| r.success)
        .and_then(|r| r.destination);

    ObjectDescriptor {
        location: None,
        bucket: None,
        key: destination,
        entity_tag: etag,
        raw: body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INITIATE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
		<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
			<Bucket>files</Bucket>
			<Key>videos/big.mkv</Key>
			<UploadId>042317</UploadId>
		</InitiateMultipartUploadResult>"#;

    #[test]
    fn parse_upload_id_from_xml() {
        assert_eq!(parse_upload_id(INITIATE_XML).unwrap(), "042317");
    }

    #[test]
    fn parse_upload_id_from_json() {
        assert_eq!(parse_upload_id(r#"{"uploadId":"abc"}"#).unwrap(), "abc");
        assert_eq!(parse_upload_id(r#"{"UploadId":"xyz"}"#).unwrap(), "xyz");
    }

    #[test]
    fn empty_upload_id_is_initiation_error() {
        let xml = "<InitiateMultipartUploadResult><UploadId></UploadId></InitiateMultipartUploadResult>";
        assert!(matches!(
            parse_upload_id(xml),
            Err(UploadError::Initiation(_))
        ));
        assert!(matches!(
            parse_upload_id(r#"{"bucket":"b"}"#),
            Err(UploadError::Initiation(_))
        ));
        assert!(matches!(parse_upload_id("   "), Err(UploadError::Initiation(_))));
    }

    #[test]
    fn garbage_initiate_body_is_error() {
        assert!(parse_upload_id("<html><body>proxy error</body>").is_err());
    }

    #[test]
    fn complete_body_sorted_by_part_number() {
        let parts = vec![
            CompletedPart {
                part_number: 2,
                entity_tag: "\"b\"".into(),
            },
            CompletedPart {
                part_number: 1,
                entity_tag: "\"a\"".into(),
            },
        ];
        let body = complete_request_body(&parts).unwrap();
        assert!(body.starts_with("<?xml"));
        assert!(body.contains("<CompleteMultipartUpload>"));
        let first = body.find("<PartNumber>1</PartNumber>").unwrap();
        let second = body.find("<PartNumber>2</PartNumber>").unwrap();
        assert!(first < second);
        assert!(body.contains("<ETag>&quot;a&quot;</ETag>") || body.contains("<ETag>\"a\"</ETag>"));
    }

    #[test]
    fn parse_complete_xml() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<CompleteMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Location>http://files.local/videos/big.mkv</Location>
  <Bucket>files</Bucket>
  <Key>videos/big.mkv</Key>
  <ETag>"dummy-etag"</ETag>
</CompleteMultipartUploadResult>"#;
        let d = parse_complete_response(xml);
        assert_eq!(d.location.as_deref(), Some("http://files.local/videos/big.mkv"));
        assert_eq!(d.key.as_deref(), Some("videos/big.mkv"));
        assert_eq!(d.entity_tag.as_deref(), Some("\"dummy-etag\""));
    }

    #[test]
    fn parse_complete_empty_body() {
        let d = parse_complete_response("");
        assert_eq!(d, ObjectDescriptor::default());
    }

    #[test]
    fn parse_put_json() {
        let d = parse_put_response(r#"{"success":true,"destination":"/up/a.txt"}"#, None);
        assert_eq!(d.key.as_deref(), Some("/up/a.txt"));

        let d = parse_put_response("", Some("\"e\"".into()));
        assert!(d.key.is_none());
        assert_eq!(d.entity_tag.as_deref(), Some("\"e\""));
    }
}
