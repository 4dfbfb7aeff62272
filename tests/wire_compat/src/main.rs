fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use ghs_upload::wire::{
        complete_request_body, parse_complete_response, parse_put_response, parse_upload_id,
    };
    use ghs_upload::{CompletedPart, UploadError};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture captured from the file server's response templates.
    fn load_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    #[derive(Debug, serde::Deserialize)]
    struct CompleteMultipartUpload {
        #[serde(rename = "Part")]
        parts: Vec<CompletedPart>,
    }

    #[test]
    fn fixture_initiate_multipart_upload() {
        let body = load_fixture("initiate_multipart_upload.xml");
        assert_eq!(parse_upload_id(&body).unwrap(), "084213");
    }

    #[test]
    fn fixture_complete_multipart_upload() {
        let body = load_fixture("complete_multipart_upload.xml");
        let descriptor = parse_complete_response(&body);

        assert_eq!(
            descriptor.location.as_deref(),
            Some("http://nas:8000videos/holiday%202019.mkv")
        );
        assert_eq!(descriptor.bucket.as_deref(), Some("nas:8000"));
        assert_eq!(descriptor.key.as_deref(), Some("videos/holiday%202019.mkv"));
        assert_eq!(descriptor.entity_tag.as_deref(), Some("\"dummy-etag\""));
        assert_eq!(descriptor.raw, body);
    }

    #[test]
    fn fixture_put_object() {
        let body = load_fixture("put_object.json");
        let descriptor = parse_put_response(&body, None);
        assert_eq!(descriptor.key.as_deref(), Some("/videos/clip.mp4"));

        let body = load_fixture("put_object_make_directory.json");
        let descriptor = parse_put_response(&body, None);
        assert_eq!(descriptor.key.as_deref(), Some("/videos/empty"));
    }

    #[test]
    fn fixture_put_object_conflict_has_no_destination() {
        let body = load_fixture("put_object_conflict.json");
        let descriptor = parse_put_response(&body, None);
        assert!(descriptor.key.is_none());
        assert_eq!(descriptor.raw, body);
    }

    #[test]
    fn complete_request_parses_as_s3_document() {
        let parts: Vec<CompletedPart> = [3u32, 1, 2]
            .iter()
            .map(|&n| CompletedPart {
                part_number: n,
                entity_tag: format!("\"dummy-etag-{n:06}\""),
            })
            .collect();

        let xml = complete_request_body(&parts).unwrap();
        let doc: CompleteMultipartUpload = quick_xml::de::from_str(&xml).unwrap();

        let numbers: Vec<u32> = doc.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(doc.parts[0].entity_tag, "\"dummy-etag-000001\"");
    }

    #[test]
    fn html_error_page_is_not_an_upload_id() {
        let body = "<html><head><title>502 Bad Gateway</title></head></html>";
        assert!(matches!(
            parse_upload_id(body),
            Err(UploadError::Initiation(_)) | Err(UploadError::Xml(_))
        ));
    }

    #[test]
    fn json_initiate_body() {
        let body = serde_json::json!({ "uploadId": "abc123" }).to_string();
        assert_eq!(parse_upload_id(&body).unwrap(), "abc123");
    }
}
