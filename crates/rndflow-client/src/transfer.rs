// ContentAddressableTransfer: checksum-verified downloads and
// deduplicating uploads through presigned object links.

use crate::error::ClientError;
use crate::models::{FileDescriptor, UploadLink, UploadObjectsRequest};
use crate::transport::RetryingTransport;
use anyhow::{Context, Result};
use futures::StreamExt;
use rndflow_common::constants::{api, DOWNLOAD_ATTEMPTS};
use rndflow_sdk::{IOUtil, TraceWriter};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Media type used for unknown binary files.
pub const BINARY_MEDIA_TYPE: &str = "application/x-binary";
/// Media type used for unknown text files.
pub const TEXT_MEDIA_TYPE: &str = "text/plain";

/// Decides how an uploaded file is described to the server.
pub trait ContentClassifier: Send + Sync {
    fn is_binary(&self, path: &Path) -> Result<bool>;

    /// Media type from the file name, or from `is_binary` when the
    /// extension is unknown.
    fn media_type(&self, path: &Path, is_binary: bool) -> String;
}

/// Extension lookup through `mime_guess`, then a NUL/UTF-8 sniff of the
/// first 8 KiB.
#[derive(Debug, Clone, Default)]
pub struct DefaultContentClassifier;

impl ContentClassifier for DefaultContentClassifier {
    fn is_binary(&self, path: &Path) -> Result<bool> {
        IOUtil::is_binary(path)
    }

    fn media_type(&self, path: &Path, is_binary: bool) -> String {
        match mime_guess::from_path(path).first_raw() {
            Some(known) => known.to_string(),
            None if is_binary => BINARY_MEDIA_TYPE.to_string(),
            None => TEXT_MEDIA_TYPE.to_string(),
        }
    }
}

pub struct ContentAddressableTransfer {
    transport: Arc<RetryingTransport>,
    classifier: Arc<dyn ContentClassifier>,
}

impl ContentAddressableTransfer {
    pub fn new(transport: Arc<RetryingTransport>) -> Self {
        Self::with_classifier(transport, Arc::new(DefaultContentClassifier))
    }

    pub fn with_classifier(
        transport: Arc<RetryingTransport>,
        classifier: Arc<dyn ContentClassifier>,
    ) -> Self {
        Self {
            transport,
            classifier,
        }
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    /// Download `file` to `root/{file.name}`, verifying its SHA-256.
    ///
    /// A mismatching body is downloaded once more from scratch; a second
    /// mismatch is a `ChecksumMismatch` error.
    pub async fn download(
        &self,
        trace: &dyn TraceWriter,
        file: &FileDescriptor,
        root: &Path,
    ) -> Result<PathBuf> {
        let link = file.content.as_deref().ok_or_else(|| ClientError::MissingLink {
            name: file.name.clone(),
        })?;
        let path = root.join(&file.name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ClientError::io(parent, e))?;
        }

        trace.info(&format!("Downloading {}...", path.display()));

        let mut attempt = 1;
        loop {
            let digest = self.fetch_to(link, &path).await?;
            if digest.eq_ignore_ascii_case(&file.content_hash) {
                break;
            }
            if attempt >= DOWNLOAD_ATTEMPTS {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| ClientError::io(&path, e))?;
                return Err(ClientError::ChecksumMismatch {
                    path,
                    attempts: attempt,
                }
                .into());
            }
            trace.warning(&format!(
                "{}: wrong content checksum. retrying...",
                path.display()
            ));
            attempt += 1;
        }

        if file.is_executable {
            IOUtil::set_executable(&path)?;
        }
        Ok(path)
    }

    /// Stream `link` into `path`, returning the hex digest of what was written.
    async fn fetch_to(&self, link: &str, path: &Path) -> Result<String, ClientError> {
        let response = self.transport.raw_get(link).await?;
        let mut out = tokio::fs::File::create(path)
            .await
            .map_err(|e| ClientError::io(path, e))?;
        let mut hasher = Sha256::new();

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ClientError::request(&reqwest::Method::GET, link, e))?;
            hasher.update(&chunk);
            out.write_all(&chunk)
                .await
                .map_err(|e| ClientError::io(path, e))?;
        }
        out.flush().await.map_err(|e| ClientError::io(path, e))?;

        Ok(hex::encode(hasher.finalize()))
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    /// Upload `paths` for job `job_id` and describe them relative to `root`.
    ///
    /// Identical contents are sent once. Objects the server already holds
    /// (a `null` link) are not sent at all, but every path still gets a
    /// descriptor, in the order given.
    pub async fn upload(
        &self,
        trace: &dyn TraceWriter,
        job_id: u64,
        root: &Path,
        paths: &[PathBuf],
    ) -> Result<Vec<FileDescriptor>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let mut hashes = Vec::with_capacity(paths.len());
        let mut by_hash: HashMap<String, &Path> = HashMap::new();
        let mut distinct = Vec::new();
        for path in paths {
            let hash = IOUtil::file_hash(path)?;
            if !by_hash.contains_key(&hash) {
                by_hash.insert(hash.clone(), path.as_path());
                distinct.push(hash.clone());
            }
            hashes.push(hash);
        }

        let links: Vec<UploadLink> = self
            .transport
            .post(
                &api::job_upload_objects(job_id),
                &UploadObjectsRequest { objects: &distinct },
            )
            .await?;

        trace.info(&format!("Uploading {} files to server...", links.len()));

        for item in &links {
            let Some(url) = item.link.as_deref() else {
                continue;
            };
            let Some(path) = by_hash.get(&item.object_id) else {
                trace.warning(&format!("Server returned a link for unknown object {}", item.object_id));
                continue;
            };
            let is_binary = self.classifier.is_binary(path)?;
            let media_type = self.classifier.media_type(path, is_binary);
            let size = tokio::fs::metadata(path)
                .await
                .with_context(|| format!("Failed to stat '{}'", path.display()))?
                .len();
            self.transport.raw_put(url, path, size, &media_type).await?;
        }

        paths
            .iter()
            .zip(hashes)
            .map(|(path, hash)| self.describe(root, path, hash))
            .collect()
    }

    fn describe(&self, root: &Path, path: &Path, content_hash: String) -> Result<FileDescriptor> {
        let is_binary = self.classifier.is_binary(path)?;
        let size = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat '{}'", path.display()))?
            .len();
        Ok(FileDescriptor {
            name: IOUtil::relative_name(root, path),
            media_type: self.classifier.media_type(path, is_binary),
            content_hash,
            is_executable: IOUtil::is_executable(path),
            is_binary,
            size,
            content: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::{test_settings, transport};
    use rndflow_sdk::trace::CollectingTraceWriter;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn input(name: &str, link: String, hash: String, is_executable: bool) -> FileDescriptor {
        FileDescriptor {
            name: name.into(),
            media_type: String::new(),
            content_hash: hash,
            is_executable,
            is_binary: false,
            size: 0,
            content: Some(link),
        }
    }

    fn transfer(server: &MockServer) -> ContentAddressableTransfer {
        ContentAddressableTransfer::new(Arc::new(transport(server, test_settings())))
    }

    #[test]
    fn default_classifier_media_types() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("notes");
        std::fs::write(&text, "plain words").unwrap();
        let blob = dir.path().join("blob");
        std::fs::write(&blob, [0u8, 159, 146, 150]).unwrap();

        let c = DefaultContentClassifier;
        assert_eq!(c.media_type(Path::new("a.csv"), false), "text/csv");
        assert!(!c.is_binary(&text).unwrap());
        assert_eq!(c.media_type(&text, false), TEXT_MEDIA_TYPE);
        assert!(c.is_binary(&blob).unwrap());
        assert_eq!(c.media_type(&blob, true), BINARY_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn download_verifies_and_marks_executable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/objects/run"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"#!/bin/sh\necho ok\n".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let root = tempfile::tempdir().unwrap();
        let file = input(
            "bin/run.sh",
            format!("{}/objects/run", server.uri()),
            IOUtil::bytes_hash(b"#!/bin/sh\necho ok\n"),
            true,
        );
        let trace = CollectingTraceWriter::new();
        let written = transfer(&server).download(&trace, &file, root.path()).await.unwrap();

        assert_eq!(written, root.path().join("bin/run.sh"));
        assert_eq!(IOUtil::file_hash(&written).unwrap(), file.content_hash);
        assert!(IOUtil::is_executable(&written));
        assert!(trace.contains("Downloading"));
    }

    #[tokio::test]
    async fn checksum_mismatch_fails_after_two_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/objects/bad"))
            .respond_with(ResponseTemplate::new(200).set_body_string("corrupted"))
            .expect(2)
            .mount(&server)
            .await;

        let root = tempfile::tempdir().unwrap();
        let file = input(
            "data.csv",
            format!("{}/objects/bad", server.uri()),
            IOUtil::bytes_hash(b"expected"),
            false,
        );
        let trace = CollectingTraceWriter::new();
        let err = transfer(&server)
            .download(&trace, &file, root.path())
            .await
            .unwrap_err();

        match err.downcast_ref::<ClientError>() {
            Some(ClientError::ChecksumMismatch { attempts, .. }) => assert_eq!(*attempts, 2),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(trace.contains("wrong content checksum. retrying..."));
        assert!(!root.path().join("data.csv").exists());
    }

    #[tokio::test]
    async fn upload_sends_each_object_once() {
        let server = MockServer::start().await;
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a.txt");
        let b = root.path().join("sub").join("b.txt");
        let c = root.path().join("c.dat");
        std::fs::create_dir_all(b.parent().unwrap()).unwrap();
        std::fs::write(&a, "same bytes").unwrap();
        std::fs::write(&b, "same bytes").unwrap();
        std::fs::write(&c, [0u8, 1, 2, 3]).unwrap();

        let same = IOUtil::bytes_hash(b"same bytes");
        let known = IOUtil::bytes_hash(&[0u8, 1, 2, 3]);

        Mock::given(method("POST"))
            .and(path("/api/executor_api/jobs/5/upload_objects"))
            .and(body_json(json!({"objects": [same, known]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"object_id": same, "link": format!("{}/put/same", server.uri())},
                {"object_id": known, "link": null}
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/put/same"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let trace = CollectingTraceWriter::new();
        let files = transfer(&server)
            .upload(&trace, 5, root.path(), &[a, b, c])
            .await
            .unwrap();

        assert_eq!(files.len(), 3);
        assert_eq!(files[0].name, "a.txt");
        assert_eq!(files[1].name, "sub/b.txt");
        assert_eq!(files[0].content_hash, files[1].content_hash);
        assert_eq!(files[0].media_type, "text/plain");
        assert_eq!(files[0].size, 10);
        assert_eq!(files[2].content_hash, known);
        assert!(files[2].is_binary);
        assert_eq!(files[2].size, 4);
        assert!(trace.contains("Uploading 2 files to server..."));
    }
}
