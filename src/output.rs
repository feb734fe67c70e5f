//! Artifact persistence: atomic JSON writes, run-history CSV append and
//! optional S3 publishing.

use anyhow::Result;
use aws_sdk_s3::primitives::ByteStream;
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::PipelineError;

pub const COUNTIES_FILE: &str = "us-counties.json";
pub const STATES_FILE: &str = "us-states.json";
pub const COUNTIES_PATHS_FILE: &str = "us-counties-paths.json";
pub const STATES_PATHS_FILE: &str = "us-states-paths.json";
pub const LATEST_NUMBERS_FILE: &str = "covid19-latest-numbers.json";
pub const RUN_HISTORY_FILE: &str = "run-history.csv";

/// A serialized artifact, ready to be written.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: &'static str,
    pub body: Vec<u8>,
}

impl Artifact {
    pub fn json(name: &'static str, value: &impl Serialize) -> Result<Self, PipelineError> {
        let body = serde_json::to_vec(value).map_err(|source| PipelineError::Serialize {
            name: name.to_string(),
            source,
        })?;
        Ok(Self { name, body })
    }
}

/// Writes `artifact` into `dir` through a temp file renamed into place, so
/// readers see either the previous file or the complete new one.
pub fn write_atomic(dir: &Path, artifact: &Artifact) -> Result<PathBuf, PipelineError> {
    let path = dir.join(artifact.name);
    let write_err = |source: std::io::Error| PipelineError::Write {
        path: path.clone(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(&artifact.body).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(&path).map_err(|e| write_err(e.error))?;

    debug!(path = %path.display(), bytes = artifact.body.len(), "Artifact written");
    Ok(path)
}

/// Appends a record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: &Path, record: &impl Serialize) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

/// Gzip-compresses `body` when `gzip` is set.
pub fn encode_body(body: &[u8], gzip: bool) -> std::io::Result<Vec<u8>> {
    if !gzip {
        return Ok(body.to_vec());
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

/// Uploads every artifact under its file name, as `application/json`.
#[tracing::instrument(skip(client, artifacts), fields(count = artifacts.len()))]
pub async fn publish_artifacts(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    artifacts: &[Artifact],
    gzip: bool,
) -> Result<(), PipelineError> {
    for artifact in artifacts {
        let publish_err = |message: String| PipelineError::Publish {
            key: artifact.name.to_string(),
            message,
        };

        let body = encode_body(&artifact.body, gzip).map_err(|e| publish_err(e.to_string()))?;

        let mut request = client
            .put_object()
            .bucket(bucket)
            .key(artifact.name)
            .body(ByteStream::from(body))
            .content_type("application/json");
        if gzip {
            request = request.content_encoding("gzip");
        }

        request
            .send()
            .await
            .map_err(|e| publish_err(e.to_string()))?;

        debug!(key = artifact.name, "Artifact published");
    }

    info!(bucket, uploaded = artifacts.len(), "S3 upload complete");
    Ok(())
}
