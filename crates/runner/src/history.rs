//! Local JSONL history sink for archived results.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use genq_core::{Category, TaskId, Timestamp};
use genq_engine::{ArchiveError, ArchiveRequest, Archiver};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

/// One appended line per archived result.
#[derive(Debug, Serialize)]
struct HistoryRecord<'a> {
    task_id: TaskId,
    category: Category,
    prompt: &'a str,
    source_url: Option<&'a str>,
    result_url: &'a str,
    archived_at: Timestamp,
}

/// Appends each archived result to a JSONL file.
///
/// The line itself is the durable copy, so the result URL is returned
/// unchanged as the canonical archived URL.
pub struct JsonlHistory {
    path: PathBuf,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn sink_err(err: impl std::fmt::Display) -> ArchiveError {
    ArchiveError(err.to_string())
}

#[async_trait]
impl Archiver for JsonlHistory {
    async fn archive(&self, request: &ArchiveRequest) -> Result<String, ArchiveError> {
        let record = HistoryRecord {
            task_id: request.task_id,
            category: request.category,
            prompt: &request.payload.prompt,
            source_url: request.payload.source_url.as_deref(),
            result_url: &request.result_url,
            archived_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&record).map_err(sink_err)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(sink_err)?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(sink_err)?;
        file.write_all(line.as_bytes()).await.map_err(sink_err)?;
        file.flush().await.map_err(sink_err)?;

        tracing::debug!(task_id = %request.task_id, path = %self.path.display(), "History line appended");
        Ok(request.result_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use genq_core::SubmissionPayload;

    use super::*;

    fn request(prompt: &str, result_url: &str) -> ArchiveRequest {
        ArchiveRequest {
            task_id: TaskId::new(),
            category: Category::TextToVideo,
            payload: SubmissionPayload {
                prompt: prompt.to_string(),
                source_url: None,
                aspect_ratio: None,
                duration_secs: None,
            },
            result_url: result_url.to_string(),
        }
    }

    #[tokio::test]
    async fn appends_one_line_per_archival() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.jsonl");
        let sink = JsonlHistory::new(path.clone());

        let first = request("a red kite", "https://cdn/a.mp4");
        let archived = sink.archive(&first).await.expect("archive");
        assert_eq!(archived, "https://cdn/a.mp4");
        sink.archive(&request("a blue kite", "https://cdn/b.mp4"))
            .await
            .expect("archive");

        let contents = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let record: serde_json::Value = serde_json::from_str(lines[0]).expect("json line");
        assert_eq!(record["prompt"], "a red kite");
        assert_eq!(record["result_url"], "https://cdn/a.mp4");
        assert_eq!(record["category"], "text_to_video");
        assert!(record["archived_at"].is_string());
    }

    #[tokio::test]
    async fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/deep/history.jsonl");
        let sink = JsonlHistory::new(path.clone());

        sink.archive(&request("p", "https://cdn/v.mp4"))
            .await
            .expect("archive");
        assert!(path.exists());
    }
}
