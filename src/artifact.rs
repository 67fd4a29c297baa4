//! JSON lines hand-off between the crawler and the indexer.

use crate::normalizer::CrawlRecord;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Failures opening or writing an artifact. Bad input lines are not errors.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The file could not be opened or created.
    #[error("failed to open {path:?}: {source}")]
    Open {
        /// Artifact path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// Reading or writing failed midway.
    #[error("artifact i/o failed: {0}")]
    Io(#[from] io::Error),
    /// A record could not be serialized.
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Appends one JSON object per [`CrawlRecord`].
pub struct ArtifactWriter<W: Write = BufWriter<File>> {
    writer: W,
    written: usize,
}

impl ArtifactWriter {
    /// Creates (truncating) the artifact at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| ArtifactError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> ArtifactWriter<W> {
    /// Wraps an arbitrary writer.
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Writes one record line.
    pub fn write(&mut self, record: &CrawlRecord) -> Result<(), ArtifactError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    /// Records written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(mut self) -> Result<W, ArtifactError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Reads every well-formed record from the artifact at `path`.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<CrawlRecord>, ArtifactError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ArtifactError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    parse_records(BufReader::new(file))
}

/// Parses records from `reader`. Blank lines are ignored, malformed ones logged and skipped.
pub fn parse_records<R: BufRead>(reader: R) -> Result<Vec<CrawlRecord>, ArtifactError> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CrawlRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => warn!(line = idx + 1, error = %err, "skipping malformed crawl record"),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::CrawlLink;

    fn record(url: &str) -> CrawlRecord {
        CrawlRecord {
            url: url.into(),
            title: "Headlines".into(),
            anchors: vec![CrawlLink {
                href: format!("{url}story"),
                text: "Story".into(),
            }],
        }
    }

    #[test]
    fn written_records_read_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("crawl.jsonl");
        let mut writer = ArtifactWriter::create(&path).expect("create");
        writer.write(&record("https://news.test/")).expect("write");
        writer.write(&record("https://news.test/b/")).expect("write");
        assert_eq!(writer.written(), 2);
        writer.finish().expect("flush");

        let records = read_records(&path).expect("read");
        assert_eq!(records, vec![record("https://news.test/"), record("https://news.test/b/")]);
    }

    #[test]
    fn blank_and_malformed_lines_skipped() {
        let input = concat!(
            "{\"url\":\"https://news.test/\",\"title\":\"A\"}\n",
            "\n",
            "not json\n",
            "{\"title\":\"missing url\"}\n",
            "{\"url\":\"https://news.test/b\",\"title\":\"B\",\"anchors\":[]}\n",
        );
        let records = parse_records(input.as_bytes()).expect("parse");
        let urls: Vec<_> = records.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, ["https://news.test/", "https://news.test/b"]);
        assert!(records[0].anchors.is_empty());
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            read_records(dir.path().join("absent.jsonl")),
            Err(ArtifactError::Open { .. })
        ));
    }
}
