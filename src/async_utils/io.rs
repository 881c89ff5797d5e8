//! I/O utilities.
//!
//! Batch input may be JSONL or CSV, read from a file or standard input. We
//! detect the format from the file extension, or from the first byte when
//! reading a pipe. Output is a single document written to a file or stdout.

use std::{pin::Pin, sync::Arc, task::Context};

use futures::stream::StreamExt as _;
use peekable::tokio::AsyncPeekable;
use serde_json::Map;
use tokio::{
    fs::File,
    io::{
        AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt as _,
        BufReader, BufWriter, ReadBuf,
    },
};
use tokio_stream::wrappers::LinesStream;

use super::BoxedStream;
use crate::prelude::*;

/// A smart async reader that uses [`AsyncPeekable`] to detect whether the
/// input is JSONL or CSV.
pub struct SmartReader {
    /// Do we expect our input to be JSONL?
    is_json_like: bool,

    /// A human-readable description of the input source, for error messages.
    description: String,

    /// Our reader. It's pinned because async reads hold pointers into it.
    reader: Pin<Box<dyn AsyncBufRead + Unpin + Send + Sync + 'static>>,
}

impl SmartReader {
    /// Create a new `SmartReader` from an existing reader, sniffing the first
    /// byte to pick a format.
    pub async fn new_from_reader(
        description: String,
        reader: impl AsyncRead + Unpin + Send + Sync + 'static,
    ) -> Result<Self> {
        let reader = BufReader::new(reader);
        let mut peekable = AsyncPeekable::new(Box::new(reader));
        let mut buffer = vec![0; 1];
        peekable
            .peek_exact(&mut buffer)
            .await
            .with_context(|| format!("{description} is empty"))?;
        let is_json_like = buffer[0] == b'{';
        Ok(Self {
            is_json_like,
            description,
            reader: Box::pin(BufReader::new(peekable)),
        })
    }

    /// Create a new `SmartReader` from a [`Path`].
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().unwrap_or_default();
        let is_json_like = ext == "json" || ext == "jsonl";
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open file at path: {:?}", path))?;
        Ok(Self {
            is_json_like,
            description: path.to_string_lossy().into_owned(),
            reader: Box::pin(BufReader::new(file)),
        })
    }

    /// Create a new `SmartReader` from either a [`Path`] or standard input.
    pub async fn new_from_path_or_stdin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::new_from_path(path).await,
            None => Self::new_from_reader("stdin".to_owned(), tokio::io::stdin()).await,
        }
    }

    /// Is our input JSON-like?
    pub fn is_json_like(&self) -> bool {
        self.is_json_like
    }
}

impl AsyncRead for SmartReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        Pin::get_mut(self).reader.as_mut().poll_read(cx, buf)
    }
}

impl AsyncBufRead for SmartReader {
    fn poll_fill_buf(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> std::task::Poll<std::io::Result<&[u8]>> {
        Pin::get_mut(self).reader.as_mut().poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::get_mut(self).reader.as_mut().consume(amt)
    }
}

/// A stream of [`serde_json::Value`] values.
pub type JsonStream = BoxedStream<Result<Value>>;

/// Read JSONL or CSV records from a file or stdin.
pub async fn read_jsonl_or_csv(path: Option<&Path>) -> Result<JsonStream> {
    let reader = SmartReader::new_from_path_or_stdin(path).await?;
    read_records(reader).await
}

/// Turn a [`SmartReader`] into a stream of JSON values. CSV rows become
/// objects keyed by the header row, with string values. Blank JSONL lines are
/// skipped.
pub async fn read_records(reader: SmartReader) -> Result<JsonStream> {
    let description = Arc::new(reader.description.clone());
    if reader.is_json_like() {
        let lines = LinesStream::new(reader.lines()).filter(|line| {
            let blank = matches!(line, Ok(line) if line.trim().is_empty());
            futures::future::ready(!blank)
        });
        Ok(Box::pin(lines.then(move |line| {
            let description = description.clone();
            async move {
                let line = line?;
                let value: Value = serde_json::from_str(&line).with_context(|| {
                    format!(
                        "Failed to parse JSON from line in {:?}: {:?}",
                        description, line
                    )
                })?;
                Ok(value)
            }
        })))
    } else {
        let mut reader = csv_async::AsyncReaderBuilder::new().create_reader(reader);
        let headers = Arc::new(
            reader
                .headers()
                .await
                .with_context(|| {
                    format!("Failed to read CSV headers from {:?}", description)
                })?
                .to_owned(),
        );
        Ok(Box::pin(reader.into_records().then(move |record| {
            let description = description.clone();
            let headers = headers.clone();
            async move {
                let record = record.with_context(|| {
                    format!("Failed to read CSV record from {:?}", description)
                })?;
                let map: Map<String, Value> = headers
                    .iter()
                    .zip(record.iter())
                    .map(|(header, value)| {
                        (header.to_owned(), Value::String(value.to_owned()))
                    })
                    .collect();
                Ok(Value::Object(map))
            }
        })))
    }
}

/// Create an [`AsyncWrite`] for a file or stdout.
async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write `text` followed by a newline to either standard output or a file.
pub async fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    let mut writer = BufWriter::new(create_writer(path).await?);
    writer
        .write_all(text.as_bytes())
        .await
        .context("Failed to write output")?;
    if !text.ends_with('\n') {
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline to output")?;
    }
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}

/// Write a value as pretty-printed JSON to either standard output or a file.
pub async fn write_json_output<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    write_output(path, &json).await
}
