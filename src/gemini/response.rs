//! Response construction and writing.
//!
//! Every connection gets exactly one header line, `<code> <meta>\r\n`
//! (just `<code>\r\n` when meta is empty), followed by a body for
//! successful responses.

use std::io;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::backend::BackendResponse;
use crate::gemini::status::Status;

/// The single response sent on a connection.
#[derive(Debug)]
pub enum Response {
    /// Header line only.
    Header { status: Status, meta: String },
    /// Success with an in-memory body.
    Body { meta: String, body: Vec<u8> },
    /// Success streamed from an open file.
    File { meta: String, file: File },
    /// Whatever a CGI or SCGI backend produced.
    Backend(BackendResponse),
}

impl Response {
    pub fn header(status: Status, meta: impl Into<String>) -> Self {
        Response::Header {
            status,
            meta: meta.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::header(Status::NotFound, "Not found!")
    }

    /// Numeric status for the access log.
    pub fn code(&self) -> u8 {
        match self {
            Response::Header { status, .. } => status.code(),
            Response::Body { .. } | Response::File { .. } => Status::Success.code(),
            Response::Backend(backend) => backend.code,
        }
    }

    /// Write the header and any body, then flush.
    pub async fn write_to<W>(self, writer: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let code = self.code();
        match self {
            Response::Header { meta, .. } => {
                write_header(writer, code, &meta).await?;
            }
            Response::Body { meta, body } => {
                write_header(writer, code, &meta).await?;
                writer.write_all(&body).await?;
            }
            Response::File { meta, mut file } => {
                write_header(writer, code, &meta).await?;
                tokio::io::copy(&mut file, writer).await?;
            }
            Response::Backend(backend) => {
                write_header(writer, code, &backend.meta).await?;
                writer.write_all(&backend.body).await?;
            }
        }
        writer.flush().await
    }
}

async fn write_header<W>(writer: &mut W, code: u8, meta: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = if meta.is_empty() {
        format!("{code:02}\r\n")
    } else {
        format!("{code:02} {meta}\r\n")
    };
    writer.write_all(line.as_bytes()).await
}
