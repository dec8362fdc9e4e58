//! SCGI client over Unix domain sockets.
//!
//! Request headers are sent as a netstring of NUL-separated name/value
//! pairs. `CONTENT_LENGTH` comes first, as the protocol requires, and is
//! always zero. The application's reply is read to end-of-stream.

use std::path::Path;

use super::{BackendResponse, DispatchError};

/// Encode `vars` as an SCGI header netstring.
pub fn encode_headers(vars: &[(String, String)]) -> Vec<u8> {
    let mut headers = Vec::new();
    let mut push = |name: &str, value: &str| {
        headers.extend_from_slice(name.as_bytes());
        headers.push(0);
        headers.extend_from_slice(value.as_bytes());
        headers.push(0);
    };
    push("CONTENT_LENGTH", "0");
    push("SCGI", "1");
    for (name, value) in vars {
        push(name, value);
    }

    let mut netstring = format!("{}:", headers.len()).into_bytes();
    netstring.extend_from_slice(&headers);
    netstring.push(b',');
    netstring
}

/// Send one request to the application at `socket` and parse the reply.
#[cfg(unix)]
pub async fn run(socket: &Path, vars: &[(String, String)]) -> Result<BackendResponse, DispatchError> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    let mut stream = UnixStream::connect(socket).await?;
    stream.write_all(&encode_headers(vars)).await?;
    stream.flush().await?;

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await?;
    super::parse_response(&reply)
}

#[cfg(not(unix))]
pub async fn run(_socket: &Path, _vars: &[(String, String)]) -> Result<BackendResponse, DispatchError> {
    Err(DispatchError::Unsupported)
}
