use crate::net::{HttpError, NetError};
use crate::signature::SIGNATURE_HEADER;
use serde_json::json;
use std::fmt::Write as _;
use std::io::{self, Write};

/// Writes a signed 200 response carrying the serialized vote response.
///
/// The `Signature` header covers exactly the body bytes passed in; callers
/// serialize once and sign those bytes.
pub(crate) fn write_signed_response(
    stream: &mut (impl Write + ?Sized),
    body: &[u8],
    signature: &str,
) -> Result<(), NetError> {
    let mut header = String::new();
    write!(
        header,
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/json\r\n{}: {}\r\nConnection: close\r\n\r\n",
        body.len(),
        SIGNATURE_HEADER,
        signature
    )
    .map_err(|_| HttpError::ResponseFormat)?;
    stream
        .write_all(header.as_bytes())
        .map_err(map_write_error)?;
    stream.write_all(body).map_err(map_write_error)?;
    Ok(())
}

/// Writes a JSON error body with the given status.
pub(crate) fn write_error_response(
    stream: &mut (impl Write + ?Sized),
    status: u16,
    detail: &str,
) -> Result<(), NetError> {
    let body = serde_json::to_vec(&json!({"error": detail, "status": status}))
        .map_err(HttpError::JsonSerialize)?;
    let mut header = String::new();
    write!(
        header,
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n",
        status,
        status_text(status),
        body.len()
    )
    .map_err(|_| HttpError::ResponseFormat)?;
    stream
        .write_all(header.as_bytes())
        .map_err(map_write_error)?;
    stream.write_all(&body).map_err(map_write_error)?;
    Ok(())
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

fn map_write_error(err: io::Error) -> NetError {
    if is_timeout(&err) {
        NetError::from(HttpError::ResponseTimeout)
    } else {
        NetError::from(err)
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
