use crate::net::{HttpError, NetError};
use httparse::Status;
use std::io::{self, Read};

const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Minimal HTTP request captured by the manual parser.
///
/// Only ASCII header names and an eagerly-buffered body are supported; a
/// vote fits comfortably inside the caps.
#[derive(Debug, Clone)]
pub struct SimpleHttpRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl SimpleHttpRequest {
    /// Case-insensitive single-header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Parses a blocking HTTP/1.1 request from the provided stream.
///
/// The parser expects a `Content-Length` header, rejects chunked encoding,
/// and caps header/body sizes to avoid unbounded buffering.
pub fn read_request(stream: &mut impl Read) -> Result<SimpleHttpRequest, NetError> {
    let mut buffer = Vec::new();
    let mut header_end = None;
    let mut temp = [0u8; 1024];
    while header_end.is_none() {
        let read = match stream.read(&mut temp) {
            Ok(0) => return Err(NetError::from(HttpError::ConnectionClosedBeforeHeaders)),
            Ok(read) => read,
            Err(err) => return Err(map_read_error(err)),
        };
        buffer.extend_from_slice(&temp[..read]);
        if buffer.len() > MAX_HEADER_BYTES {
            return Err(NetError::from(HttpError::HeadersTooLarge));
        }
        if let Some(pos) = find_header_terminator(&buffer) {
            header_end = Some(pos + 4);
        }
    }
    let header_len = header_end.ok_or(HttpError::MissingHeaderTerminator)?;
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut request = httparse::Request::new(&mut headers);
    match request.parse(&buffer) {
        Ok(Status::Complete(_)) => {}
        Ok(Status::Partial) => {
            return Err(NetError::from(HttpError::PartialRequest));
        }
        Err(err) => {
            return Err(NetError::from(HttpError::RequestParse(err)));
        }
    }
    let method = request.method.ok_or(HttpError::MissingMethod)?.to_string();
    let path = request.path.ok_or(HttpError::MissingPath)?.to_string();
    let mut header_pairs = Vec::with_capacity(request.headers.len());
    for header in request.headers.iter() {
        let value = String::from_utf8(header.value.to_vec()).map_err(|_| {
            HttpError::InvalidHeaderValue {
                name: header.name.to_string(),
            }
        })?;
        header_pairs.push((header.name.to_string(), value));
    }
    let mut content_length = 0usize;
    for (name, value) in &header_pairs {
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value
                .trim()
                .parse()
                .map_err(|_| HttpError::InvalidContentLengthValue)?;
        }
    }
    if content_length > MAX_BODY_BYTES {
        return Err(NetError::from(HttpError::BodyTooLarge));
    }
    let mut body = Vec::with_capacity(content_length);
    let already = buffer.len() - header_len;
    if already > 0 {
        let copy_len = already.min(content_length);
        body.extend_from_slice(&buffer[header_len..header_len + copy_len]);
    }
    while body.len() < content_length {
        let read = match stream.read(&mut temp) {
            Ok(0) => return Err(NetError::from(HttpError::ConnectionClosedBeforeBody)),
            Ok(read) => read,
            Err(err) => return Err(map_read_error(err)),
        };
        let remaining = content_length - body.len();
        body.extend_from_slice(&temp[..read.min(remaining)]);
    }
    Ok(SimpleHttpRequest {
        method,
        path,
        headers: header_pairs,
        body,
    })
}

fn find_header_terminator(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

fn map_read_error(err: io::Error) -> NetError {
    if is_timeout(&err) {
        NetError::from(HttpError::RequestTimeout)
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
