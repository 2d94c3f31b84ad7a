use crate::net::{HttpError, NetError};
use crate::signature::SIGNATURE_HEADER;
use crate::timeouts::{CONNECT_TIMEOUT, REQUEST_TIMEOUT};
use httparse::Status;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use url::Url;

const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Blocking one-shot HTTP client for the voter's poll exchange.
///
/// Each poll opens a fresh connection and closes it with the response; the
/// polling cadence is the retry mechanism, so there is no pooling and no
/// retry loop here.
#[derive(Debug)]
pub(crate) struct VoteTransport {
    host: String,
    port: u16,
    authority: String,
    path: String,
}

/// Response surface the voter's validation pipeline needs.
pub(crate) struct HttpResponse {
    pub(crate) status: u16,
    headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
}

impl HttpResponse {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl VoteTransport {
    pub(crate) fn new(base_url: impl AsRef<str>) -> Result<Self, NetError> {
        let url = Url::parse(base_url.as_ref())?;
        if url.scheme() != "http" {
            return Err(NetError::from(HttpError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
            }));
        }
        let host = url.host_str().ok_or(HttpError::MissingHost)?.to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let authority = if port == 80 {
            host.clone()
        } else {
            format!("{host}:{port}")
        };
        let path = if url.path().is_empty() {
            "/".to_string()
        } else {
            url.path().to_string()
        };
        Ok(Self {
            host,
            port,
            authority,
            path,
        })
    }

    pub(crate) fn post_vote(&self, body: &[u8], signature: &str) -> Result<HttpResponse, NetError> {
        let mut stream = self.connect()?;
        let mut request = format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nAccept: application/json\r\n{}: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.path,
            self.authority,
            SIGNATURE_HEADER,
            signature,
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(body);
        stream.write_all(&request)?;
        stream.flush()?;
        let mut raw = Vec::new();
        let mut temp = [0u8; 1024];
        loop {
            match stream.read(&mut temp) {
                Ok(0) => break,
                Ok(read) => {
                    raw.extend_from_slice(&temp[..read]);
                    if raw.len() > MAX_RESPONSE_BYTES {
                        return Err(NetError::from(HttpError::BodyTooLarge));
                    }
                }
                Err(err) => return Err(NetError::from(err)),
            }
        }
        parse_response(&raw)
    }

    fn connect(&self) -> Result<TcpStream, NetError> {
        let target = format!("{}:{}", self.host, self.port);
        let addrs: Vec<SocketAddr> = target.to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(NetError::from(HttpError::NoAddressesResolved));
        }
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
                    stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(NetError::Io(last_err.unwrap_or_else(|| {
            std::io::Error::other("unable to connect to vote server")
        })))
    }
}

fn parse_response(raw: &[u8]) -> Result<HttpResponse, NetError> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);
    let header_len = match response.parse(raw) {
        Ok(Status::Complete(len)) => len,
        Ok(Status::Partial) => return Err(NetError::from(HttpError::PartialResponse)),
        Err(err) => return Err(NetError::from(HttpError::ResponseParse(err))),
    };
    let status = response.code.ok_or(HttpError::MissingStatusCode)?;
    let mut header_pairs = Vec::with_capacity(response.headers.len());
    for header in response.headers.iter() {
        let value = String::from_utf8(header.value.to_vec()).map_err(|_| {
            HttpError::InvalidHeaderValue {
                name: header.name.to_string(),
            }
        })?;
        header_pairs.push((header.name.to_string(), value));
    }
    let mut body = raw[header_len..].to_vec();
    // Connection: close responses end at EOF; honor Content-Length when the
    // peer declared one and sent extra bytes.
    for (name, value) in &header_pairs {
        if name.eq_ignore_ascii_case("content-length") {
            let declared: usize = value
                .trim()
                .parse()
                .map_err(|_| HttpError::InvalidContentLengthValue)?;
            if declared <= body.len() {
                body.truncate(declared);
            }
        }
    }
    Ok(HttpResponse {
        status,
        headers: header_pairs,
        body,
    })
}
