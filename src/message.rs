//! Requests handed to the application and responses it hands back.

use bytes::Bytes;

use crate::error::{ErrorCode, H2Error};
use crate::hpack::HeaderField;

/// Headers that only make sense on a single HTTP/1.1 hop.
const CONNECTION_SPECIFIC_HEADERS: [&str; 5] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// A complete request received on one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub stream_id: u32,
    pub method: String,
    /// `None` only for CONNECT.
    pub scheme: Option<String>,
    pub authority: Option<String>,
    /// Empty only for CONNECT.
    pub path: String,
    /// Regular (non-pseudo) headers in arrival order.
    pub headers: Vec<HeaderField>,
    pub trailers: Vec<HeaderField>,
    pub body: Bytes,
    /// Synthesized from a PUSH_PROMISE rather than received.
    pub pushed: bool,
}

impl Request {
    /// Build a request from a decoded header list, enforcing the HTTP/2
    /// message rules (RFC 7540 Section 8.1.2).
    ///
    /// Every violation is a stream-level PROTOCOL_ERROR.
    pub fn from_headers(stream_id: u32, fields: Vec<HeaderField>) -> Result<Self, H2Error> {
        let malformed =
            |message: String| H2Error::stream(stream_id, ErrorCode::ProtocolError, message);

        let mut method = None;
        let mut scheme = None;
        let mut authority = None;
        let mut path = None;
        let mut headers = Vec::with_capacity(fields.len());

        for field in fields {
            let name = field
                .name_str()
                .ok_or_else(|| malformed("header name is not valid UTF-8".into()))?;
            if name.bytes().any(|b| b.is_ascii_uppercase()) {
                return Err(malformed(format!("uppercase header name {name:?}")));
            }

            if field.is_pseudo() {
                if !headers.is_empty() {
                    return Err(malformed(format!("pseudo-header {name} after regular header")));
                }
                let slot = match name {
                    ":method" => &mut method,
                    ":scheme" => &mut scheme,
                    ":authority" => &mut authority,
                    ":path" => &mut path,
                    _ => return Err(malformed(format!("unknown pseudo-header {name}"))),
                };
                if slot.is_some() {
                    return Err(malformed(format!("duplicate pseudo-header {name}")));
                }
                let value = field
                    .value_str()
                    .ok_or_else(|| malformed(format!("{name} is not valid UTF-8")))?;
                *slot = Some(value.to_owned());
                continue;
            }

            validate_regular_header(name, &field.value).map_err(malformed)?;
            headers.push(field);
        }

        let method = method.ok_or_else(|| malformed("missing :method".into()))?;
        let path = if method == "CONNECT" {
            path.unwrap_or_default()
        } else {
            if scheme.is_none() {
                return Err(malformed("missing :scheme".into()));
            }
            match path {
                Some(path) if !path.is_empty() => path,
                _ => return Err(malformed("missing or empty :path".into())),
            }
        };

        Ok(Self {
            stream_id,
            method,
            scheme,
            authority,
            path,
            headers,
            trailers: Vec::new(),
            body: Bytes::new(),
            pushed: false,
        })
    }

    /// First value of header `name`.
    #[must_use]
    pub fn header<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.header_values(name).next()
    }

    /// Every value of header `name`, in arrival order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |f| f.name.as_ref() == name.as_bytes())
            .filter_map(HeaderField::value_str)
    }
}

/// Trailers may not carry pseudo-headers and follow the regular header rules.
pub fn validate_trailers(stream_id: u32, fields: &[HeaderField]) -> Result<(), H2Error> {
    for field in fields {
        let name = field.name_str().unwrap_or_default();
        let result = if field.is_pseudo() {
            Err(format!("pseudo-header {name} in trailers"))
        } else if field.name.iter().any(u8::is_ascii_uppercase) {
            Err(format!("uppercase header name {name:?}"))
        } else {
            validate_regular_header(name, &field.value)
        };
        result.map_err(|message| H2Error::stream(stream_id, ErrorCode::ProtocolError, message))?;
    }
    Ok(())
}

fn validate_regular_header(name: &str, value: &[u8]) -> Result<(), String> {
    if CONNECTION_SPECIFIC_HEADERS.contains(&name) {
        return Err(format!("connection-specific header {name}"));
    }
    if name == "te" && value != b"trailers" {
        return Err("te header with a value other than \"trailers\"".into());
    }
    Ok(())
}

/// What the application sends back for a request.
///
/// ```
/// use h2_server_sans_io::Response;
///
/// let response = Response::new(200)
///     .header("content-type", "text/plain")
///     .body("hello")
///     .push("/style.css");
/// assert_eq!(response.status, 200);
/// assert_eq!(response.push_paths, ["/style.css"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<HeaderField>,
    pub body: Bytes,
    /// Paths to promise to the client before this response goes out.
    pub push_paths: Vec<String>,
}

impl Response {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
            push_paths: Vec::new(),
        }
    }

    /// Add a response header. Names are lowercased as HTTP/2 requires.
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<Bytes>) -> Self {
        self.headers
            .push(HeaderField::new(name.to_ascii_lowercase(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn push(mut self, path: impl Into<String>) -> Self {
        self.push_paths.push(path.into());
        self
    }

    /// Full header list for the HEADERS frame, `:status` first.
    #[must_use]
    pub fn header_fields(&self) -> Vec<HeaderField> {
        let mut fields = Vec::with_capacity(self.headers.len() + 1);
        fields.push(HeaderField::new(":status", self.status.to_string()));
        fields.extend(self.headers.iter().cloned());
        fields
    }
}
