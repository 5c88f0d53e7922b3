//! ICAP status codes and their canonical reason phrases.
//!
//! RFC 3507 reuses the HTTP/1.1 status space and adds ICAP-specific phrases
//! for a handful of 5xx codes. Codes outside the table get an empty string;
//! the response writer substitutes a synthetic phrase in that case.

/// Canonical reason phrase for an ICAP status code, or `""` if unknown.
pub fn status_text(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",

        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",

        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",

        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        417 => "Expectation Failed",

        500 => "Server Error",
        501 => "Method Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Overloaded",
        504 => "Gateway Timeout",
        505 => "ICAP Version Not Supported",

        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes() {
        assert_eq!(status_text(100), "Continue");
        assert_eq!(status_text(200), "OK");
        assert_eq!(status_text(401), "Unauthorized");
        assert_eq!(status_text(503), "Service Overloaded");
        assert_eq!(status_text(505), "ICAP Version Not Supported");
    }

    #[test]
    fn unknown_codes_are_empty() {
        assert_eq!(status_text(12345), "");
        assert_eq!(status_text(299), "");
    }
}
