use crate::error::{Error, IcapResult};

/// Section layout decoded from the `Encapsulated:` header.
///
/// The manifest lists `key=offset` entries whose offsets are relative to the
/// start of the encapsulated area (immediately after the ICAP headers
/// CRLFCRLF). Section lengths fall out of the distance between consecutive
/// offsets; the final section, if it is a body, extends to the end of the
/// message and is chunked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Encapsulated {
    /// Bytes to discard before the first embedded header block.
    pub(crate) initial_skip: usize,
    /// Length of the embedded HTTP request head, 0 if absent.
    pub(crate) req_hdr_len: usize,
    /// Length of the embedded HTTP response head, 0 if absent.
    pub(crate) res_hdr_len: usize,
    /// A `req-body`, `res-body`, or `opt-body` section follows the heads.
    pub(crate) has_body: bool,
}

/// Parse an `Encapsulated:` header value into the section layout.
///
/// Entries are processed left to right. A body marker (`*-body`, `null-body`)
/// terminates the list; anything after one is an error, as are unknown keys
/// and offsets that move backwards.
pub(crate) fn parse_encapsulated(value: &str) -> IcapResult<Encapsulated> {
    let mut enc = Encapsulated::default();
    let mut prev_key = "";
    let mut prev_offset = 0usize;

    for item in value.split(',') {
        let item = item.trim();
        let Some((key, offset)) = item.split_once('=') else {
            return Err(Error::MalformedEncapsulated(value.to_string()));
        };
        let key = key.trim();
        let offset: usize = offset
            .trim()
            .parse()
            .map_err(|_| Error::MalformedEncapsulated(value.to_string()))?;

        // The distance to the previous entry is the previous section's length.
        match prev_key {
            "" => enc.initial_skip = offset,
            "req-hdr" => {
                enc.req_hdr_len = offset
                    .checked_sub(prev_offset)
                    .ok_or_else(|| Error::MalformedEncapsulated(value.to_string()))?;
            }
            "res-hdr" => {
                enc.res_hdr_len = offset
                    .checked_sub(prev_offset)
                    .ok_or_else(|| Error::MalformedEncapsulated(value.to_string()))?;
            }
            "req-body" | "res-body" | "opt-body" | "null-body" => {
                return Err(Error::MalformedEncapsulated(format!(
                    "{prev_key} must be the last section"
                )));
            }
            _ => {}
        }

        match key {
            "req-hdr" | "res-hdr" | "null-body" => {}
            "req-body" | "res-body" | "opt-body" => enc.has_body = true,
            _ => return Err(Error::InvalidEncapsulatedKey(key.to_string())),
        }

        prev_key = key;
        prev_offset = offset;
    }

    Ok(enc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_only_reqmod() {
        let e = parse_encapsulated("req-hdr=0, null-body=170").unwrap();
        assert_eq!(e.initial_skip, 0);
        assert_eq!(e.req_hdr_len, 170);
        assert_eq!(e.res_hdr_len, 0);
        assert!(!e.has_body);
    }

    #[test]
    fn respmod_with_body() {
        let e = parse_encapsulated("req-hdr=0, res-hdr=137, res-body=296").unwrap();
        assert_eq!(e.req_hdr_len, 137);
        assert_eq!(e.res_hdr_len, 159);
        assert!(e.has_body);
    }

    #[test]
    fn null_body_alone() {
        let e = parse_encapsulated("null-body=0").unwrap();
        assert_eq!(e, Encapsulated::default());
    }

    #[test]
    fn opt_body_sets_has_body() {
        let e = parse_encapsulated("opt-body=0").unwrap();
        assert!(e.has_body);
        assert_eq!(e.req_hdr_len, 0);
    }

    #[test]
    fn nonzero_first_offset_is_initial_skip() {
        let e = parse_encapsulated("req-hdr=10, null-body=180").unwrap();
        assert_eq!(e.initial_skip, 10);
        assert_eq!(e.req_hdr_len, 170);
    }

    #[test]
    fn body_must_be_last() {
        let err = parse_encapsulated("req-body=0, req-hdr=50").unwrap_err();
        assert!(matches!(err, Error::MalformedEncapsulated(_)));
    }

    #[test]
    fn unknown_key_rejected() {
        let err = parse_encapsulated("req-hdr=0, foo-body=10").unwrap_err();
        assert!(matches!(err, Error::InvalidEncapsulatedKey(ref k) if k == "foo-body"));
    }

    #[test]
    fn decreasing_offsets_rejected() {
        let err = parse_encapsulated("req-hdr=100, null-body=50").unwrap_err();
        assert!(matches!(err, Error::MalformedEncapsulated(_)));
    }

    #[test]
    fn entries_without_offset_rejected() {
        assert!(parse_encapsulated("req-hdr").is_err());
        assert!(parse_encapsulated("req-hdr=x").is_err());
        assert!(parse_encapsulated("").is_err());
    }
}
