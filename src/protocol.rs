//! qubesd wire format.
//!
//! A request is four NUL-terminated ASCII fields (source, method,
//! destination, argument) followed by an optional raw payload. The client
//! half-closes its write side and reads the reply until EOF.
//!
//! Replies start with a one-byte status code and a NUL:
//! `0` carries the payload, `2` carries a daemon-side exception as
//! `type NUL traceback NUL format NUL arg NUL ... arg NUL`.

use crate::error::QvmError;

/// Calls always originate from the administrative domain.
pub const SOURCE: &str = "dom0";

const OK_PREFIX: &[u8] = b"0\0";
const EXCEPTION_PREFIX: &[u8] = b"2\0";

/// Fields travel as NUL-separated ASCII on the socket and as argv for qrexec.
pub(crate) fn check_field(what: &str, value: &str) -> Result<(), QvmError> {
    if !value.is_ascii() || value.contains('\0') {
        return Err(QvmError::validation(format!(
            "{what} must be ASCII without NUL bytes (got {value:?})"
        )));
    }
    Ok(())
}

/// Serialize a call into the bytes written to the qubesd socket.
pub fn encode_request(
    method: &str,
    dest: &str,
    arg: Option<&str>,
    payload: Option<&[u8]>,
) -> Result<Vec<u8>, QvmError> {
    check_field("method", method)?;
    check_field("destination", dest)?;
    if let Some(arg) = arg {
        check_field("argument", arg)?;
    }

    let mut buf = Vec::with_capacity(
        SOURCE.len() + method.len() + dest.len() + arg.map_or(0, str::len) + 4,
    );
    for field in [Some(SOURCE), Some(method), Some(dest), arg] {
        if let Some(f) = field {
            buf.extend_from_slice(f.as_bytes());
        }
        buf.push(0);
    }
    if let Some(payload) = payload {
        buf.extend_from_slice(payload);
    }
    Ok(buf)
}

/// Parse a raw reply, returning the payload of a successful call.
pub fn parse_response(data: &[u8]) -> Result<Vec<u8>, QvmError> {
    if data.is_empty() {
        return Err(QvmError::NoResponse);
    }

    if let Some(payload) = data.strip_prefix(OK_PREFIX) {
        return Ok(payload.to_vec());
    }

    if let Some(rest) = data.strip_prefix(EXCEPTION_PREFIX) {
        let fields: Vec<&[u8]> = rest.splitn(4, |&b| b == 0).collect();
        let [exc_type, _traceback, format, args] = fields.as_slice() else {
            return Err(QvmError::protocol("truncated exception reply"));
        };

        // trailing NUL terminates the last argument
        let mut args: Vec<String> = args
            .split(|&b| b == 0)
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();
        args.pop();

        let format = String::from_utf8_lossy(format);
        return Err(QvmError::Daemon {
            exc_type: String::from_utf8_lossy(exc_type).into_owned(),
            message: format_daemon_message(&format, &args),
        });
    }

    Err(QvmError::protocol("invalid response format"))
}

/// Substitute printf-style placeholders (`%s`, `%d`, `%r`) positionally.
///
/// Placeholders without a matching argument are left as-is.
pub fn format_daemon_message(format: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some(spec @ ('s' | 'd' | 'r')) => {
                chars.next();
                match args.next() {
                    Some(arg) if spec == 'r' => {
                        out.push('\'');
                        out.push_str(arg);
                        out.push('\'');
                    }
                    Some(arg) => out.push_str(arg),
                    None => {
                        out.push('%');
                        out.push(spec);
                    }
                }
            }
            _ => out.push('%'),
        }
    }
    out
}

/// Split a payload into non-empty text lines.
pub fn payload_lines(payload: &[u8]) -> Result<Vec<String>, QvmError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| QvmError::protocol(format!("reply is not valid UTF-8: {e}")))?;
    Ok(text
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}
