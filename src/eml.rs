// src/eml.rs
//
// RFC 5322 / MIME export of an `OutgoingMessage`, plus the reader used by
// `inspect` to check what a saved draft actually contains.

use crate::draft::{Attachment, OutgoingMessage};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt::Write;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc2822;
use tracing::{info, warn};

const CRLF: &str = "\r\n";
const LINE_LIMIT: usize = 76;

#[derive(Debug, thiserror::Error)]
pub enum EmlError {
    #[error("message is not valid text: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("body is not valid UTF-8: {0}")]
    BodyUtf8(#[from] std::string::FromUtf8Error),

    #[error("malformed message: {0}")]
    Malformed(&'static str),

    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("bad base64 content: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unsupported transfer encoding: {0}")]
    Encoding(String),
}

/// What a parsed .eml holds, in the same shape it was written from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub subject: String,
    pub recipient: String,
    pub sender: Option<String>,
    pub body_text: String,
    pub attachments: Vec<Attachment>,
}

/// Serialise `msg` as an unsent draft stamped with the current time.
pub fn render(msg: &OutgoingMessage) -> Vec<u8> {
    render_at(msg, OffsetDateTime::now_utc())
}

pub fn render_at(msg: &OutgoingMessage, date: OffsetDateTime) -> Vec<u8> {
    let date = match date.format(&Rfc2822) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!(error = %e, "Could not format Date header; omitting it");
            None
        }
    };

    let digest = fingerprint(msg, date.as_deref().unwrap_or_default());
    let boundary = format!("----=_Part_{}", &digest[..24]);

    let mut out = String::new();
    if let Some(sender) = &msg.sender {
        header(&mut out, "From", &single_line(sender));
    }
    header(&mut out, "To", &single_line(&msg.recipient));
    header(&mut out, "Subject", &encode_header_text(&msg.subject));
    if let Some(date) = &date {
        header(&mut out, "Date", date);
    }
    header(&mut out, "Message-ID", &format!("<{}@invoice-reply.local>", &digest[24..56]));
    header(&mut out, "MIME-Version", "1.0");
    header(&mut out, "X-Unsent", "1");
    header(
        &mut out,
        "Content-Type",
        &format!("multipart/mixed; boundary=\"{boundary}\""),
    );
    out.push_str(CRLF);
    out.push_str("This is a multi-part message in MIME format.");
    out.push_str(CRLF);

    // Body part
    let _ = write!(out, "{CRLF}--{boundary}{CRLF}");
    header(&mut out, "Content-Type", "text/plain; charset=\"utf-8\"");
    if is_plain_7bit(&msg.body_text) {
        header(&mut out, "Content-Transfer-Encoding", "7bit");
        out.push_str(CRLF);
        out.push_str(&msg.body_text.replace('\n', CRLF));
    } else {
        header(&mut out, "Content-Transfer-Encoding", "base64");
        out.push_str(CRLF);
        push_base64(&mut out, msg.body_text.as_bytes());
    }

    // Attachments
    for att in &msg.attachments {
        let _ = write!(out, "{CRLF}--{boundary}{CRLF}");
        header(
            &mut out,
            "Content-Type",
            &format!("{}; {}", att.mime_type, param("name", &att.filename)),
        );
        header(&mut out, "Content-Transfer-Encoding", "base64");
        header(
            &mut out,
            "Content-Disposition",
            &format!("attachment; {}", param("filename", &att.filename)),
        );
        out.push_str(CRLF);
        push_base64(&mut out, &att.bytes);
    }

    let _ = write!(out, "{CRLF}--{boundary}--{CRLF}");

    info!(
        bytes = out.len(),
        attachments = msg.attachments.len(),
        "Draft exported"
    );
    out.into_bytes()
}

fn header(out: &mut String, name: &str, value: &str) {
    let _ = write!(out, "{name}: {value}{CRLF}");
}

/// Stable hash of the message, used for the boundary and Message-ID.
fn fingerprint(msg: &OutgoingMessage, date: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(msg.subject.as_bytes());
    hasher.update(msg.recipient.as_bytes());
    hasher.update(msg.body_text.as_bytes());
    for att in &msg.attachments {
        hasher.update(att.filename.as_bytes());
        hasher.update(&att.bytes);
    }
    hasher.update(date.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn is_plain_7bit(text: &str) -> bool {
    text.is_ascii()
        && !text.contains('\r')
        && text.lines().all(|l| l.len() <= 998 && !l.starts_with("--"))
}

fn push_base64(out: &mut String, bytes: &[u8]) {
    let encoded = BASE64.encode(bytes);
    let mut lines = encoded.as_bytes().chunks(LINE_LIMIT).peekable();
    while let Some(chunk) = lines.next() {
        // base64 output is ASCII
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        if lines.peek().is_some() {
            out.push_str(CRLF);
        }
    }
}

/// Addresses never legitimately contain line breaks.
fn single_line(value: &str) -> String {
    value.chars().filter(|c| !c.is_control()).collect()
}

/// RFC 2047 encoded words for header text that cannot go out verbatim
/// (non-ASCII, control characters, over-long), folded every 45 bytes.
fn encode_header_text(text: &str) -> String {
    if text.is_ascii() && !text.chars().any(|c| c.is_ascii_control()) && text.len() <= 900 {
        return text.to_string();
    }
    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (idx, ch) in text.char_indices() {
        let next = idx + ch.len_utf8();
        if next - start > 45 {
            words.push(&text[start..end]);
            start = end;
        }
        end = next;
    }
    words.push(&text[start..end]);

    words
        .iter()
        .map(|w| format!("=?utf-8?B?{}?=", BASE64.encode(w)))
        .collect::<Vec<_>>()
        .join("\r\n ")
}

/// `name="value"` for tame values, RFC 2231 `name*=` otherwise.
fn param(name: &str, value: &str) -> String {
    let tame = value
        .chars()
        .all(|c| c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\');
    if tame {
        format!("{name}=\"{value}\"")
    } else {
        format!("{name}*=utf-8''{}", urlencoding::encode(value))
    }
}

/// Read back an .eml produced by `render` (or by a typical mail client).
pub fn parse(raw: &[u8]) -> Result<ParsedMessage, EmlError> {
    let text = std::str::from_utf8(raw)?.replace(CRLF, "\n");
    let (head, body) = split_head(&text).ok_or(EmlError::Malformed("no header block"))?;
    let headers = parse_headers(head);

    let recipient = find_header(&headers, "to")
        .map(strip_display_name)
        .ok_or(EmlError::MissingHeader("To"))?;
    let subject = find_header(&headers, "subject")
        .map(decode_header_text)
        .ok_or(EmlError::MissingHeader("Subject"))?;
    let sender = find_header(&headers, "from").map(strip_display_name);

    let content_type = find_header(&headers, "content-type").unwrap_or("text/plain");
    let mut parsed = ParsedMessage {
        subject,
        recipient,
        sender,
        body_text: String::new(),
        attachments: Vec::new(),
    };

    if !mime_type(content_type).starts_with("multipart/") {
        let bytes = decode_content(&headers, body)?;
        parsed.body_text = String::from_utf8(bytes)?;
        return Ok(parsed);
    }

    let boundary = header_param(content_type, "boundary")
        .ok_or(EmlError::Malformed("multipart without boundary"))?;
    let delimiter = format!("\n--{boundary}");
    let body = format!("\n{body}");

    let mut body_set = false;
    for section in body.split(delimiter.as_str()).skip(1) {
        if section.starts_with("--") {
            break;
        }
        // drop the rest of the delimiter line
        let part = section.split_once('\n').map_or("", |(_, rest)| rest);
        let (part_head, content) = split_head(part).unwrap_or(("", part));
        let part_headers = parse_headers(part_head);

        let part_type = find_header(&part_headers, "content-type").unwrap_or("text/plain");
        let disposition = find_header(&part_headers, "content-disposition").unwrap_or_default();
        let filename = header_param(disposition, "filename")
            .or_else(|| header_param(part_type, "name"));
        let bytes = decode_content(&part_headers, content)?;

        match filename {
            Some(filename) => parsed.attachments.push(Attachment {
                filename,
                mime_type: mime_type(part_type),
                bytes,
            }),
            None if !body_set && mime_type(part_type) == "text/plain" => {
                parsed.body_text = String::from_utf8(bytes)?;
                body_set = true;
            }
            None => warn!(content_type = %part_type, "Skipping unnamed part"),
        }
    }

    Ok(parsed)
}

fn split_head(text: &str) -> Option<(&str, &str)> {
    if let Some(rest) = text.strip_prefix('\n') {
        return Some(("", rest));
    }
    text.split_once("\n\n")
}

fn parse_headers(block: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in block.lines() {
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push_str(line);
            }
        } else if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    headers
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

fn mime_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn strip_display_name(value: &str) -> String {
    match (value.rfind('<'), value.rfind('>')) {
        (Some(open), Some(close)) if open < close => value[open + 1..close].trim().to_string(),
        _ => value.trim().to_string(),
    }
}

fn header_param(value: &str, name: &str) -> Option<String> {
    let extended = Regex::new(&format!(r#"(?i)(?:^|;)\s*{name}\*=([^;]+)"#)).ok()?;
    if let Some(cap) = extended.captures(value) {
        let raw = cap[1].trim();
        let encoded = raw.splitn(3, '\'').nth(2).unwrap_or(raw);
        return urlencoding::decode(encoded).ok().map(|v| v.into_owned());
    }

    let plain = Regex::new(&format!(r#"(?i)(?:^|;)\s*{name}=(?:"([^"]*)"|([^;\s]+))"#)).ok()?;
    let cap = plain.captures(value)?;
    let raw = cap.get(1).or_else(|| cap.get(2))?.as_str();
    Some(decode_header_text(raw))
}

fn decode_content(headers: &[(String, String)], content: &str) -> Result<Vec<u8>, EmlError> {
    let encoding = find_header(headers, "content-transfer-encoding")
        .unwrap_or("7bit")
        .to_ascii_lowercase();
    match encoding.as_str() {
        "base64" => {
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            Ok(BASE64.decode(compact)?)
        }
        "7bit" | "8bit" | "binary" => Ok(content.as_bytes().to_vec()),
        other => Err(EmlError::Encoding(other.to_string())),
    }
}

/// Decode RFC 2047 words; whitespace between two adjacent words is dropped.
fn decode_header_text(value: &str) -> String {
    let Ok(re) = Regex::new(r"=\?([^?]+)\?([bBqQ])\?([^?]*)\?=") else {
        return value.to_string();
    };

    let mut out = Vec::new();
    let mut last = 0;
    let mut prev_was_word = false;
    for cap in re.captures_iter(value) {
        let Some(whole) = cap.get(0) else { continue };
        let gap = &value[last..whole.start()];
        if !(prev_was_word && gap.trim().is_empty()) {
            out.extend_from_slice(gap.as_bytes());
        }
        let decoded = match &cap[2] {
            "b" | "B" => BASE64.decode(&cap[3]).unwrap_or_else(|_| cap[0].as_bytes().to_vec()),
            _ => decode_q(&cap[3]),
        };
        out.extend_from_slice(&decoded);
        last = whole.end();
        prev_was_word = true;
    }
    out.extend_from_slice(value[last..].as_bytes());
    String::from_utf8_lossy(&out).into_owned()
}

fn decode_q(word: &str) -> Vec<u8> {
    let bytes = word.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or_default();
                match u8::from_str_radix(hex, 16) {
                    Ok(b) => {
                        out.push(b);
                        i += 2;
                    }
                    Err(_) => out.push(b'='),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::{PDF_MIME, RECIPIENT};
    use crate::sheet::XLSX_MIME;

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            subject: "Response to: march.pdf".to_string(),
            recipient: RECIPIENT.to_string(),
            sender: None,
            body_text: "Please allocate evenly across the list of stores with Region Codes attached."
                .to_string(),
            attachments: vec![
                Attachment {
                    filename: "filtered_march.xlsx".to_string(),
                    mime_type: XLSX_MIME.to_string(),
                    bytes: (0..=255u8).cycle().take(700).collect(),
                },
                Attachment {
                    filename: "march.pdf".to_string(),
                    mime_type: PDF_MIME.to_string(),
                    bytes: b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n".to_vec(),
                },
            ],
        }
    }

    fn assert_round_trip(msg: &OutgoingMessage) {
        let parsed = parse(&render(msg)).unwrap();
        assert_eq!(parsed.subject, msg.subject);
        assert_eq!(parsed.recipient, msg.recipient);
        assert_eq!(parsed.sender, msg.sender);
        assert_eq!(parsed.body_text, msg.body_text);
        assert_eq!(parsed.attachments, msg.attachments);
    }

    #[test]
    fn test_round_trip() {
        assert_round_trip(&message());
    }

    #[test]
    fn test_round_trip_unicode_and_multiline() {
        let mut msg = message();
        msg.subject = "Response to: Crow\u{2019}s Nest – März rechnung with a very long name.pdf".into();
        msg.body_text = "Zeile eins\nline two \u{2713}\n".into();
        msg.sender = Some("clerk@example.com".into());
        msg.attachments[1].filename = "März.pdf".into();
        assert_round_trip(&msg);
    }

    #[test]
    fn test_round_trip_multiline_ascii_body() {
        let mut msg = message();
        msg.body_text = "first\nsecond\n\nthird".into();
        assert_round_trip(&msg);
    }

    #[test]
    fn test_headers_present() {
        let raw = String::from_utf8(render(&message())).unwrap();
        assert!(raw.contains("To: DSao@techstyle.com\r\n"));
        assert!(raw.contains("Subject: Response to: march.pdf\r\n"));
        assert!(raw.contains("X-Unsent: 1\r\n"));
        assert!(raw.contains("Content-Disposition: attachment; filename=\"march.pdf\""));
        assert!(raw.lines().all(|l| l.len() <= 998));
    }

    #[test]
    fn test_boundary_is_deterministic() {
        let date = OffsetDateTime::UNIX_EPOCH;
        assert_eq!(render_at(&message(), date), render_at(&message(), date));
    }

    #[test]
    fn test_parse_foreign_message() {
        let raw = "To: D S <dsao@example.com>\nSubject: =?utf-8?Q?Caf=C3=A9_bill?=\n\nhello\n";
        let parsed = parse(raw.as_bytes()).unwrap();
        assert_eq!(parsed.recipient, "dsao@example.com");
        assert_eq!(parsed.subject, "Café bill");
        assert_eq!(parsed.body_text, "hello\n");
        assert!(parsed.attachments.is_empty());
    }

    #[test]
    fn test_missing_to_is_error() {
        let raw = "Subject: x\n\nbody";
        assert!(matches!(
            parse(raw.as_bytes()),
            Err(EmlError::MissingHeader("To"))
        ));
    }

    #[test]
    fn test_line_breaks_cannot_inject_headers() {
        let mut msg = message();
        msg.subject = "Response to: a\r\nBcc: x@evil.test\n.pdf".into();
        msg.recipient = "dsao@example.com\r\nBcc: x@evil.test".into();
        msg.attachments[0].filename = "a\nBcc: x@evil.test.pdf".into();

        let raw = String::from_utf8(render(&msg)).unwrap();
        assert!(!raw.lines().any(|l| l.starts_with("Bcc:")));

        let parsed = parse(raw.as_bytes()).unwrap();
        assert_eq!(parsed.subject, msg.subject);
        assert_eq!(parsed.recipient, "dsao@example.comBcc: x@evil.test");
        assert_eq!(parsed.attachments[0].filename, msg.attachments[0].filename);
    }

    #[test]
    fn test_long_subject_is_folded() {
        let mut msg = message();
        msg.subject = format!("Response to: {}.pdf", "a".repeat(1200));

        let raw = String::from_utf8(render(&msg)).unwrap();
        assert!(raw.lines().all(|l| l.len() <= 998));
        assert_eq!(parse(raw.as_bytes()).unwrap().subject, msg.subject);
    }
}
