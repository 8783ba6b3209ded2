//! From/Subject extraction from a raw RFC 5322 header block.

use mailparse::MailHeaderMap;

pub const UNKNOWN_SENDER: &str = "Unknown";
pub const NO_SUBJECT: &str = "(no subject)";

/// Decode the sender and subject, falling back to placeholders.
/// Encoded words (RFC 2047) are decoded by mailparse.
pub fn parse_sender_subject(raw: &[u8]) -> (String, String) {
    let (from, subject) = match mailparse::parse_headers(raw) {
        Ok((headers, _)) => (headers.get_first_value("From"), headers.get_first_value("Subject")),
        Err(e) => {
            tracing::debug!("header parse failed, scanning lines: {e}");
            scan_lines(raw)
        }
    };
    (
        clean(from).unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        clean(subject).unwrap_or_else(|| NO_SUBJECT.to_string()),
    )
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|v| !v.is_empty())
}

fn scan_lines(raw: &[u8]) -> (Option<String>, Option<String>) {
    let text = String::from_utf8_lossy(raw);
    let mut from = None;
    let mut subject = None;
    for line in text.lines() {
        let lower = line.to_ascii_lowercase();
        if from.is_none() && lower.starts_with("from:") {
            from = Some(line[5..].trim().to_string());
        } else if subject.is_none() && lower.starts_with("subject:") {
            subject = Some(line[8..].trim().to_string());
        }
    }
    (from, subject)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_headers() {
        let raw = b"Received: by mx\r\nFrom: Ann <ann@example.com>\r\nSubject: Lunch?\r\n\r\n";
        let (from, subject) = parse_sender_subject(raw);
        assert_eq!(from, "Ann <ann@example.com>");
        assert_eq!(subject, "Lunch?");
    }

    #[test]
    fn folded_and_encoded_subject() {
        let raw =
            b"From: bob@example.com\r\nSubject: =?UTF-8?B?SGVsbG8gd29ybGQ=?=\r\n  again\r\n\r\n";
        let (from, subject) = parse_sender_subject(raw);
        assert_eq!(from, "bob@example.com");
        assert_eq!(subject, "Hello world again");
    }

    #[test]
    fn missing_headers_use_placeholders() {
        let (from, subject) = parse_sender_subject(b"X-Other: 1\r\n\r\n");
        assert_eq!(from, UNKNOWN_SENDER);
        assert_eq!(subject, NO_SUBJECT);

        let (from, subject) = parse_sender_subject(b"");
        assert_eq!(from, UNKNOWN_SENDER);
        assert_eq!(subject, NO_SUBJECT);
    }

    #[test]
    fn blank_subject_is_placeholder() {
        let (_, subject) = parse_sender_subject(b"From: a@b\r\nSubject:   \r\n\r\n");
        assert_eq!(subject, NO_SUBJECT);
    }
}
