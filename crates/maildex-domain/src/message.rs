//! RFC 5322 message parsing for MBOX segments.
//!
//! This is deliberately not a full MIME implementation: multipart bodies are
//! descended one level, TNEF and nested multiparts are ignored, and unknown
//! charsets fall back to lossy UTF-8.

use base64::Engine;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc2822};

use crate::rfc2047::{decode_base64_forgiving, decode_encoded_words, decode_quoted_printable};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Address {
	pub email: String,
	pub name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ParsedAttachment {
	pub filename: String,
	pub content_type: String,
	pub size: u64,
	pub content_base64: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ParsedEmail {
	pub message_id: String,
	pub subject: String,
	pub body_text: String,
	pub body_html: Option<String>,
	#[serde(with = "time::serde::rfc3339")]
	pub sent_at: OffsetDateTime,
	pub from_email: String,
	pub from_name: Option<String>,
	pub to: Vec<Address>,
	pub cc: Vec<Address>,
	pub bcc: Vec<Address>,
	pub in_reply_to: Option<String>,
	pub references: Vec<String>,
	pub attachments: Vec<ParsedAttachment>,
}

/// Unfolded message headers in original order. Lookup is case-insensitive;
/// the original spelling is kept for canonical re-serialization.
#[derive(Clone, Debug, Default)]
pub struct Headers {
	entries: Vec<(String, String)>,
}
impl Headers {
	pub fn parse(block: &str) -> Self {
		let mut entries: Vec<(String, String)> = Vec::new();

		for line in block.split('\n') {
			if line.starts_with(' ') || line.starts_with('\t') {
				// Continuation line folds into the previous value.
				if let Some((_, value)) = entries.last_mut() {
					value.push(' ');
					value.push_str(line.trim_start());
				}

				continue;
			}

			let Some((name, value)) = line.split_once(':') else {
				continue;
			};

			entries.push((name.trim().to_string(), value.trim().to_string()));
		}

		Self { entries }
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self.entries
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	pub fn canonical(&self) -> String {
		let mut out = String::new();

		for (name, value) in &self.entries {
			out.push_str(name);
			out.push_str(": ");
			out.push_str(value);
			out.push('\n');
		}

		out
	}
}

/// Parses one MBOX segment (envelope line already stripped) into a
/// [`ParsedEmail`]. Returns `None` for segments without a header break or
/// without a usable sender address.
pub fn parse(raw: &[u8], now: OffsetDateTime, body_max_chars: usize) -> Option<ParsedEmail> {
	let text = String::from_utf8_lossy(raw).replace("\r\n", "\n");
	let (header_block, body_block) = text.split_once("\n\n")?;
	let headers = Headers::parse(header_block);
	let from_decoded = decode_encoded_words(headers.get("from").unwrap_or(""));
	let from_email = extract_email(&from_decoded)?;

	if !from_email.contains('@') {
		return None;
	}

	let from_name = extract_name(&from_decoded);
	let message_id = headers
		.get("message-id")
		.map(strip_angle_brackets)
		.filter(|id| !id.is_empty())
		.unwrap_or_else(|| generated_message_id(raw));
	let subject = match headers.get("subject") {
		Some(value) if !value.trim().is_empty() => decode_encoded_words(value),
		_ => "(No Subject)".to_string(),
	};
	let sent_at = headers.get("date").and_then(parse_date).unwrap_or(now);
	let to = parse_recipients(headers.get("to").unwrap_or(""));
	let cc = parse_recipients(headers.get("cc").unwrap_or(""));
	let bcc = parse_recipients(headers.get("bcc").unwrap_or(""));
	let in_reply_to = headers
		.get("in-reply-to")
		.map(strip_angle_brackets)
		.filter(|value| !value.is_empty());
	let references = headers
		.get("references")
		.map(|value| {
			value.split_whitespace().map(|token| strip_angle_brackets(token)).collect::<Vec<_>>()
		})
		.unwrap_or_default();
	let content_type = headers.get("content-type").unwrap_or("");
	let encoding = headers.get("content-transfer-encoding").unwrap_or("").trim().to_lowercase();
	let (mut body_text, body_html, attachments) =
		if content_type.to_lowercase().contains("multipart") {
			parse_multipart(body_block, content_type)
		} else {
			let decoded = decode_transfer(body_block, &encoding);

			if content_type.to_lowercase().starts_with("text/html") {
				(strip_html(&decoded), Some(decoded), Vec::new())
			} else {
				(decoded, None, Vec::new())
			}
		};

	if body_text.trim().is_empty()
		&& let Some(html) = body_html.as_deref()
	{
		body_text = strip_html(html);
	}

	truncate_chars(&mut body_text, body_max_chars);

	Some(ParsedEmail {
		message_id,
		subject,
		body_text,
		body_html,
		sent_at,
		from_email,
		from_name,
		to,
		cc,
		bcc,
		in_reply_to,
		references,
		attachments,
	})
}

/// Bracketed address wins; otherwise the first bare `local@host.tld` match.
pub fn extract_email(text: &str) -> Option<String> {
	if let Some(open) = text.find('<')
		&& let Some(len) = text[open + 1..].find('>')
	{
		let inner = text[open + 1..open + 1 + len].trim();

		if inner.contains('@') {
			return Some(inner.to_lowercase());
		}
	}

	find_bare_email(text)
}

pub fn extract_name(text: &str) -> Option<String> {
	let raw = match text.find('<') {
		Some(open) => &text[..open],
		None => return None,
	};
	let name = raw.trim().trim_matches('"').trim();

	if name.is_empty() { None } else { Some(name.to_string()) }
}

fn find_bare_email(text: &str) -> Option<String> {
	let bytes = text.as_bytes();

	for (at, _) in text.match_indices('@') {
		let local_start =
			bytes[..at].iter().rposition(|&b| !is_local_byte(b)).map(|i| i + 1).unwrap_or(0);
		let domain_end = bytes[at + 1..]
			.iter()
			.position(|&b| !is_domain_byte(b))
			.map(|i| at + 1 + i)
			.unwrap_or(bytes.len());
		let local = &text[local_start..at];
		let domain = text[at + 1..domain_end].trim_end_matches('.');

		if !local.is_empty() && domain.contains('.') {
			return Some(format!("{}@{}", local.to_lowercase(), domain.to_lowercase()));
		}
	}

	None
}

fn is_local_byte(byte: u8) -> bool {
	byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'%' | b'+' | b'-')
}

fn is_domain_byte(byte: u8) -> bool {
	byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'-')
}

/// Splits an address list on commas that are not inside double quotes.
pub fn parse_recipients(header: &str) -> Vec<Address> {
	let decoded = decode_encoded_words(header);
	let mut out = Vec::new();
	let mut in_quotes = false;
	let mut start = 0;
	let mut parts = Vec::new();

	for (idx, ch) in decoded.char_indices() {
		match ch {
			'"' => in_quotes = !in_quotes,
			',' if !in_quotes => {
				parts.push(&decoded[start..idx]);

				start = idx + 1;
			},
			_ => {},
		}
	}

	parts.push(&decoded[start..]);

	for part in parts {
		let part = part.trim();

		if part.is_empty() {
			continue;
		}

		let Some(email) = extract_email(part) else {
			continue;
		};

		out.push(Address { email, name: extract_name(part) });
	}

	out
}

fn strip_angle_brackets(value: &str) -> String {
	value.trim().trim_start_matches('<').trim_end_matches('>').to_string()
}

/// Deterministic fallback id: a redelivery that re-parses the same raw
/// segment must synthesize the same id, or the per-tenant uniqueness dedupe
/// never sees the duplicate.
fn generated_message_id(raw: &[u8]) -> String {
	let digest = blake3::hash(raw);

	format!("generated-{}@mbox-import", &digest.to_hex().as_str()[..32])
}

fn parse_date(value: &str) -> Option<OffsetDateTime> {
	// Drop trailing comments such as "(UTC)" that the RFC 2822 parser rejects.
	let cleaned = match value.find('(') {
		Some(pos) => value[..pos].trim(),
		None => value.trim(),
	};

	OffsetDateTime::parse(cleaned, &Rfc2822).ok()
}

fn decode_transfer(body: &str, encoding: &str) -> String {
	match encoding {
		"quoted-printable" => decode_quoted_printable(body, false),
		"base64" => match decode_base64_forgiving(body) {
			Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
			None => body.to_string(),
		},
		_ => body.to_string(),
	}
}

/// One-level multipart descent: the first `text/plain` part becomes the body,
/// the first `text/html` part is kept, and `Content-Disposition: attachment`
/// parts are collected. Nested multiparts are not descended.
fn parse_multipart(body: &str, content_type: &str) -> (String, Option<String>, Vec<ParsedAttachment>) {
	let Some(boundary) = boundary_param(content_type) else {
		return (body.to_string(), None, Vec::new());
	};
	let marker = format!("--{boundary}");
	let mut body_text = None;
	let mut body_html = None;
	let mut attachments = Vec::new();

	for part in body.split(marker.as_str()).skip(1) {
		if part.starts_with("--") {
			break;
		}

		let part = part.trim_start_matches(['\r', '\n']);
		let (header_block, part_body) = match part.split_once("\n\n") {
			Some((headers, rest)) => (headers, rest),
			None => (part, ""),
		};
		let part_headers = Headers::parse(header_block);
		let part_type = part_headers.get("content-type").unwrap_or("").to_lowercase();
		let disposition = part_headers.get("content-disposition").unwrap_or("").to_lowercase();
		let encoding = part_headers
			.get("content-transfer-encoding")
			.unwrap_or("")
			.trim()
			.to_lowercase();

		if disposition.contains("attachment") {
			if let Some(attachment) = parse_attachment(&part_headers, part_body, &encoding) {
				attachments.push(attachment);
			}

			continue;
		}
		if part_type.contains("text/plain") && body_text.is_none() {
			body_text = Some(decode_transfer(part_body, &encoding));
		} else if part_type.contains("text/html") && body_html.is_none() {
			body_html = Some(decode_transfer(part_body, &encoding));
		}
	}

	(body_text.unwrap_or_default(), body_html, attachments)
}

fn parse_attachment(
	headers: &Headers,
	body: &str,
	encoding: &str,
) -> Option<ParsedAttachment> {
	let disposition = headers.get("content-disposition").unwrap_or("");
	let filename = param_value(disposition, "filename")
		.or_else(|| param_value(headers.get("content-type").unwrap_or(""), "name"))?;
	let filename = decode_encoded_words(&filename);
	let bytes = match encoding {
		"base64" => decode_base64_forgiving(body)?,
		"quoted-printable" => decode_quoted_printable(body, false).into_bytes(),
		_ => body.as_bytes().to_vec(),
	};
	let content_type = headers
		.get("content-type")
		.map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
		.unwrap_or_else(|| "application/octet-stream".to_string());

	Some(ParsedAttachment {
		filename,
		content_type,
		size: bytes.len() as u64,
		content_base64: Some(base64::engine::general_purpose::STANDARD.encode(&bytes)),
	})
}

fn boundary_param(content_type: &str) -> Option<String> {
	param_value(content_type, "boundary")
}

fn param_value(header: &str, param: &str) -> Option<String> {
	// ASCII-only lowering keeps byte offsets aligned with the original.
	let lower = header.to_ascii_lowercase();
	let needle = format!("{param}=");
	let start = lower.find(&needle)? + needle.len();
	let rest = &header[start..];
	let value = if let Some(quoted) = rest.strip_prefix('"') {
		quoted.split('"').next().unwrap_or("")
	} else {
		rest.split([';', ' ', '\n', '\t']).next().unwrap_or("")
	};
	let value = value.trim();

	if value.is_empty() { None } else { Some(value.to_string()) }
}

/// Minimal HTML-to-text fallback for HTML-only messages.
pub fn strip_html(html: &str) -> String {
	let without_blocks = remove_block(&remove_block(html, "script"), "style");
	let mut out = String::with_capacity(without_blocks.len());
	let mut in_tag = false;

	for ch in without_blocks.chars() {
		match ch {
			'<' => in_tag = true,
			'>' if in_tag => {
				in_tag = false;

				out.push(' ');
			},
			_ if !in_tag => out.push(ch),
			_ => {},
		}
	}

	out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn remove_block(html: &str, tag: &str) -> String {
	let lower = html.to_ascii_lowercase();
	let open = format!("<{tag}");
	let close = format!("</{tag}>");
	let mut out = String::with_capacity(html.len());
	let mut cursor = 0;

	while let Some(start) = lower[cursor..].find(&open) {
		let start = cursor + start;

		out.push_str(&html[cursor..start]);

		match lower[start..].find(&close) {
			Some(end) => cursor = start + end + close.len(),
			None => return out,
		}
	}

	out.push_str(&html[cursor..]);

	out
}

fn truncate_chars(text: &mut String, max_chars: usize) {
	if text.chars().count() <= max_chars {
		return;
	}

	*text = text.chars().take(max_chars).collect();
}

#[cfg(test)]
mod tests {
	use time::macros::datetime;

	use super::*;

	const NOW: OffsetDateTime = datetime!(2026-01-15 12:00:00 UTC);

	fn parse_fixture(raw: &str) -> ParsedEmail {
		parse(raw.as_bytes(), NOW, 50_000).expect("Fixture must parse.")
	}

	#[test]
	fn parses_plain_message() {
		let email = parse_fixture(
			"From: Alice Example <alice@example.com>\n\
			 To: Bob <bob@example.com>, \"Last, First\" <first@example.com>\n\
			 Subject: Weekly report\n\
			 Message-ID: <report-1@example.com>\n\
			 Date: Mon, 12 Jan 2026 10:30:00 +0000\n\
			 \n\
			 Numbers are up.\n",
		);

		assert_eq!(email.message_id, "report-1@example.com");
		assert_eq!(email.from_email, "alice@example.com");
		assert_eq!(email.from_name.as_deref(), Some("Alice Example"));
		assert_eq!(email.subject, "Weekly report");
		assert_eq!(email.body_text.trim(), "Numbers are up.");
		assert_eq!(email.sent_at, datetime!(2026-01-12 10:30:00 UTC));
		// The quoted comma must not split the second recipient.
		assert_eq!(email.to.len(), 2);
		assert_eq!(email.to[1].email, "first@example.com");
		assert_eq!(email.to[1].name.as_deref(), Some("Last, First"));
	}

	#[test]
	fn rejects_message_without_header_break() {
		assert!(parse(b"From: alice@example.com\nno body separator", NOW, 50_000).is_none());
	}

	#[test]
	fn rejects_message_without_sender_address() {
		let raw = "Subject: hello\nTo: bob@example.com\n\nbody\n";

		assert!(parse(raw.as_bytes(), NOW, 50_000).is_none());
	}

	#[test]
	fn synthesizes_a_deterministic_message_id_when_header_is_missing() {
		let first = parse_fixture("From: alice@example.com\n\nbody\n");
		let again = parse_fixture("From: alice@example.com\n\nbody\n");
		let other = parse_fixture("From: alice@example.com\n\ndifferent body\n");

		assert!(first.message_id.starts_with("generated-"));
		assert!(first.message_id.ends_with("@mbox-import"));
		// Re-parsing the same bytes (a redelivery) yields the same id;
		// different content yields a different one.
		assert_eq!(first.message_id, again.message_id);
		assert_ne!(first.message_id, other.message_id);
	}

	#[test]
	fn decodes_rfc2047_subject() {
		let email = parse_fixture(
			"From: alice@example.com\nSubject: =?UTF-8?B?SGVsbG8=?= world\n\nbody\n",
		);

		assert_eq!(email.subject, "Hello world");
	}

	#[test]
	fn missing_subject_gets_placeholder() {
		let email = parse_fixture("From: alice@example.com\n\nbody\n");

		assert_eq!(email.subject, "(No Subject)");
	}

	#[test]
	fn unparseable_date_falls_back_to_now() {
		let email = parse_fixture("From: alice@example.com\nDate: not a date\n\nbody\n");

		assert_eq!(email.sent_at, NOW);
	}

	#[test]
	fn decodes_quoted_printable_body() {
		let email = parse_fixture(
			"From: alice@example.com\nContent-Transfer-Encoding: quoted-printable\n\n\
			 caf=C3=A9 on a long=\n line\n",
		);

		assert_eq!(email.body_text.trim(), "café on a long line");
	}

	#[test]
	fn picks_first_text_plain_part_from_multipart() {
		let email = parse_fixture(
			"From: alice@example.com\n\
			 Content-Type: multipart/alternative; boundary=\"XYZ\"\n\
			 \n\
			 preamble\n\
			 --XYZ\n\
			 Content-Type: text/html\n\
			 \n\
			 <p>rich text</p>\n\
			 --XYZ\n\
			 Content-Type: text/plain; charset=utf-8\n\
			 \n\
			 plain text body\n\
			 --XYZ--\n",
		);

		assert_eq!(email.body_text.trim(), "plain text body");
		assert_eq!(email.body_html.as_deref().map(str::trim), Some("<p>rich text</p>"));
	}

	#[test]
	fn collects_attachments_and_keeps_bodies() {
		let email = parse_fixture(
			"From: alice@example.com\n\
			 Content-Type: multipart/mixed; boundary=\"XYZ\"\n\
			 \n\
			 --XYZ\n\
			 Content-Type: text/plain\n\
			 \n\
			 see attached\n\
			 --XYZ\n\
			 Content-Type: application/pdf\n\
			 Content-Disposition: attachment; filename=\"report.pdf\"\n\
			 Content-Transfer-Encoding: base64\n\
			 \n\
			 aGVsbG8=\n\
			 --XYZ--\n",
		);

		assert_eq!(email.body_text.trim(), "see attached");
		assert_eq!(email.attachments.len(), 1);
		assert_eq!(email.attachments[0].filename, "report.pdf");
		assert_eq!(email.attachments[0].content_type, "application/pdf");
		assert_eq!(email.attachments[0].size, 5);
	}

	#[test]
	fn html_only_message_derives_text() {
		let email = parse_fixture(
			"From: alice@example.com\nContent-Type: text/html\n\n\
			 <html><style>p {}</style><p>Hello <b>there</b></p></html>\n",
		);

		assert_eq!(email.body_text, "Hello there");
		assert!(email.body_html.is_some());
	}

	#[test]
	fn truncates_oversized_bodies() {
		let raw = format!("From: alice@example.com\n\n{}", "x".repeat(60));
		let email = parse(raw.as_bytes(), NOW, 50).expect("Fixture must parse.");

		assert_eq!(email.body_text.chars().count(), 50);
	}

	#[test]
	fn parses_thread_headers() {
		let email = parse_fixture(
			"From: alice@example.com\n\
			 In-Reply-To: <root@example.com>\n\
			 References: <grandparent@example.com> <root@example.com>\n\
			 \n\
			 body\n",
		);

		assert_eq!(email.in_reply_to.as_deref(), Some("root@example.com"));
		assert_eq!(email.references, vec!["grandparent@example.com", "root@example.com"]);
	}

	#[test]
	fn header_unfolding_round_trips_to_canonical_form() {
		let folded = "Subject: a very\n long subject\nFrom: alice@example.com";
		let headers = Headers::parse(folded);

		assert_eq!(headers.get("subject"), Some("a very long subject"));
		assert_eq!(
			headers.canonical(),
			"Subject: a very long subject\nFrom: alice@example.com\n"
		);

		// Canonical output parses back to the same header set.
		let reparsed = Headers::parse(headers.canonical().trim_end());

		assert_eq!(reparsed.canonical(), headers.canonical());
	}

	#[test]
	fn extracts_bare_addresses_without_brackets() {
		assert_eq!(
			extract_email("Alice Example alice@Example.COM and friends"),
			Some("alice@example.com".to_string())
		);
		assert_eq!(extract_email("no address here"), None);
	}
}
