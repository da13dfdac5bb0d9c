//! RFC 2047 encoded-word and transfer-encoding decoding.

use base64::Engine;

/// Decodes `=?charset?B/Q?text?=` tokens in a header value, leaving the
/// surrounding text untouched. Tokens that fail to decode are kept verbatim.
pub(crate) fn decode_encoded_words(value: &str) -> String {
	let mut out = String::with_capacity(value.len());
	let mut rest = value;

	while let Some(start) = rest.find("=?") {
		let Some((token, after)) = parse_encoded_word(&rest[start..]) else {
			out.push_str(&rest[..start + 2]);
			rest = &rest[start + 2..];

			continue;
		};

		out.push_str(&rest[..start]);
		out.push_str(&token);

		rest = after;
	}

	out.push_str(rest);

	out
}

/// Returns the decoded token text and the remainder after `?=` on success.
fn parse_encoded_word(input: &str) -> Option<(String, &str)> {
	let body = input.strip_prefix("=?")?;
	let charset_end = body.find('?')?;
	let after_charset = &body[charset_end + 1..];
	let encoding = after_charset.chars().next()?;
	let after_encoding = after_charset.get(1..)?.strip_prefix('?')?;
	let text_end = after_encoding.find("?=")?;
	let text = &after_encoding[..text_end];
	let rest = &after_encoding[text_end + 2..];
	let decoded = match encoding {
		'B' | 'b' => {
			let bytes = decode_base64_forgiving(text)?;

			String::from_utf8_lossy(&bytes).into_owned()
		},
		'Q' | 'q' => decode_quoted_printable(text, true),
		_ => return None,
	};

	Some((decoded, rest))
}

/// Quoted-printable decoding. In header mode (`RFC 2047` Q encoding) `_`
/// decodes to a space; in body mode soft line breaks (`=` before a line end)
/// are removed.
pub(crate) fn decode_quoted_printable(input: &str, header_mode: bool) -> String {
	let bytes = input.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;

	while i < bytes.len() {
		match bytes[i] {
			b'=' => {
				if !header_mode && bytes.get(i + 1) == Some(&b'\n') {
					i += 2;
				} else if !header_mode
					&& bytes.get(i + 1) == Some(&b'\r')
					&& bytes.get(i + 2) == Some(&b'\n')
				{
					i += 3;
				} else if let (Some(hi), Some(lo)) =
					(bytes.get(i + 1).and_then(hex), bytes.get(i + 2).and_then(hex))
				{
					out.push(hi << 4 | lo);

					i += 3;
				} else {
					out.push(b'=');

					i += 1;
				}
			},
			b'_' if header_mode => {
				out.push(b' ');

				i += 1;
			},
			byte => {
				out.push(byte);

				i += 1;
			},
		}
	}

	String::from_utf8_lossy(&out).into_owned()
}

/// Base64 decoding tolerating embedded whitespace and missing padding.
pub(crate) fn decode_base64_forgiving(input: &str) -> Option<Vec<u8>> {
	let compact: String = input.chars().filter(|ch| !ch.is_whitespace()).collect();
	let trimmed = compact.trim_end_matches('=');

	base64::engine::general_purpose::STANDARD_NO_PAD.decode(trimmed).ok()
}

fn hex(byte: &u8) -> Option<u8> {
	(*byte as char).to_digit(16).map(|digit| digit as u8)
}
