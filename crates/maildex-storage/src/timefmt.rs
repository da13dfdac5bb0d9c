//! Timestamp text handling.
//!
//! All stored timestamps are RFC 3339 UTC with a fixed-width millisecond
//! field, so that SQL string comparison orders them chronologically.

use time::{
	OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339, macros::format_description,
};

use crate::{Error, Result};

const STORED_FORMAT: &[time::format_description::BorrowedFormatItem<'_>] = format_description!(
	"[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);

pub fn to_text(ts: OffsetDateTime) -> String {
	let utc = ts.to_offset(UtcOffset::UTC);

	utc.format(STORED_FORMAT).unwrap_or_else(|_| String::from("1970-01-01T00:00:00.000Z"))
}

pub fn from_text(text: &str) -> Result<OffsetDateTime> {
	OffsetDateTime::parse(text, &Rfc3339)
		.map_err(|err| Error::InvalidArgument(format!("Invalid timestamp {text:?}: {err}.")))
}

#[cfg(test)]
mod tests {
	use time::macros::datetime;

	use super::*;

	#[test]
	fn formats_fixed_width_utc() {
		let ts = datetime!(2026-01-12 10:30:00.5 +02:00);

		assert_eq!(to_text(ts), "2026-01-12T08:30:00.500Z");
	}

	#[test]
	fn round_trips() {
		let ts = datetime!(2026-01-12 08:30:00.25 UTC);

		assert_eq!(from_text(&to_text(ts)).expect("parse"), ts);
	}

	#[test]
	fn text_ordering_matches_chronology() {
		let earlier = to_text(datetime!(2026-01-12 08:30:00.9 UTC));
		let later = to_text(datetime!(2026-01-12 08:30:01 UTC));

		assert!(earlier < later);
	}
}
