//! MBOX boundary detection and chunk splitting.
//!
//! The splitter operates on raw bytes so that a chunk boundary landing inside
//! a multi-byte character (or inside an envelope line) never corrupts state.
//! Messages spanning a split survive as carryover for the next chunk.

/// One complete message segment cut out of a chunk buffer, envelope line
/// already stripped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
	pub raw: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkSplit {
	pub segments: Vec<Segment>,
	pub carryover: Option<Vec<u8>>,
}

/// Splits `buffer` (carryover + chunk bytes) into complete message segments.
///
/// Boundaries are byte offsets where a line starts with the literal `From `
/// and the line remainder contains `@` or ` at `; the remainder test keeps
/// body lines that merely start with "From " from being treated as envelopes.
/// On a non-final chunk the tail from the last boundary onward is returned as
/// carryover instead of a segment.
pub fn split_chunk(buffer: &[u8], is_last: bool) -> ChunkSplit {
	let boundaries = find_boundaries(buffer);

	if boundaries.is_empty() {
		return ChunkSplit {
			segments: Vec::new(),
			carryover: if is_last { None } else { Some(buffer.to_vec()) },
		};
	}

	let mut segments = Vec::new();

	for window in boundaries.windows(2) {
		segments.push(segment_at(buffer, window[0], window[1]));
	}

	let tail_start = boundaries[boundaries.len() - 1];

	if is_last {
		segments.push(segment_at(buffer, tail_start, buffer.len()));

		ChunkSplit { segments, carryover: None }
	} else {
		ChunkSplit { segments, carryover: Some(buffer[tail_start..].to_vec()) }
	}
}

pub fn find_boundaries(buffer: &[u8]) -> Vec<usize> {
	let mut out = Vec::new();
	let mut line_start = 0;

	while line_start < buffer.len() {
		let line_end =
			buffer[line_start..].iter().position(|&b| b == b'\n').map(|i| line_start + i);
		let line = match line_end {
			Some(end) => &buffer[line_start..end],
			None => &buffer[line_start..],
		};

		if is_boundary_line(line) {
			out.push(line_start);
		}

		match line_end {
			Some(end) => line_start = end + 1,
			None => break,
		}
	}

	out
}

fn is_boundary_line(line: &[u8]) -> bool {
	let Some(rest) = line.strip_prefix(b"From ") else {
		return false;
	};

	rest.contains(&b'@') || contains_subslice(rest, b" at ")
}

fn segment_at(buffer: &[u8], start: usize, end: usize) -> Segment {
	let span = &buffer[start..end];
	// Drop the envelope "From " line; the message proper starts after its LF.
	let body_start = span.iter().position(|&b| b == b'\n').map(|i| i + 1).unwrap_or(span.len());

	Segment { raw: span[body_start..].to_vec() }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
	haystack.windows(needle.len()).any(|window| window == needle)
}
