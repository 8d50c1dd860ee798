use rand::distributions::Alphanumeric;
use rand::Rng as _;

/// The length of generated outlasting-session identifiers.
pub const IDENTIFIER_LEN: usize = 15;

/// Checks whether a byte is a `tchar` (token character).
pub fn is_tchar(b: u8) -> bool {
	b.is_ascii_alphanumeric()
		|| matches!(
			b,
			b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
				| b'`' | b'|' | b'~'
		)
}

/// Checks whether a string is a token.
pub fn is_token(name: &str) -> bool {
	!name.is_empty() && name.bytes().all(is_tchar)
}

/// Checks whether a byte can legally appear in an HTTP header value.
pub fn is_field_vchar(b: u8) -> bool {
	b == b'\t' || (b >= 0x20 && b != 0x7F)
}

/// Checks whether a sequence of bytes is a valid HTTP header value.
pub fn is_field_value(value: &[u8]) -> bool {
	match (value.first(), value.last()) {
		(Some(first), Some(last)) => {
			!matches!(first, b' ' | b'\t')
				&& !matches!(last, b' ' | b'\t')
				&& value.iter().copied().all(is_field_vchar)
		}
		_ => true,
	}
}

/// Checks whether a string is a `request-target`.
///
/// This check is relaxed and does not check the full requirements for path validity.
#[cfg(feature = "net")]
pub fn is_request_target(req: &str) -> bool {
	!req.is_empty() && req.bytes().all(|b| (0x21_u8..=0x7E_u8).contains(&b))
}

/// Generates a random identifier for a new outlasting session.
///
/// The identifier is drawn from the 62 ASCII letters and digits. Uniqueness is probabilistic.
pub fn random_identifier() -> String {
	rand::thread_rng()
		.sample_iter(&Alphanumeric)
		.take(IDENTIFIER_LEN)
		.map(char::from)
		.collect()
}
