//! Challenge identity: validated slugs and their derived numeric ids
//!
//! The remote service keys challenges by integer. Instead of looking the id up
//! remotely, it is derived from the slug with a folded FNV-1a hash, so the same
//! slug always lands on the same remote record.

use std::fmt;

/// 64-bit FNV-1a offset basis
const FNV64_OFFSET: u64 = 14695981039346656037;

/// 64-bit FNV-1a prime
const FNV64_PRIME: u64 = 1099511628211;

/// Width of the folded hash
const ID_BITS: u32 = 28;

/// Minimum slug length
pub const MIN_SLUG_LEN: usize = 2;

fn fnv1a_64(bytes: &[u8]) -> u64 {
	let mut h = FNV64_OFFSET;
	for byte in bytes {
		h ^= u64::from(*byte);
		h = h.wrapping_mul(FNV64_PRIME);
	}
	h
}

/// Derive the numeric remote id for a slug.
///
/// The 64-bit FNV-1a hash is xor-folded down to 28 bits and offset by 2^28,
/// so every id lies in `[2^28, 2 * 2^28)` and has the same number of decimal
/// digits. 28 bits fit the unsigned half of a signed 32-bit integer; with 500
/// challenges the chance of a collision stays below 1/2000.
pub fn numeric_id(slug: &str) -> u32 {
	let h = fnv1a_64(slug.as_bytes());
	let mask = (1u64 << ID_BITS) - 1;
	let folded = ((h >> ID_BITS) ^ h) & mask;
	(folded + (1u64 << ID_BITS)) as u32
}

/// Check that a string is usable as a slug
pub fn validate_slug(slug: &str) -> Result<(), String> {
	if slug.len() < MIN_SLUG_LEN {
		return Err(format!("must be at least {} characters long", MIN_SLUG_LEN));
	}
	if let Some(c) = slug
		.chars()
		.find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_'))
	{
		return Err(format!(
			"invalid character {:?}; only lowercase alphanumerics, hyphens and underscores are allowed",
			c
		));
	}
	Ok(())
}

/// Stable identity of a challenge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChallengeId {
	slug: String,
	numeric: u32,
}

impl ChallengeId {
	/// Build an identity from a slug, validating it first
	pub fn new(slug: impl Into<String>) -> Result<Self, String> {
		let slug = slug.into();
		validate_slug(&slug)?;
		let numeric = numeric_id(&slug);
		Ok(Self { slug, numeric })
	}

	pub fn slug(&self) -> &str {
		&self.slug
	}

	pub fn numeric(&self) -> u32 {
		self.numeric
	}
}

impl fmt::Display for ChallengeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.slug)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;

	#[test]
	fn test_fnv1a_reference_values() {
		// Published FNV-1a 64 test vectors
		assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
		assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
		assert_eq!(fnv1a_64(b"foobar"), 0x85944171f73967e8);
	}

	#[test]
	fn test_numeric_id_range() {
		for slug in ["web-01", "pwn-02", "ab", "a_very_long_challenge_name_with_underscores"] {
			let id = numeric_id(slug);
			assert!(id >= 1 << 28, "{} -> {}", slug, id);
			assert!(id < 2 << 28, "{} -> {}", slug, id);
		}
	}

	#[test]
	fn test_numeric_id_is_deterministic() {
		assert_eq!(numeric_id("web-01"), numeric_id("web-01"));
		assert_ne!(numeric_id("web-01"), numeric_id("web-02"));
	}

	#[test]
	fn test_numeric_id_folding() {
		let h = fnv1a_64(b"pwn-02");
		let expected = (((h >> 28) ^ h) & 0x0FFF_FFFF) + 0x1000_0000;
		assert_eq!(u64::from(numeric_id("pwn-02")), expected);
	}

	#[test]
	fn test_no_collisions_for_typical_repository() {
		let ids: HashSet<u32> = (0..500).map(|i| numeric_id(&format!("chal-{:03}", i))).collect();
		assert_eq!(ids.len(), 500);
	}

	#[test]
	fn test_validate_slug() {
		assert!(validate_slug("web-01").is_ok());
		assert!(validate_slug("a_b").is_ok());
		assert!(validate_slug("a").is_err());
		assert!(validate_slug("Web").is_err());
		assert!(validate_slug("web 01").is_err());
		assert!(validate_slug("web/01").is_err());
	}

	#[test]
	fn test_challenge_id() {
		let id = ChallengeId::new("web-01").unwrap();
		assert_eq!(id.slug(), "web-01");
		assert_eq!(id.numeric(), numeric_id("web-01"));
		assert_eq!(id.to_string(), "web-01");
		assert!(ChallengeId::new("X").is_err());
	}
}

// vim: ts=4
