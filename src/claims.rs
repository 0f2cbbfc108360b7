//! Claim sets decoded from identity tokens and user-info responses.
//!
//! A claim key starting with `/` is a JSON pointer (RFC 6901) into the claim tree; any other key
//! is looked up directly at the top level. Lookups are total: missing or malformed paths resolve
//! to `None`.

// crates.io
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const POINTER_PREFIX: char = '/';

/// Read-only view over a decoded claim set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);
impl Claims {
	/// Wrap an already-decoded JSON object.
	pub fn new(claims: Map<String, Value>) -> Self {
		Self(claims)
	}

	/// Build a claim set from an arbitrary JSON value; non-objects yield an empty set.
	pub fn from_value(value: Value) -> Self {
		match value {
			Value::Object(map) => Self(map),
			_ => Self::default(),
		}
	}

	/// Resolve a claim name or JSON pointer. A JSON `null` counts as absent.
	pub fn get(&self, key: &str) -> Option<&Value> {
		let value = if key.starts_with(POINTER_PREFIX) {
			match resolve_pointer(&self.0, key) {
				Ok(value) => value,
				Err(err) => {
					tracing::warn!(claim = key, error = %err, "unable to locate claim");

					None
				},
			}
		} else {
			self.0.get(key)
		};

		value.filter(|value| !value.is_null())
	}

	/// Resolve a claim and project it to a string slice.
	pub fn get_str(&self, key: &str) -> Option<&str> {
		self.get(key).and_then(Value::as_str)
	}

	/// Audiences carried by the `aud` claim, which may be a single string or a list.
	pub fn audiences(&self) -> Vec<String> {
		match self.0.get("aud") {
			Some(Value::String(aud)) => vec![aud.clone()],
			Some(Value::Array(values)) =>
				values.iter().filter_map(Value::as_str).map(str::to_owned).collect(),
			_ => Vec::new(),
		}
	}

	/// Fold in claims from a secondary source; keys already present here win unless `null`.
	pub fn merge_missing(&mut self, other: Claims) {
		for (key, value) in other.0 {
			match self.0.get_mut(&key) {
				Some(existing) if !existing.is_null() => {},
				Some(existing) => *existing = value,
				None => {
					self.0.insert(key, value);
				},
			}
		}
	}

	/// Number of top-level claims.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Whether the claim set is empty.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Borrow the underlying JSON object.
	pub fn as_map(&self) -> &Map<String, Value> {
		&self.0
	}
}
impl From<Map<String, Value>> for Claims {
	fn from(value: Map<String, Value>) -> Self {
		Self(value)
	}
}

/// Reasons a pointer cannot be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
enum PointerError {
	#[error("invalid escape sequence in segment '{0}'")]
	Escape(String),
	#[error("segment '{0}' is not a valid array index")]
	Index(String),
	#[error("cannot descend into a scalar at segment '{0}'")]
	Scalar(String),
}

/// Walk a JSON pointer. `Ok(None)` means a well-formed path with no value behind it.
fn resolve_pointer<'a>(
	root: &'a Map<String, Value>,
	pointer: &str,
) -> Result<Option<&'a Value>, PointerError> {
	let mut segments = pointer.split(POINTER_PREFIX).skip(1);
	let Some(first) = segments.next() else {
		return Ok(None);
	};
	let Some(mut current) = root.get(unescape(first)?.as_str()) else {
		return Ok(None);
	};

	for raw in segments {
		let segment = unescape(raw)?;

		current = match current {
			Value::Object(map) => match map.get(segment.as_str()) {
				Some(next) => next,
				None => return Ok(None),
			},
			Value::Array(items) => match items.get(parse_index(&segment)?) {
				Some(next) => next,
				None => return Ok(None),
			},
			_ => return Err(PointerError::Scalar(segment)),
		};
	}

	Ok(Some(current))
}

fn unescape(segment: &str) -> Result<String, PointerError> {
	let mut out = String::with_capacity(segment.len());
	let mut chars = segment.chars();

	while let Some(c) = chars.next() {
		if c != '~' {
			out.push(c);

			continue;
		}

		match chars.next() {
			Some('0') => out.push('~'),
			Some('1') => out.push('/'),
			_ => return Err(PointerError::Escape(segment.to_owned())),
		}
	}

	Ok(out)
}

fn parse_index(segment: &str) -> Result<usize, PointerError> {
	let well_formed = !segment.is_empty()
		&& segment.bytes().all(|b| b.is_ascii_digit())
		&& (segment == "0" || !segment.starts_with('0'));

	if !well_formed {
		return Err(PointerError::Index(segment.to_owned()));
	}

	segment.parse().map_err(|_| PointerError::Index(segment.to_owned()))
}
