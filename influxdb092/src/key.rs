//! Parsing of series bucket names.
//!
//! A series bucket is named by its series key, the measurement name and
//! tag set joined the way the legacy line protocol serializes them:
//!
//! ```text
//! <measurement>,<tag1>=<value1>,<tag2>=<value2>
//! ```
//!
//! Escaped delimiters inside any component are honored via the token
//! substitution in [`crate::escape`]. Tag values come back fully
//! unescaped; the measurement name and tag keys keep their on-disk
//! escaped form, which is what the legacy reader matched schema entries
//! against.

use crate::escape;
use migrate_types::TagSet;
use snafu::{OptionExt, Snafu};

/// Errors returned when a series key cannot be parsed.
#[derive(Debug, Snafu, PartialEq)]
pub enum Error {
    #[snafu(display("series key is not valid UTF-8"))]
    NotUtf8,

    #[snafu(display("tag segment {:?} has no '='", segment))]
    MissingTagValue { segment: String },
}

/// The measurement and tag set encoded in a series key.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSeriesKey {
    pub measurement: String,
    pub tags: TagSet,
}

/// Splits a raw series key into measurement and tag set.
pub fn parse_series_key(key: &[u8]) -> Result<ParsedSeriesKey, Error> {
    let masked = escape::substitute(key);
    let mut segments = masked.split(|&b| b == b',');

    // split always yields at least one element
    let measurement = segments.next().unwrap_or(&[]);
    let measurement = into_utf8(escape::restore_escaped(measurement))?;

    let mut tags = TagSet::new();
    for segment in segments {
        let eq = segment.iter().position(|&b| b == b'=').with_context(|| {
            MissingTagValueSnafu {
                segment: String::from_utf8_lossy(&escape::restore_escaped(segment)).into_owned(),
            }
        })?;
        let tag_key = into_utf8(escape::restore_escaped(&segment[..eq]))?;
        let tag_value = into_utf8(escape::restore_literal(&segment[eq + 1..]))?;
        tags.insert(tag_key, tag_value);
    }

    Ok(ParsedSeriesKey { measurement, tags })
}

fn into_utf8(bytes: Vec<u8>) -> Result<String, Error> {
    String::from_utf8(bytes).map_err(|_| Error::NotUtf8)
}
