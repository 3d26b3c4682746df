//! Topic-filter validation.
//!
//! A filter is a `/`-delimited pattern. `#` matches any number of trailing
//! levels and may only stand alone as the final level; `+` matches exactly
//! one level and may only stand alone within its level.

use crate::error::{MqttError, Result};

#[must_use]
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.contains('\0') {
        return false;
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;

    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != "#" || i != last {
                return false;
            }
        }
        if level.contains('+') && *level != "+" {
            return false;
        }
    }

    true
}

/// # Errors
/// Returns `InvalidTopicFilter` naming the offending filter.
pub fn validate_filter(filter: &str) -> Result<()> {
    if is_valid_filter(filter) {
        Ok(())
    } else {
        Err(MqttError::InvalidTopicFilter(filter.to_string()))
    }
}

/// Validates a subscribe filter list. An empty list is itself invalid.
///
/// # Errors
/// Returns `EmptyTopicList` or the first `InvalidTopicFilter` encountered.
pub fn validate_filters<S: AsRef<str>>(filters: &[S]) -> Result<()> {
    if filters.is_empty() {
        return Err(MqttError::EmptyTopicList);
    }
    for filter in filters {
        validate_filter(filter.as_ref())?;
    }
    Ok(())
}
