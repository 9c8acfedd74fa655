//! Canonical node paths
//!
//! Every (topic, instance) pair has one textual path: `/obj/<name>` for
//! instance 0 and `/obj/<name><n>` for n ≥ 1. Hosts that route path lookups
//! (shell tools, device shims) parse these back into registry queries.

use crate::config::{MAX_INSTANCES, MAX_PATH, PATH_PREFIX};
use crate::error::{Result, SkybusError};

/// Format the canonical path for a (name, instance) pair
pub fn node_path(name: &str, instance: usize) -> Result<String> {
    if name.is_empty() {
        return Err(SkybusError::invalid_argument(
            "name",
            "topic name cannot be empty",
        ));
    }

    if instance >= MAX_INSTANCES {
        return Err(SkybusError::invalid_argument(
            "instance",
            format!("instance {} out of range 0..{}", instance, MAX_INSTANCES),
        ));
    }

    let path = if instance == 0 {
        format!("{}/{}", PATH_PREFIX, name)
    } else {
        format!("{}/{}{}", PATH_PREFIX, name, instance)
    };

    if path.len() > MAX_PATH {
        return Err(SkybusError::invalid_argument(
            "name",
            format!("path {} exceeds {} bytes", path, MAX_PATH),
        ));
    }

    Ok(path)
}

/// Parse a canonical path back into its (name, instance) pair
///
/// The inverse of [`node_path`]: a trailing digit is an instance suffix
/// only if the remaining stem is non-empty. Instance 0 paths carry no
/// suffix, so `/obj/gps0` does not round-trip and is rejected.
pub fn parse_path(path: &str) -> Result<(String, usize)> {
    let stem = path
        .strip_prefix(PATH_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| {
            SkybusError::invalid_argument("path", format!("not under {}: {}", PATH_PREFIX, path))
        })?;

    if stem.is_empty() {
        return Err(SkybusError::invalid_argument("path", "empty topic name"));
    }

    match stem.chars().last() {
        Some(c) if c.is_ascii_digit() => {
            let name = &stem[..stem.len() - 1];
            let instance = c as usize - '0' as usize;

            if name.is_empty() || instance == 0 || instance >= MAX_INSTANCES {
                return Err(SkybusError::invalid_argument(
                    "path",
                    format!("bad instance suffix in {}", path),
                ));
            }

            Ok((name.to_string(), instance))
        }
        _ => Ok((stem.to_string(), 0)),
    }
}
