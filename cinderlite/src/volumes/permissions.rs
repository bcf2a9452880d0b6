//! Ownership and mode of a volume's data directory.
//!
//! Requested at Create, stored as strings in the volume metadata, applied once
//! when the data directory is first created on Mount.

use std::collections::HashMap;

use cinderlite_shared::errors::{CinderliteError, CinderliteResult};

use crate::runtime::constants::{metadata, volume_defaults};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirPermissions {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl Default for DirPermissions {
    fn default() -> Self {
        Self {
            uid: volume_defaults::DEFAULT_UID,
            gid: volume_defaults::DEFAULT_GID,
            mode: volume_defaults::DEFAULT_DIR_MODE,
        }
    }
}

impl DirPermissions {
    /// Validate caller-supplied uid/gid/mode and encode them as metadata.
    ///
    /// Absent or empty values are left out; they decode to defaults on Mount.
    pub fn metadata_from_options(
        uid: Option<&str>,
        gid: Option<&str>,
        mode: Option<&str>,
    ) -> CinderliteResult<HashMap<String, String>> {
        let mut meta = HashMap::new();

        let fields: [(&str, Option<&str>, Parser); 3] = [
            (metadata::UID, uid, parse_id),
            (metadata::GID, gid, parse_id),
            (metadata::MODE, mode, parse_mode),
        ];

        for (key, value, parse) in fields {
            let Some(value) = non_empty(value) else {
                continue;
            };
            parse(value).map_err(|e| {
                CinderliteError::Validation(format!("invalid {} '{}': {}", key, value, e))
            })?;
            meta.insert(key.to_string(), value.to_string());
        }

        Ok(meta)
    }

    /// Decode from volume metadata, falling back to defaults (0, 0, 0750).
    pub fn from_metadata(meta: &HashMap<String, String>) -> CinderliteResult<Self> {
        let defaults = Self::default();
        let read = |key: &str, default: u32, parse: Parser| {
            match non_empty(meta.get(key).map(String::as_str)) {
                None => Ok(default),
                Some(v) => parse(v).map_err(|e| {
                    CinderliteError::Validation(format!("reading {}: {}", key, e))
                }),
            }
        };

        Ok(Self {
            uid: read(metadata::UID, defaults.uid, parse_id)?,
            gid: read(metadata::GID, defaults.gid, parse_id)?,
            mode: read(metadata::MODE, defaults.mode, parse_mode)?,
        })
    }
}

type Parser = fn(&str) -> Result<u32, String>;

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_id(value: &str) -> Result<u32, String> {
    value.parse::<u32>().map_err(|e| e.to_string())
}

/// Modes are octal: "750", "0750" and "0o750" all mean rwxr-x---.
fn parse_mode(value: &str) -> Result<u32, String> {
    let digits = value
        .strip_prefix("0o")
        .or_else(|| value.strip_prefix("0O"))
        .unwrap_or(value);
    let mode = u32::from_str_radix(digits, 8).map_err(|e| e.to_string())?;
    if mode > 0o7777 {
        return Err(format!("mode {:o} out of range", mode));
    }
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_metadata_missing() {
        let perms = DirPermissions::from_metadata(&HashMap::new()).unwrap();
        assert_eq!(perms, DirPermissions { uid: 0, gid: 0, mode: 0o750 });
    }

    #[test]
    fn test_empty_values_fall_back() {
        let perms = DirPermissions::from_metadata(&meta(&[
            (metadata::UID, ""),
            (metadata::MODE, " "),
        ]))
        .unwrap();
        assert_eq!(perms, DirPermissions::default());
    }

    #[test]
    fn test_decode_values() {
        let perms = DirPermissions::from_metadata(&meta(&[
            (metadata::UID, "1000"),
            (metadata::GID, "1001"),
            (metadata::MODE, "0755"),
        ]))
        .unwrap();
        assert_eq!(perms, DirPermissions { uid: 1000, gid: 1001, mode: 0o755 });
    }

    #[test]
    fn test_bad_metadata_is_reported() {
        let err = DirPermissions::from_metadata(&meta(&[(metadata::GID, "staff")])).unwrap_err();
        assert!(err.to_string().contains(metadata::GID));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(parse_mode("750"), Ok(0o750));
        assert_eq!(parse_mode("0o700"), Ok(0o700));
        assert_eq!(parse_mode("2775"), Ok(0o2775));
        assert!(parse_mode("789").is_err());
        assert!(parse_mode("17777").is_err());
    }

    #[test]
    fn test_metadata_from_options() {
        let meta =
            DirPermissions::metadata_from_options(Some("1000"), Some(""), Some("750")).unwrap();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta[metadata::UID], "1000");
        assert_eq!(meta[metadata::MODE], "750");
    }

    #[test]
    fn test_metadata_from_options_rejects_garbage() {
        let err = DirPermissions::metadata_from_options(Some("-1"), None, None).unwrap_err();
        assert!(matches!(err, CinderliteError::Validation(_)));

        let err = DirPermissions::metadata_from_options(None, None, Some("rwx")).unwrap_err();
        assert!(matches!(err, CinderliteError::Validation(_)));
    }
}
