//! bpftool-style object selectors: `id N`, `tag T`, `name N`, `pinned P`,
//! optionally followed by `key XX XX ...`.

use std::path::PathBuf;

use crate::error::InspectError;
use crate::hex::{parse_hex_bytes, parse_hex_string};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgSelector {
    Id(u32),
    Tag(String),
    Name(String),
    Pinned(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapSelector {
    Id(u32),
    Name(String),
    Pinned(PathBuf),
}

fn parse_id(value: &str) -> Result<u32, InspectError> {
    value
        .parse()
        .map_err(|_| InspectError::InvalidId(value.to_string()))
}

/// Splits `keyword value`, rejecting anything left over.
fn keyword_value(args: &[String]) -> Result<(&str, &str), InspectError> {
    match args {
        [keyword, value] => Ok((keyword.as_str(), value.as_str())),
        [keyword] => Err(InspectError::InvalidIdentifier(format!(
            "'{keyword}' requires a value"
        ))),
        [_, _, extra, ..] => Err(InspectError::InvalidIdentifier(format!(
            "unexpected argument '{extra}'"
        ))),
        [] => Err(InspectError::InvalidIdentifier(
            "object identifier required".to_string(),
        )),
    }
}

/// `None` when no selector was given, meaning "all programs".
pub fn parse_prog_selector(args: &[String]) -> Result<Option<ProgSelector>, InspectError> {
    if args.is_empty() {
        return Ok(None);
    }
    let selector = match keyword_value(args)? {
        ("id", v) => ProgSelector::Id(parse_id(v)?),
        ("tag", v) => ProgSelector::Tag(v.to_string()),
        ("name", v) => ProgSelector::Name(v.to_string()),
        ("pinned", v) => ProgSelector::Pinned(PathBuf::from(v)),
        (other, _) => {
            return Err(InspectError::InvalidIdentifier(format!(
                "{other}, use 'id', 'tag', 'name' or 'pinned'"
            )))
        }
    };
    Ok(Some(selector))
}

pub fn parse_map_selector(args: &[String]) -> Result<MapSelector, InspectError> {
    match keyword_value(args)? {
        ("id", v) => Ok(MapSelector::Id(parse_id(v)?)),
        ("name", v) => Ok(MapSelector::Name(v.to_string())),
        ("pinned", v) => Ok(MapSelector::Pinned(PathBuf::from(v))),
        (other, _) => Err(InspectError::InvalidIdentifier(format!(
            "{other}, use 'id', 'name' or 'pinned'"
        ))),
    }
}

/// Splits arguments at the `key` keyword. The second half is `None` when
/// no `key` keyword is present.
pub fn split_key(args: &[String]) -> (&[String], Option<&[String]>) {
    match args.iter().position(|a| a == "key") {
        Some(i) => (&args[..i], Some(&args[i + 1..])),
        None => (args, None),
    }
}

/// Parses the bytes following `key`: either `0a 0b ...` or `hex 0a0b...`.
/// At least one byte is required.
pub fn parse_key(bytes: &[String]) -> Result<Vec<u8>, InspectError> {
    let parsed = match bytes {
        [] => return Err(InspectError::InvalidKey("key data required".to_string())),
        [hex, rest @ ..] if hex == "hex" => parse_hex_string(&rest.concat()),
        _ => parse_hex_bytes(&bytes.join(" ")),
    };
    match parsed {
        Ok(key) if key.is_empty() => Err(InspectError::InvalidKey("key data required".to_string())),
        Ok(key) => Ok(key),
        Err(e) => Err(InspectError::InvalidKey(format!("{e:#}"))),
    }
}
