use crate::error::InspectError;
use crate::inspect::{MapEntry, MapRecord, MapService};
use crate::output::Formatter;
use crate::selector::{parse_key, parse_map_selector, split_key, MapSelector};

/// Resolves a selector to a single map. `name` picks the first match.
fn resolve(service: &dyn MapService, selector: &MapSelector) -> Result<MapRecord, InspectError> {
    match selector {
        MapSelector::Id(id) => service.get_by_id(*id),
        MapSelector::Name(name) => service
            .get_by_name(name)?
            .into_iter()
            .next()
            .ok_or_else(|| InspectError::NotFound(format!("map with name {name}"))),
        MapSelector::Pinned(path) => service.get_by_pinned_path(path),
    }
}

/// `map show [id N | name N | pinned P]`
pub fn show(
    service: &dyn MapService,
    formatter: &dyn Formatter,
    args: &[String],
) -> Result<String, InspectError> {
    let maps = if args.is_empty() {
        service.list()?
    } else {
        match parse_map_selector(args)? {
            MapSelector::Name(name) => service.get_by_name(&name)?,
            selector => vec![resolve(service, &selector)?],
        }
    };
    Ok(formatter.maps(&maps))
}

/// `map dump MAP`
pub fn dump(
    service: &dyn MapService,
    formatter: &dyn Formatter,
    args: &[String],
) -> Result<String, InspectError> {
    let map = resolve(service, &parse_map_selector(args)?)?;
    let entries = service.dump(map.id)?;
    Ok(formatter.map_entries(&entries))
}

/// `map lookup MAP key XX XX ...`
pub fn lookup(
    service: &dyn MapService,
    formatter: &dyn Formatter,
    args: &[String],
) -> Result<String, InspectError> {
    let (selector, key) = split_key(args);
    let selector = parse_map_selector(selector)?;
    let key = parse_key(key.unwrap_or_default())?;
    let map = resolve(service, &selector)?;
    let value = service.lookup(map.id, &key)?;
    Ok(formatter.map_entry(&MapEntry { key, value }))
}

/// `map getnext MAP [key XX XX ...]`
pub fn getnext(
    service: &dyn MapService,
    formatter: &dyn Formatter,
    args: &[String],
) -> Result<String, InspectError> {
    let (selector, key) = split_key(args);
    let selector = parse_map_selector(selector)?;
    // A bare `key` with no bytes asks for the first key, like no key at all.
    let key = match key {
        Some(bytes) if !bytes.is_empty() => Some(parse_key(bytes)?),
        _ => None,
    };
    let map = resolve(service, &selector)?;
    let next = service.get_next_key(map.id, key.as_deref())?;
    Ok(formatter.next_key(key.as_deref(), &next))
}

#[cfg(test)]
mod tests {
    use super::super::mock::{args, MockMaps};
    use super::*;
    use crate::output::json::JsonFormatter;
    use crate::output::plain::PlainFormatter;

    #[test]
    fn show_all_and_by_name() {
        let maps = MockMaps::sample();
        let out = show(&maps, &PlainFormatter, &[]).unwrap();
        assert!(out.starts_with("1: array  name test_map  flags 0x0"));
        assert!(out.contains("\n2: hash  name conns"));

        let out = show(&maps, &PlainFormatter, &args("name conns")).unwrap();
        assert!(out.starts_with("2: hash") && !out.contains("test_map"));

        assert_eq!(show(&maps, &PlainFormatter, &args("name none")).unwrap(), "");
    }

    #[test]
    fn dump_by_id_and_first_name_match() {
        let maps = MockMaps::sample();
        assert_eq!(
            dump(&maps, &PlainFormatter, &args("id 1")).unwrap(),
            "key: 00 00 00 00  value: 05 00 00 00 00 00 00 00\nFound 1 element"
        );
        assert_eq!(
            dump(&maps, &PlainFormatter, &args("name test_map")).unwrap(),
            dump(&maps, &PlainFormatter, &args("id 1")).unwrap()
        );
        assert!(matches!(
            dump(&maps, &PlainFormatter, &args("name none")),
            Err(InspectError::NotFound(_))
        ));
        assert!(matches!(
            dump(&maps, &PlainFormatter, &[]),
            Err(InspectError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn lookup_requires_matching_key() {
        let maps = MockMaps::sample();
        assert_eq!(
            lookup(&maps, &PlainFormatter, &args("id 1 key 00 00 00 00")).unwrap(),
            "key: 00 00 00 00 value: 05 00 00 00 00 00 00 00"
        );
        assert!(matches!(
            lookup(&maps, &PlainFormatter, &args("id 1")),
            Err(InspectError::InvalidKey(_))
        ));
        assert!(matches!(
            lookup(&maps, &PlainFormatter, &args("id 1 key")),
            Err(InspectError::InvalidKey(_))
        ));
        assert!(matches!(
            lookup(&maps, &PlainFormatter, &args("id 1 key 00 00")),
            Err(InspectError::InvalidKey(_))
        ));
        assert!(matches!(
            lookup(&maps, &PlainFormatter, &args("id 2 key 09 00 00 00")),
            Err(InspectError::KeyNotFound)
        ));
    }

    #[test]
    fn getnext_walks_keys() {
        let maps = MockMaps::sample();
        let json = JsonFormatter { pretty: false };
        assert_eq!(
            getnext(&maps, &PlainFormatter, &args("id 2")).unwrap(),
            "next key:\n01 00 00 00"
        );
        assert_eq!(
            getnext(&maps, &PlainFormatter, &args("id 2 key")).unwrap(),
            "next key:\n01 00 00 00"
        );
        assert_eq!(
            getnext(&maps, &json, &args("id 2 key 01 00 00 00")).unwrap(),
            r#"{"key":"AQAAAA==","next_key":"AgAAAA=="}"#
        );
        assert!(matches!(
            getnext(&maps, &PlainFormatter, &args("id 2 key 02 00 00 00")),
            Err(InspectError::NoMoreKeys)
        ));
        assert!(matches!(
            getnext(&maps, &PlainFormatter, &args("id 3")),
            Err(InspectError::MapEmpty)
        ));
    }
}
