//! Forward-payload decoder: turns a POST body into a normalized
//! [`ForwardBatch`], accepting either of the two shapes a BrowserChannel
//! client may send.

use bc_protocol::{ForwardBatch, ForwardItems, ForwardMap};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadData;

#[derive(Deserialize)]
struct JsonBody {
    ofs: u64,
    data: Vec<Value>,
}

/// Decodes a forward-channel POST body. `content_type` is matched loosely:
/// anything starting with `application/json` takes the JSON path, everything
/// else is treated as `application/x-www-form-urlencoded`.
pub fn decode_forward_payload(content_type: &str, body: &[u8]) -> Result<Option<ForwardBatch>, BadData> {
    if content_type.starts_with("application/json") {
        decode_json(body)
    } else {
        decode_form(body)
    }
}

fn decode_json(body: &[u8]) -> Result<Option<ForwardBatch>, BadData> {
    if body.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(body).map_err(|_| BadData)?;
    if value.is_null() {
        return Ok(None);
    }
    let parsed: JsonBody = serde_json::from_value(value).map_err(|_| BadData)?;
    Ok(Some(ForwardBatch {
        offset: parsed.ofs,
        items: ForwardItems::Json(parsed.data),
    }))
}

fn decode_form(body: &[u8]) -> Result<Option<ForwardBatch>, BadData> {
    let pairs: Vec<(String, String)> = form_urlencoded::parse(body)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let count: usize = find_value(&pairs, "count")
        .ok_or(BadData)?
        .parse()
        .map_err(|_| BadData)?;

    if count == 0 {
        return Ok(None);
    }

    let offset: u64 = find_value(&pairs, "ofs")
        .ok_or(BadData)?
        .parse()
        .map_err(|_| BadData)?;

    let mut maps: Vec<ForwardMap> = vec![ForwardMap::new(); count];
    for (key, value) in &pairs {
        let Some((index, field)) = parse_req_key(key) else {
            continue;
        };
        if index >= count {
            continue;
        }
        if field == "type" && value == "_badmap" {
            // The client's own report that it failed to encode this field.
            continue;
        }
        maps[index].insert(field.to_owned(), value.clone());
    }

    Ok(Some(ForwardBatch {
        offset,
        items: ForwardItems::Maps(maps),
    }))
}

fn find_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// Matches `req(\d+)_(.+)`, returning (index, field name).
fn parse_req_key(key: &str) -> Option<(usize, &str)> {
    let rest = key.strip_prefix("req")?;
    let underscore = rest.find('_')?;
    let (digits, field_with_underscore) = rest.split_at(underscore);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let field = &field_with_underscore[1..];
    if field.is_empty() {
        return None;
    }
    let index: usize = digits.parse().ok()?;
    Some((index, field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_null_body_yields_no_data() {
        let result = decode_forward_payload("application/json", b"null").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn json_empty_body_yields_no_data() {
        let result = decode_forward_payload("application/json", b"").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn json_batch_decodes_offset_and_items() {
        let body = br#"{"ofs": 3, "data": [{"a": 1}, "two"]}"#;
        let result = decode_forward_payload("application/json", body).unwrap().unwrap();
        assert_eq!(result.offset, 3);
        match result.items {
            ForwardItems::Json(items) => assert_eq!(items.len(), 2),
            _ => panic!("expected json items"),
        }
    }

    #[test]
    fn json_missing_fields_is_bad_data() {
        let body = br#"{"ofs": 3}"#;
        assert!(decode_forward_payload("application/json", body).is_err());
    }

    #[test]
    fn form_count_zero_yields_no_data() {
        let result = decode_forward_payload(
            "application/x-www-form-urlencoded",
            b"count=0",
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn form_missing_ofs_with_nonzero_count_is_bad_data() {
        let result = decode_forward_payload(
            "application/x-www-form-urlencoded",
            b"count=1&req0_v=hi",
        );
        assert!(result.is_err());
    }

    #[test]
    fn form_batch_builds_dense_map_array() {
        let result = decode_forward_payload(
            "application/x-www-form-urlencoded",
            b"count=2&ofs=0&req0_v=0&req1_v=1",
        )
        .unwrap()
        .unwrap();
        assert_eq!(result.offset, 0);
        match result.items {
            ForwardItems::Maps(maps) => {
                assert_eq!(maps.len(), 2);
                assert_eq!(maps[0].get("v").map(String::as_str), Some("0"));
                assert_eq!(maps[1].get("v").map(String::as_str), Some("1"));
            }
            _ => panic!("expected maps"),
        }
    }

    #[test]
    fn form_drops_self_reported_badmap_field() {
        let result = decode_forward_payload(
            "application/x-www-form-urlencoded",
            b"count=1&ofs=0&req0_type=_badmap&req0_v=5",
        )
        .unwrap()
        .unwrap();
        match result.items {
            ForwardItems::Maps(maps) => {
                assert_eq!(maps.len(), 1);
                assert!(!maps[0].contains_key("type"));
                assert_eq!(maps[0].get("v").map(String::as_str), Some("5"));
            }
            _ => panic!("expected maps"),
        }
    }

    #[test]
    fn form_accepts_url_escaped_field_names() {
        let result = decode_forward_payload(
            "application/x-www-form-urlencoded",
            b"count=1&ofs=0&req0_some%5Ffield=value",
        )
        .unwrap()
        .unwrap();
        match result.items {
            ForwardItems::Maps(maps) => {
                assert_eq!(maps[0].get("some_field").map(String::as_str), Some("value"));
            }
            _ => panic!("expected maps"),
        }
    }

    #[test]
    fn non_integer_ofs_is_bad_data() {
        let result = decode_forward_payload(
            "application/x-www-form-urlencoded",
            b"count=1&ofs=nope&req0_v=0",
        );
        assert!(result.is_err());
    }
}
