// bc-protocol: wire types and constants shared by the BrowserChannel transport.
//
// These are the shapes that cross the HTTP boundary: query parameters, the
// normalized forward-channel batch, and the outgoing array envelope. Nothing
// in here knows about sessions, timers, or sockets -- that lives in `server`.

use serde::Deserialize;
use serde_json::Value;

/// The only wire version this transport understands.
pub const PROTOCOL_VERSION: u32 = 8;

pub const DEFAULT_BASE: &str = "/channel";
pub const DEFAULT_KEEP_ALIVE_INTERVAL_MS: u64 = 20_000;
pub const DEFAULT_SESSION_TIMEOUT_INTERVAL_MS: u64 = 30_000;

/// Cap on the sparse forward-channel reorder buffer. The original
/// implementation notes the memory-DoS risk without fixing it; here we close
/// the session instead of letting the map grow unbounded.
pub const MAX_BUFFERED_OFFSETS: usize = 100;

/// Framing mode selected by the `TYPE` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Length-prefixed JSON over `text/plain`.
    Xhr,
    /// `<script>` injection over an HTML iframe, for browsers without XHR streaming.
    Html,
}

impl Framing {
    pub fn from_type_param(ty: Option<&str>) -> Self {
        match ty {
            Some("html") => Framing::Html,
            _ => Framing::Xhr,
        }
    }
}

/// Query parameters accepted on `/test` and `/bind`, merged into one struct
/// since both endpoints pull from the same namespace. Every field is
/// optional at the wire level; handlers reject the combinations they don't
/// accept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelQuery {
    #[serde(rename = "VER")]
    pub ver: Option<String>,
    #[serde(rename = "MODE")]
    pub mode: Option<String>,
    #[serde(rename = "TYPE")]
    pub r#type: Option<String>,
    #[serde(rename = "DOMAIN")]
    pub domain: Option<String>,
    #[serde(rename = "SID")]
    pub sid: Option<String>,
    #[serde(rename = "RID")]
    pub rid: Option<String>,
    #[serde(rename = "AID")]
    pub aid: Option<String>,
    #[serde(rename = "CVER")]
    pub cver: Option<String>,
    #[serde(rename = "OSID")]
    pub osid: Option<String>,
    #[serde(rename = "OAID")]
    pub oaid: Option<String>,
    #[serde(rename = "CI")]
    pub ci: Option<String>,
    // zx and t are cache-busters / attempt counters; accepted, never read.
    #[serde(rename = "zx")]
    pub zx: Option<String>,
    #[serde(rename = "t")]
    pub t: Option<String>,
}

impl ChannelQuery {
    pub fn is_version_8(&self) -> bool {
        self.ver.as_deref() == Some("8")
    }

    pub fn framing(&self) -> Framing {
        Framing::from_type_param(self.r#type.as_deref())
    }

    pub fn chunked(&self) -> bool {
        self.ci.as_deref() != Some("1")
    }
}

/// A single client -> server message, from a `reqN_key=val` form batch.
pub type ForwardMap = std::collections::BTreeMap<String, String>;

/// The decoded body of a forward-channel POST, normalized away from its two
/// possible wire shapes.
#[derive(Debug, Clone)]
pub struct ForwardBatch {
    pub offset: u64,
    pub items: ForwardItems,
}

#[derive(Debug, Clone)]
pub enum ForwardItems {
    /// Decoded `reqN_key=val` form maps.
    Maps(Vec<ForwardMap>),
    /// Decoded `{ofs, data}` JSON items, passed through as raw JSON values.
    Json(Vec<Value>),
}

impl ForwardItems {
    pub fn len(&self) -> usize {
        match self {
            ForwardItems::Maps(m) => m.len(),
            ForwardItems::Json(j) => j.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The very first array a session's first back channel must carry:
/// `["c", sessionId, hostPrefix, 8]`.
pub fn initial_array(session_id: &str, host_prefix: Option<&str>) -> Value {
    serde_json::json!(["c", session_id, host_prefix, PROTOCOL_VERSION])
}

/// Body of the `/bind` POST response once a session already exists:
/// `[backChannelPresent, lastSentArrayId, outstandingBytes]`.
pub fn post_ack_array(back_channel_present: bool, last_sent_array_id: i64, outstanding_bytes: usize) -> Value {
    serde_json::json!([
        i32::from(back_channel_present),
        last_sent_array_id,
        outstanding_bytes
    ])
}

/// Renders a back-channel batch of `(id, data)` pairs as the wire shape
/// `[[id, data], ...]`.
pub fn array_stream(entries: &[(i64, Value)]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|(id, data)| serde_json::json!([id, data]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_defaults_to_xhr() {
        assert_eq!(Framing::from_type_param(None), Framing::Xhr);
        assert_eq!(Framing::from_type_param(Some("xmlhttp")), Framing::Xhr);
        assert_eq!(Framing::from_type_param(Some("html")), Framing::Html);
    }

    #[test]
    fn initial_array_matches_wire_shape() {
        let v = initial_array("abc123", Some("chan"));
        assert_eq!(v, serde_json::json!(["c", "abc123", "chan", 8]));
    }

    #[test]
    fn initial_array_with_no_host_prefix_is_null() {
        let v = initial_array("abc123", None);
        assert_eq!(v, serde_json::json!(["c", "abc123", null, 8]));
    }

    #[test]
    fn post_ack_array_matches_wire_shape() {
        let v = post_ack_array(true, 5, 120);
        assert_eq!(v, serde_json::json!([1, 5, 120]));
    }

    #[test]
    fn array_stream_renders_id_data_pairs() {
        let v = array_stream(&[(1, serde_json::json!(["noop"])), (2, serde_json::json!({"v": 1}))]);
        assert_eq!(v, serde_json::json!([[1, ["noop"]], [2, {"v": 1}]]));
    }

    #[test]
    fn channel_query_chunked_defaults_true_unless_ci_is_one() {
        let mut q = ChannelQuery {
            ci: Some("1".to_owned()),
            ..Default::default()
        };
        assert!(!q.chunked());
        q.ci = Some("0".to_owned());
        assert!(q.chunked());
        q.ci = None;
        assert!(q.chunked());
    }
}
