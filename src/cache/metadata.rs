//! Cache metadata: the per-entry record persisted by the Cache Database
//! (component A) and consulted by the Cache Strategy (component E).

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

/// An ordered, case-insensitive multimap of response headers, serialized
/// for the metadata database as a flat list of `(name, value)` pairs so
/// repeated header names round-trip exactly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderList(pub Vec<(String, String)>);

impl HeaderList {
    /// Builds a `HeaderList` from an `http::HeaderMap`, preserving order and
    /// every repeated value.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        HeaderList(
            headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        value.to_str().unwrap_or_default().to_string(),
                    )
                })
                .collect(),
        )
    }

    /// Converts back into an `http::HeaderMap`. Entries whose name or value
    /// is no longer a legal header token are skipped rather than failing the
    /// whole conversion, since metadata rows are append-only history and may
    /// predate a stricter header validator.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.0 {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }

    /// Returns the first value for `name`, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value for `name`, case-insensitively, in stored order.
    pub fn get_all<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a str> {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes every header whose name matches `name`, case-insensitively.
    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Inserts `(name, value)`, replacing any existing values for `name`.
    pub fn set(&mut self, name: &str, value: String) {
        self.remove(name);
        self.0.push((name.to_string(), value));
    }

    /// Appends `(name, value)` without removing existing values for `name`.
    pub fn append(&mut self, name: &str, value: String) {
        self.0.push((name.to_string(), value));
    }
}

/// The durable per-entry record for one cached response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// The cache key this record belongs to.
    pub key: String,
    /// The request URL.
    pub url: Url,
    /// The request method. Always `GET`: only GET responses are cached.
    #[serde(with = "method_serde")]
    pub method: Method,
    /// The response status code.
    #[serde(with = "status_serde")]
    pub status: StatusCode,
    /// The response reason phrase, if the transport preserved a
    /// non-canonical one.
    pub reason_phrase: Option<String>,
    /// The response headers, in wire order.
    pub headers: HeaderList,
    /// The response body size in bytes.
    pub response_body_size: u64,
    /// When the request was sent, in epoch seconds.
    pub sent_request_sec: u64,
    /// When the response was received, in epoch seconds.
    pub received_response_sec: u64,
    /// When this entry was first created, in epoch seconds.
    pub created_at_sec: u64,
    /// When this entry was last accessed (`get_metadata`/`get_data`/`get`),
    /// in epoch seconds.
    pub last_accessed_sec: u64,
}

mod method_serde {
    use http::Method;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        m: &Method,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_str(m.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Method, D::Error> {
        let raw = String::deserialize(d)?;
        Method::from_bytes(raw.as_bytes())
            .map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

mod status_serde {
    use http::StatusCode;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        s: &StatusCode,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        ser.serialize_u16(s.as_u16())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<StatusCode, D::Error> {
        let raw = u16::deserialize(d)?;
        StatusCode::from_u16(raw)
            .map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_list_round_trips_repeated_names() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        let list = HeaderList::from_header_map(&headers);
        assert_eq!(list.get_all("Set-Cookie").count(), 2);
        let back = list.to_header_map();
        assert_eq!(back.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn header_list_set_replaces_all_values() {
        let mut list = HeaderList::default();
        list.append("warning", "110 - \"stale\"".into());
        list.append("warning", "113 - \"heuristic\"".into());
        list.set("warning", "199 - \"misc\"".into());
        assert_eq!(list.get_all("warning").count(), 1);
    }
}
