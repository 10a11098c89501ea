//! Keys, command arguments and tenant namespacing.
//!
//! A tenant-scoped key is `tenant_id + ":" + key`. The prefix is applied in
//! the key's own representation: text stays text, owned bytes stay owned
//! bytes and a shared byte view stays a view.

use bytes::{BufMut, Bytes, BytesMut};
use shared::{Error, Result};
use std::fmt;

/// Separator between the tenant id and the application key.
pub const NAMESPACE_SEPARATOR: &str = ":";

/// Identifier of a logical tenant sharing the cache server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantId(String);

impl TenantId {
    /// The id is opaque; the only requirement is that it is not empty.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidTenant(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace prefix, separator included.
    pub fn prefix(&self) -> String {
        format!("{}{}", self.0, NAMESPACE_SEPARATOR)
    }

    /// Rewrite `key` into this tenant's namespace, keeping its representation.
    pub fn namespace(&self, key: Key) -> Key {
        match key {
            Key::Text(text) => Key::Text(format!("{}{}", self.prefix(), text)),
            Key::Bytes(raw) => {
                let mut out = self.prefix().into_bytes();
                out.extend_from_slice(&raw);
                Key::Bytes(out)
            }
            Key::View(view) => {
                let prefix = self.prefix();
                let mut out = BytesMut::with_capacity(prefix.len() + view.len());
                out.put_slice(prefix.as_bytes());
                out.put_slice(&view);
                Key::View(out.freeze())
            }
        }
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Text(String),
    Bytes(Vec<u8>),
    /// Shared, zero-copy view of key bytes.
    View(Bytes),
}

impl Key {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Key::Text(text) => text.as_bytes(),
            Key::Bytes(raw) => raw,
            Key::View(view) => view,
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

impl From<&String> for Key {
    fn from(value: &String) -> Self {
        Key::Text(value.clone())
    }
}

impl From<Vec<u8>> for Key {
    fn from(value: Vec<u8>) -> Self {
        Key::Bytes(value)
    }
}

impl From<&[u8]> for Key {
    fn from(value: &[u8]) -> Self {
        Key::Bytes(value.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Key {
    fn from(value: &[u8; N]) -> Self {
        Key::Bytes(value.to_vec())
    }
}

impl From<Bytes> for Key {
    fn from(value: Bytes) -> Self {
        Key::View(value)
    }
}

/// A single command argument as the caller supplied it.
///
/// Only the string-like variants can name a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Text(String),
    Bytes(Vec<u8>),
    View(Bytes),
    Int(i64),
    Float(f64),
}

impl Arg {
    pub fn type_name(&self) -> &'static str {
        match self {
            Arg::Text(_) => "text",
            Arg::Bytes(_) => "bytes",
            Arg::View(_) => "byte view",
            Arg::Int(_) => "integer",
            Arg::Float(_) => "float",
        }
    }

    /// Interpret this argument as a key.
    ///
    /// Numbers are rejected rather than stringified.
    pub fn into_key(self) -> Result<Key> {
        match self {
            Arg::Text(text) => Ok(Key::Text(text)),
            Arg::Bytes(raw) => Ok(Key::Bytes(raw)),
            Arg::View(view) => Ok(Key::View(view)),
            other => Err(Error::UnsupportedKeyType(other.type_name())),
        }
    }

    /// Wire encoding of the argument.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Arg::Text(text) => Bytes::from(text.clone()),
            Arg::Bytes(raw) => Bytes::from(raw.clone()),
            Arg::View(view) => view.clone(),
            Arg::Int(n) => Bytes::from(n.to_string()),
            Arg::Float(x) => Bytes::from(x.to_string()),
        }
    }
}

impl From<Key> for Arg {
    fn from(key: Key) -> Self {
        match key {
            Key::Text(text) => Arg::Text(text),
            Key::Bytes(raw) => Arg::Bytes(raw),
            Key::View(view) => Arg::View(view),
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::Text(value.clone())
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Arg::Bytes(value)
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Arg::Bytes(value.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Arg {
    fn from(value: &[u8; N]) -> Self {
        Arg::Bytes(value.to_vec())
    }
}

impl From<Bytes> for Arg {
    fn from(value: Bytes) -> Self {
        Arg::View(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(value.into())
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Arg::Int(value.into())
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    #[test]
    fn test_empty_tenant_rejected() {
        assert!(matches!(TenantId::new(""), Err(Error::InvalidTenant(_))));
        assert_eq!(tenant("acme").prefix(), "acme:");
    }

    #[test]
    fn test_namespace_keeps_representation() {
        let t = tenant("acme");

        assert_eq!(t.namespace(Key::from("user:1")), Key::Text("acme:user:1".to_string()));
        assert_eq!(
            t.namespace(Key::from(b"user:1".to_vec())),
            Key::Bytes(b"acme:user:1".to_vec())
        );
        assert_eq!(
            t.namespace(Key::from(Bytes::from_static(b"user:1"))),
            Key::View(Bytes::from_static(b"acme:user:1"))
        );
    }

    #[test]
    fn test_namespace_non_utf8_bytes() {
        let key = Key::from(vec![0xff, 0x00, 0xfe]);
        let namespaced = tenant("t").namespace(key);
        assert_eq!(namespaced.as_bytes(), &[b't', b':', 0xff, 0x00, 0xfe]);
    }

    #[test]
    fn test_tenant_is_not_parsed() {
        // Separators inside the id are kept verbatim
        let t = tenant("org:team");
        assert_eq!(t.namespace(Key::from("k")).as_bytes(), b"org:team:k");
    }

    #[test]
    fn test_numbers_are_not_keys() {
        assert!(matches!(
            Arg::from(42i64).into_key(),
            Err(Error::UnsupportedKeyType("integer"))
        ));
        assert!(matches!(
            Arg::from(1.5f64).into_key(),
            Err(Error::UnsupportedKeyType("float"))
        ));
        assert_eq!(Arg::from("k").into_key().unwrap(), Key::Text("k".to_string()));
    }

    #[test]
    fn test_arg_wire_bytes() {
        assert_eq!(Arg::from(-7i64).to_bytes(), Bytes::from("-7"));
        assert_eq!(Arg::from(2.5f64).to_bytes(), Bytes::from("2.5"));
        assert_eq!(Arg::from(&b"raw"[..]).to_bytes(), Bytes::from("raw"));
    }
}
