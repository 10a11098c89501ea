use shared::Result;
use shared_tcp::Frame;

use crate::key::{Arg, Key, TenantId};

/// The operations whose key is rewritten for tenant-scoped clients.
///
/// This list is closed on purpose. A command whose verb is not listed here
/// reaches the server with its arguments untouched, even if one of them
/// happens to be a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyOperation {
    Get,
    Set,
    Delete,
    Exists,
    IncrBy,
    HSet,
    HGet,
    GetSet,
}

impl KeyOperation {
    pub const ALL: [KeyOperation; 8] = [
        KeyOperation::Get,
        KeyOperation::Set,
        KeyOperation::Delete,
        KeyOperation::Exists,
        KeyOperation::IncrBy,
        KeyOperation::HSet,
        KeyOperation::HGet,
        KeyOperation::GetSet,
    ];

    pub fn verb(&self) -> &'static str {
        match self {
            KeyOperation::Get => "GET",
            KeyOperation::Set => "SET",
            KeyOperation::Delete => "DEL",
            KeyOperation::Exists => "EXISTS",
            KeyOperation::IncrBy => "INCRBY",
            KeyOperation::HSet => "HSET",
            KeyOperation::HGet => "HGET",
            KeyOperation::GetSet => "GETSET",
        }
    }

    pub fn from_verb(verb: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.verb().eq_ignore_ascii_case(verb))
    }
}

/// A command to send to the cache server.
///
/// The key may be given either as the first positional argument or through
/// [`Command::with_name`], the named form. A named key is always sent first.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    verb: String,
    name: Option<Arg>,
    args: Vec<Arg>,
}

impl Command {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into().to_ascii_uppercase(),
            name: None,
            args: Vec::new(),
        }
    }

    pub(crate) fn for_key(op: KeyOperation, key: Key) -> Self {
        Self::new(op.verb()).arg(key)
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Pass the key as the named `name` parameter.
    pub fn with_name(mut self, key: impl Into<Arg>) -> Self {
        self.name = Some(key.into());
        self
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Arguments in wire order.
    pub fn args(&self) -> impl Iterator<Item = &Arg> {
        self.name.iter().chain(self.args.iter())
    }

    pub fn key_operation(&self) -> Option<KeyOperation> {
        KeyOperation::from_verb(&self.verb)
    }

    /// Move the key of a key-bearing command into `tenant`'s namespace.
    ///
    /// The named key wins over the first positional argument. Any other
    /// command is returned unchanged. Fails without side effects when the
    /// key is not text or bytes.
    pub fn namespaced(mut self, tenant: &TenantId) -> Result<Command> {
        if self.key_operation().is_none() {
            return Ok(self);
        }

        let slot = match self.name.as_mut() {
            Some(name) => Some(name),
            None => self.args.first_mut(),
        };
        if let Some(slot) = slot {
            let key = std::mem::replace(slot, Arg::Int(0)).into_key()?;
            *slot = tenant.namespace(key).into();
        }
        Ok(self)
    }

    pub fn to_frame(&self) -> Frame {
        Frame::command(
            std::iter::once(bytes::Bytes::from(self.verb.clone()))
                .chain(self.args().map(Arg::to_bytes)),
        )
    }
}
