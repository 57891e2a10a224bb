//! Canonical permission bitset
//!
//! Snapshots and platform payloads encode permissions as an integer, a
//! decimal string, or an array of flag names depending on where they were
//! captured. `Permissions` accepts all three on deserialize and always
//! serializes back as a decimal string, so the rest of the crate only ever
//! sees one fixed-width representation.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Fixed-width permission bitset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Permissions(u64);

impl Permissions {
    pub const CREATE_INSTANT_INVITE: Self = Self(1 << 0);
    pub const KICK_MEMBERS: Self = Self(1 << 1);
    pub const BAN_MEMBERS: Self = Self(1 << 2);
    pub const ADMINISTRATOR: Self = Self(1 << 3);
    pub const MANAGE_CHANNELS: Self = Self(1 << 4);
    pub const MANAGE_SPACE: Self = Self(1 << 5);
    pub const ADD_REACTIONS: Self = Self(1 << 6);
    pub const VIEW_AUDIT_LOG: Self = Self(1 << 7);
    pub const VIEW_CHANNEL: Self = Self(1 << 10);
    pub const SEND_MESSAGES: Self = Self(1 << 11);
    pub const MANAGE_MESSAGES: Self = Self(1 << 13);
    pub const MENTION_EVERYONE: Self = Self(1 << 17);
    pub const CONNECT: Self = Self(1 << 20);
    pub const SPEAK: Self = Self(1 << 21);
    pub const CHANGE_NICKNAME: Self = Self(1 << 26);
    pub const MANAGE_NICKNAMES: Self = Self(1 << 27);
    pub const MANAGE_ROLES: Self = Self(1 << 28);
    pub const MANAGE_WEBHOOKS: Self = Self(1 << 29);
    pub const MANAGE_EXPRESSIONS: Self = Self(1 << 30);
    pub const CREATE_PUBLIC_THREADS: Self = Self(1 << 35);
    pub const SEND_MESSAGES_IN_THREADS: Self = Self(1 << 38);
    pub const MODERATE_MEMBERS: Self = Self(1 << 40);

    const NAMED: &'static [(&'static str, Permissions)] = &[
        ("CREATE_INSTANT_INVITE", Self::CREATE_INSTANT_INVITE),
        ("KICK_MEMBERS", Self::KICK_MEMBERS),
        ("BAN_MEMBERS", Self::BAN_MEMBERS),
        ("ADMINISTRATOR", Self::ADMINISTRATOR),
        ("MANAGE_CHANNELS", Self::MANAGE_CHANNELS),
        ("MANAGE_SPACE", Self::MANAGE_SPACE),
        ("ADD_REACTIONS", Self::ADD_REACTIONS),
        ("VIEW_AUDIT_LOG", Self::VIEW_AUDIT_LOG),
        ("VIEW_CHANNEL", Self::VIEW_CHANNEL),
        ("SEND_MESSAGES", Self::SEND_MESSAGES),
        ("MANAGE_MESSAGES", Self::MANAGE_MESSAGES),
        ("MENTION_EVERYONE", Self::MENTION_EVERYONE),
        ("CONNECT", Self::CONNECT),
        ("SPEAK", Self::SPEAK),
        ("CHANGE_NICKNAME", Self::CHANGE_NICKNAME),
        ("MANAGE_NICKNAMES", Self::MANAGE_NICKNAMES),
        ("MANAGE_ROLES", Self::MANAGE_ROLES),
        ("MANAGE_WEBHOOKS", Self::MANAGE_WEBHOOKS),
        ("MANAGE_EXPRESSIONS", Self::MANAGE_EXPRESSIONS),
        ("CREATE_PUBLIC_THREADS", Self::CREATE_PUBLIC_THREADS),
        ("SEND_MESSAGES_IN_THREADS", Self::SEND_MESSAGES_IN_THREADS),
        ("MODERATE_MEMBERS", Self::MODERATE_MEMBERS),
    ];

    /// Permissions the lockdown action strips from the everyone-role
    pub const LOCKDOWN_STRIPPED: Self = Self(
        Self::SEND_MESSAGES.0
            | Self::ADD_REACTIONS.0
            | Self::SEND_MESSAGES_IN_THREADS.0
            | Self::CREATE_PUBLIC_THREADS.0,
    );

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Look up a single flag by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMED
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, p)| *p)
    }

    /// Build a bitset from flag names; unknown names are rejected
    pub fn from_names<I, S>(names: I) -> std::result::Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(Self::empty(), |acc, name| {
            Self::from_name(name.as_ref())
                .map(|p| acc.union(p))
                .ok_or_else(|| format!("unknown permission '{}'", name.as_ref()))
        })
    }

    /// Names of every known flag set in this bitset
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(_, p)| self.contains(*p))
            .map(|(n, _)| *n)
            .collect()
    }

    /// Flags present in `self` but not in `before`
    pub fn gained_since(self, before: Self) -> Self {
        self.difference(before)
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPermissions {
    Bits(u64),
    Decimal(String),
    Names(Vec<String>),
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match RawPermissions::deserialize(deserializer)? {
            RawPermissions::Bits(bits) => Ok(Self(bits)),
            RawPermissions::Decimal(s) => s
                .trim()
                .parse::<u64>()
                .map(Self)
                .map_err(|e| de::Error::custom(format!("invalid permission bits '{}': {}", s, e))),
            RawPermissions::Names(names) => Self::from_names(&names).map_err(de::Error::custom),
        }
    }
}
