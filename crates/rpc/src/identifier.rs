//! Proxy identifiers shared by both sides of a channel.
//!
//! Services are addressed on the wire by a small numeric [`ProxyId`]. Both
//! sides agree on the mapping from symbolic names to ids by building the same
//! [`IdentifierTable`], the conventional one being
//! [`IdentifierTable::well_known`].

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Wire identifier of a service.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ProxyId(u32);

impl ProxyId {
    /// Create an id from its raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which side of the channel implements a service.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Side {
    /// The UI side.
    Main,
    /// The extension host side.
    Ext,
}

impl Side {
    /// The other side of the channel.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Main => Self::Ext,
            Self::Ext => Self::Main,
        }
    }

    /// Lowercase name used in identifiers and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Ext => "ext",
        }
    }
}

impl Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbolic identity of a service: its wire id, hosting side and name.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ProxyIdentifier {
    id: ProxyId,
    side: Side,
    name: Arc<str>,
}

impl ProxyIdentifier {
    /// Create an identifier outside of any table.
    pub fn new(id: ProxyId, side: Side, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            side,
            name: name.into(),
        }
    }

    /// The wire id.
    #[must_use]
    pub const fn id(&self) -> ProxyId {
        self.id
    }

    /// The side hosting the service.
    #[must_use]
    pub const fn side(&self) -> Side {
        self.side
    }

    /// The service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for ProxyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.side, self.name, self.id)
    }
}

/// Names of the services every host defines, in definition order.
pub mod well_known {
    /// Command registry.
    pub const COMMANDS: &str = "commands";
    /// Status bar entries.
    pub const STATUS_BAR: &str = "status_bar";
    /// Message and input dialogs.
    pub const MESSAGE_DIALOGS: &str = "message_dialogs";
    /// Integrated terminals.
    pub const TERMINALS: &str = "terminals";
    /// Language feature providers.
    pub const LANGUAGES: &str = "languages";
    /// Output channels.
    pub const OUTPUT_CHANNELS: &str = "output_channels";
    /// Open text documents.
    pub const DOCUMENTS: &str = "documents";
    /// Workspace folders and configuration.
    pub const WORKSPACE: &str = "workspace";

    /// Services implemented on the main side.
    pub const MAIN_SERVICES: &[&str] = &[
        COMMANDS,
        STATUS_BAR,
        MESSAGE_DIALOGS,
        TERMINALS,
        LANGUAGES,
        OUTPUT_CHANNELS,
    ];

    /// Services implemented on the extension side.
    pub const EXT_SERVICES: &[&str] = &[COMMANDS, TERMINALS, LANGUAGES, DOCUMENTS, WORKSPACE];
}

/// Maps symbolic service names to wire ids.
///
/// Ids are assigned densely in definition order, so two tables built by the
/// same sequence of `define` calls agree on every id.
#[derive(Clone, Debug, Default)]
pub struct IdentifierTable {
    entries: Vec<ProxyIdentifier>,
    by_name: HashMap<(Side, Arc<str>), ProxyId>,
}

impl IdentifierTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The conventional table: main-side services first, then extension-side ones.
    #[must_use]
    pub fn well_known() -> Self {
        let mut table = Self::new();
        for name in well_known::MAIN_SERVICES {
            table.push(Side::Main, Arc::from(*name));
        }
        for name in well_known::EXT_SERVICES {
            table.push(Side::Ext, Arc::from(*name));
        }
        table
    }

    /// Define a new identifier with the next free id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateIdentifier`] if `name` is already defined for `side`.
    pub fn define(&mut self, side: Side, name: &str) -> Result<ProxyIdentifier> {
        let name: Arc<str> = Arc::from(name);
        if self.by_name.contains_key(&(side, Arc::clone(&name))) {
            return Err(Error::DuplicateIdentifier(format!("{side}.{name}")));
        }
        Ok(self.push(side, name))
    }

    fn push(&mut self, side: Side, name: Arc<str>) -> ProxyIdentifier {
        #[allow(clippy::cast_possible_truncation)]
        let id = ProxyId(self.entries.len() as u32);
        let identifier = ProxyIdentifier {
            id,
            side,
            name: Arc::clone(&name),
        };
        self.by_name.insert((side, name), id);
        self.entries.push(identifier.clone());
        identifier
    }

    /// Look up an identifier by side and name.
    #[must_use]
    pub fn get(&self, side: Side, name: &str) -> Option<&ProxyIdentifier> {
        let id = self.by_name.get(&(side, Arc::from(name)))?;
        self.lookup(*id)
    }

    /// Look up an identifier by wire id.
    #[must_use]
    pub fn lookup(&self, id: ProxyId) -> Option<&ProxyIdentifier> {
        self.entries.get(id.get() as usize)
    }

    /// Number of defined identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over identifiers in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ProxyIdentifier> {
        self.entries.iter()
    }
}
