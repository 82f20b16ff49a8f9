//! Message registry -- discriminator byte to constructor.
//!
//! Built once at startup and only read afterwards. [`Registry::global`] holds
//! the standard table; tests and embedders may build their own.

use std::sync::OnceLock;

use crate::messages::{
    construct, DataDiscardMessage, Message, MessageKind, PathCloseMessage, PathConfirmMessage,
    PathLatencyMessage, PathTransferMessage,
};

/// Builds an empty message ready to consume its fields.
pub type Constructor = fn() -> Message;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("discriminator {discriminator:#04x} already registered for {existing}")]
    Duplicate {
        discriminator: u8,
        existing: MessageKind,
    },
}

#[derive(Clone)]
pub struct Registry {
    table: [Option<(MessageKind, Constructor)>; 256],
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::empty()
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self { table: [None; 256] }
    }

    /// Every kind this build knows about.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for kind in MessageKind::ALL {
            // ALL has distinct discriminators (checked in tests)
            let _ = registry.register(kind, constructor_for(kind));
        }
        registry
    }

    /// The process-wide standard registry, built on first use.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::standard)
    }

    pub fn register(
        &mut self,
        kind: MessageKind,
        constructor: Constructor,
    ) -> Result<(), RegistryError> {
        let slot = &mut self.table[usize::from(kind.discriminator())];
        if let Some((existing, _)) = slot {
            return Err(RegistryError::Duplicate {
                discriminator: kind.discriminator(),
                existing: *existing,
            });
        }
        *slot = Some((kind, constructor));
        Ok(())
    }

    pub fn resolve(&self, discriminator: u8) -> Option<Constructor> {
        self.table[usize::from(discriminator)].map(|(_, constructor)| constructor)
    }

    pub fn kind_of(&self, discriminator: u8) -> Option<MessageKind> {
        self.table[usize::from(discriminator)].map(|(kind, _)| kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = MessageKind> + '_ {
        self.table.iter().flatten().map(|(kind, _)| *kind)
    }
}

fn constructor_for(kind: MessageKind) -> Constructor {
    match kind {
        MessageKind::PathLatency => construct::<PathLatencyMessage>,
        MessageKind::PathConfirm => construct::<PathConfirmMessage>,
        MessageKind::DataDiscard => construct::<DataDiscardMessage>,
        MessageKind::PathTransfer => construct::<PathTransferMessage>,
        MessageKind::PathClose => construct::<PathCloseMessage>,
    }
}
