use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static NEXT_ENTITY_KEY: AtomicU64 = AtomicU64::new(1);

/// Stable runtime handle for any entity in the tree. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityKey(u64);

impl EntityKey {
    pub fn next() -> Self {
        Self(NEXT_ENTITY_KEY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Notebook,
    Section,
    Page,
    Item,
}

impl EntityKind {
    pub fn noun(self) -> &'static str {
        match self {
            Self::Notebook => "notebook",
            Self::Section => "section",
            Self::Page => "page",
            Self::Item => "item",
        }
    }
}

/// `key` is the entity's runtime handle and `parent` the handle of the
/// container it lives in. Notebooks sit directly in the binder and have no
/// parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ModelEvent {
    Added {
        kind: EntityKind,
        key: EntityKey,
        parent: Option<EntityKey>,
        id: String,
    },
    Removed {
        kind: EntityKind,
        key: EntityKey,
        parent: Option<EntityKey>,
        id: String,
    },
    Renamed {
        kind: EntityKind,
        key: EntityKey,
        parent: Option<EntityKey>,
        from: String,
        to: String,
    },
    Raised {
        page: EntityKey,
        key: EntityKey,
        id: String,
        z_index: usize,
    },
    Lowered {
        page: EntityKey,
        key: EntityKey,
        id: String,
        z_index: usize,
    },
    Modified {
        kind: EntityKind,
        key: EntityKey,
        parent: Option<EntityKey>,
        id: String,
    },
}

impl ModelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Removed { .. } => "removed",
            Self::Renamed { .. } => "renamed",
            Self::Raised { .. } => "raised",
            Self::Lowered { .. } => "lowered",
            Self::Modified { .. } => "modified",
        }
    }

    pub fn key(&self) -> EntityKey {
        match self {
            Self::Added { key, .. }
            | Self::Removed { key, .. }
            | Self::Renamed { key, .. }
            | Self::Raised { key, .. }
            | Self::Lowered { key, .. }
            | Self::Modified { key, .. } => *key,
        }
    }

    pub fn parent(&self) -> Option<EntityKey> {
        match self {
            Self::Added { parent, .. }
            | Self::Removed { parent, .. }
            | Self::Renamed { parent, .. }
            | Self::Modified { parent, .. } => *parent,
            Self::Raised { page, .. } | Self::Lowered { page, .. } => Some(*page),
        }
    }
}

/// Handle every entity holds to report its mutations.
///
/// The receiving end lives in the application loop, which forwards events to
/// presentation subscribers and restarts the save coordinator.
#[derive(Debug, Clone, Default)]
pub struct MutationObserver {
    sender: Option<mpsc::UnboundedSender<ModelEvent>>,
}

impl MutationObserver {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ModelEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn detached() -> Self {
        Self::default()
    }

    pub fn notify(&self, event: ModelEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(event).is_err() {
            tracing::trace!("model event dropped; application loop is gone");
        }
    }
}
