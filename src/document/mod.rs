pub mod item;
pub mod notebook;
pub mod page;
pub mod section;

pub use item::{Content, ImageContent, ImageState, Item};
pub use notebook::Notebook;
pub use page::Page;
pub use section::Section;

use crate::assets::AssetStore;
use crate::debounce::TimerHandle;
use crate::errors::{AppError, AppResult};
use crate::events::{EntityKind, MutationObserver};
use crate::models::Size;
use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_VIEWPORT: Size = Size::new(1000, 800);
const DEFAULT_PAGE_RESIZE_WINDOW: Duration = Duration::from_millis(500);
const DEFAULT_IMAGE_RESIZE_WINDOW: Duration = Duration::from_millis(50);

/// Shared handles every entity in a binder is built with.
#[derive(Debug, Clone)]
pub struct Context {
    pub observer: MutationObserver,
    pub timers: TimerHandle,
    pub assets: AssetStore,
    pub page_resize_window: Duration,
    pub image_resize_window: Duration,
    pub viewport: Size,
}

impl Context {
    pub fn new(observer: MutationObserver, timers: TimerHandle, assets: AssetStore) -> Self {
        Self {
            observer,
            timers,
            assets,
            page_resize_window: DEFAULT_PAGE_RESIZE_WINDOW,
            image_resize_window: DEFAULT_IMAGE_RESIZE_WINDOW,
            viewport: DEFAULT_VIEWPORT,
        }
    }

    /// No observer and no timers. Debounced work stays pending until flushed.
    pub fn detached(assets: AssetStore) -> Self {
        Self::new(MutationObserver::detached(), TimerHandle::detached(), assets)
    }

    pub fn with_windows(mut self, page_resize: Duration, image_resize: Duration) -> Self {
        self.page_resize_window = page_resize;
        self.image_resize_window = image_resize;
        self
    }
}

pub trait Renameable {
    /// Re-keys a child. On error nothing changes.
    fn try_rename(&mut self, current_id: &str, new_id: &str) -> AppResult<()>;
}

/// One tab of a container: a real child or the trailing "create new" slot.
#[derive(Debug, Clone, Copy)]
pub enum Slot<'a, T> {
    Child(&'a T),
    Placeholder,
}

impl<T> Slot<'_, T> {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder)
    }
}

pub(crate) fn validate_id(kind: EntityKind, id: &str) -> AppResult<()> {
    if id.trim().is_empty() {
        return Err(AppError::InvalidName(format!(
            "A {} name cannot be empty.",
            kind.noun()
        )));
    }
    Ok(())
}

/// Uniqueness check shared by every container.
pub(crate) fn claim_id(ids: &HashSet<String>, kind: EntityKind, id: &str) -> AppResult<()> {
    validate_id(kind, id)?;
    if ids.contains(id) {
        return Err(AppError::NameCollision(format!(
            "Another {} already has the name '{}'.",
            kind.noun(),
            id
        )));
    }
    Ok(())
}

pub(crate) fn rename_in(
    ids: &mut HashSet<String>,
    kind: EntityKind,
    current_id: &str,
    new_id: &str,
) -> AppResult<bool> {
    if !ids.contains(current_id) {
        return Err(AppError::NotFound(format!(
            "no {} named '{}'",
            kind.noun(),
            current_id
        )));
    }
    if current_id == new_id {
        return Ok(false);
    }
    claim_id(ids, kind, new_id)?;
    ids.remove(current_id);
    ids.insert(new_id.to_string());
    Ok(true)
}
