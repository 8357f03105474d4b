use crate::assets::AssetStore;
use crate::document::section::Section;
use crate::document::{claim_id, page::Page, rename_in, validate_id, Context, Renameable, Slot};
use crate::errors::{AppError, AppResult};
use crate::events::{EntityKey, EntityKind, ModelEvent};
use crate::ids::{display_label, next_id, shorten_label, IdScheme};
use crate::models::{NotebookFile, OrderedMap};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const SECTION_PREFIX: &str = "section";
pub const NEW_SECTION_LABEL: &str = "New Section";
pub const DEFAULT_NOTEBOOK_ID: &str = "My Notebook";
pub const NOTEBOOK_FILE_EXTENSION: &str = "fnbook";

static NOTEBOOK_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^notebook-(.+)\.fnbook$").expect("valid notebook file regex"));

/// `notebook-<id>.fnbook`
pub fn notebook_file_name(id: &str) -> String {
    format!("notebook-{id}.{NOTEBOOK_FILE_EXTENSION}")
}

/// The notebook id encoded in a file name, if it is a notebook file.
pub fn notebook_id_from_file_name(file_name: &str) -> Option<&str> {
    NOTEBOOK_FILE_RE
        .captures(file_name)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str())
}

#[derive(Debug)]
pub struct Notebook {
    key: EntityKey,
    id: String,
    ids: HashSet<String>,
    sections: Vec<Section>,
    source: Option<PathBuf>,
    ctx: Context,
}

impl Notebook {
    pub fn new(id: impl Into<String>, ctx: &Context) -> Self {
        Self {
            key: EntityKey::next(),
            id: id.into(),
            ids: HashSet::new(),
            sections: Vec::new(),
            source: None,
            ctx: ctx.clone(),
        }
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.id = id;
    }

    pub fn file_name(&self) -> String {
        notebook_file_name(&self.id)
    }

    /// The file this notebook was last read from or written to.
    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub(crate) fn set_source_path(&mut self, path: PathBuf) {
        self.source = Some(path);
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.id() == id)
    }

    pub fn section_mut(&mut self, id: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|section| section.id() == id)
    }

    pub fn section_at_mut(&mut self, index: usize) -> Option<&mut Section> {
        self.sections.get_mut(index)
    }

    pub fn add_section(&mut self, section: Section) -> AppResult<usize> {
        claim_id(&self.ids, EntityKind::Section, section.id())?;
        self.ids.insert(section.id().to_string());
        self.ctx.observer.notify(ModelEvent::Added {
            kind: EntityKind::Section,
            key: section.key(),
            parent: Some(self.key),
            id: section.id().to_string(),
        });
        self.sections.push(section);
        Ok(self.sections.len() - 1)
    }

    pub fn new_section(&mut self) -> AppResult<usize> {
        let id = next_id(SECTION_PREFIX, IdScheme::Alphabetic, &self.ids)?;
        let section = Section::new(id, &self.ctx);
        self.add_section(section)
    }

    /// The placeholder index (one past the last section) is ignored.
    pub fn remove_section(&mut self, index: usize) -> AppResult<Option<Section>> {
        if index == self.sections.len() {
            return Ok(None);
        }
        if index > self.sections.len() {
            return Err(AppError::NotFound(format!(
                "notebook '{}' has no section at index {}",
                self.id, index
            )));
        }
        let section = self.sections.remove(index);
        self.ids.remove(section.id());
        let deleted = section.release_assets();
        tracing::debug!(
            notebook = self.id.as_str(),
            section = section.id(),
            assets_deleted = deleted,
            "section removed"
        );
        self.ctx.observer.notify(ModelEvent::Removed {
            kind: EntityKind::Section,
            key: section.key(),
            parent: Some(self.key),
            id: section.id().to_string(),
        });
        Ok(Some(section))
    }

    /// Renames from the user-facing label; the stored id is `section-<label>`.
    /// Renaming the placeholder slot is a no-op.
    pub fn rename_section(&mut self, index: usize, label: &str) -> AppResult<()> {
        if index == self.sections.len() {
            return Ok(());
        }
        let Some(current) = self.sections.get(index).map(|section| section.id().to_string()) else {
            return Err(AppError::NotFound(format!(
                "notebook '{}' has no section at index {}",
                self.id, index
            )));
        };
        let label = label.trim();
        validate_id(EntityKind::Section, label)?;
        self.try_rename(&current, &format!("{SECTION_PREFIX}-{label}"))
    }

    pub fn slots(&self) -> Vec<Slot<'_, Section>> {
        self.sections
            .iter()
            .map(Slot::Child)
            .chain(std::iter::once(Slot::Placeholder))
            .collect()
    }

    pub fn activate_slot(&mut self, index: usize) -> AppResult<usize> {
        match index.cmp(&self.sections.len()) {
            std::cmp::Ordering::Less => Ok(index),
            std::cmp::Ordering::Equal => self.new_section(),
            std::cmp::Ordering::Greater => Err(AppError::NotFound(format!(
                "notebook '{}' has no tab at index {}",
                self.id, index
            ))),
        }
    }

    pub fn tab_labels(&self, max_chars: usize) -> Vec<String> {
        self.sections
            .iter()
            .map(|section| shorten_label(display_label(section.id(), SECTION_PREFIX), max_chars))
            .chain(std::iter::once(NEW_SECTION_LABEL.to_string()))
            .collect()
    }

    pub fn find_page_mut(&mut self, key: EntityKey) -> Option<&mut Page> {
        self.sections
            .iter_mut()
            .find_map(|section| section.find_page_mut(key))
    }

    pub fn find_item_page_mut(&mut self, item_key: EntityKey) -> Option<&mut Page> {
        self.sections
            .iter_mut()
            .find_map(|section| section.find_item_page_mut(item_key))
    }

    pub(crate) fn pages_mut(&mut self) -> impl Iterator<Item = &mut Page> {
        self.sections.iter_mut().flat_map(Section::pages_mut)
    }

    pub(crate) fn release_assets(&self) -> usize {
        self.sections.iter().map(Section::release_assets).sum()
    }

    pub fn marshal(&self, assets: &AssetStore) -> AppResult<NotebookFile> {
        let mut sections = OrderedMap::new();
        for section in &self.sections {
            sections.push(section.id(), section.marshal(assets)?);
        }
        Ok(NotebookFile {
            id: self.id.clone(),
            sections,
        })
    }

    pub fn unmarshal(data: &NotebookFile, ctx: &Context) -> AppResult<Self> {
        validate_id(EntityKind::Notebook, &data.id)?;
        let mut notebook = Self::new(data.id.clone(), ctx);
        for (section_id, section_data) in data.sections.iter() {
            claim_id(&notebook.ids, EntityKind::Section, section_id)?;
            let section = Section::unmarshal(section_id, section_data, ctx)?;
            notebook.ids.insert(section_id.to_string());
            notebook.sections.push(section);
        }
        Ok(notebook)
    }

    /// Serializes the notebook and everything under it to one YAML file.
    /// Image assets not yet on disk are written first.
    pub fn save(&self, path: &Path, assets: &AssetStore) -> AppResult<()> {
        let data = self.marshal(assets)?;
        let rendered = serde_yaml::to_string(&data)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| persistence(path, error))?;
        }
        let staging = staging_path(path);
        fs::write(&staging, rendered).map_err(|error| persistence(&staging, error))?;
        fs::rename(&staging, path).map_err(|error| {
            let _ = fs::remove_file(&staging);
            persistence(path, error)
        })?;
        tracing::debug!(notebook = self.id.as_str(), path = %path.to_string_lossy(), "notebook saved");
        Ok(())
    }

    pub fn from_file(path: &Path, ctx: &Context) -> AppResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|error| AppError::Io(format!("{}: {}", path.to_string_lossy(), error)))?;
        let data: NotebookFile = serde_yaml::from_str(&content).map_err(|error| {
            AppError::Persistence(format!("{}: {}", path.to_string_lossy(), error))
        })?;
        let mut notebook = Self::unmarshal(&data, ctx)?;
        notebook.source = Some(path.to_path_buf());
        Ok(notebook)
    }
}

impl Renameable for Notebook {
    fn try_rename(&mut self, current_id: &str, new_id: &str) -> AppResult<()> {
        let index = self
            .sections
            .iter()
            .position(|section| section.id() == current_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no section named '{}' in notebook '{}'",
                    current_id, self.id
                ))
            })?;
        if !rename_in(&mut self.ids, EntityKind::Section, current_id, new_id)? {
            return Ok(());
        }
        self.sections[index].set_id(new_id.to_string());
        self.ctx.observer.notify(ModelEvent::Renamed {
            kind: EntityKind::Section,
            key: self.sections[index].key(),
            parent: Some(self.key),
            from: current_id.to_string(),
            to: new_id.to_string(),
        });
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn persistence(path: &Path, error: std::io::Error) -> AppError {
    AppError::Persistence(format!("{}: {}", path.to_string_lossy(), error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Item;
    use crate::models::Rect;

    fn context() -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().expect("temp dir");
        let ctx = Context::detached(AssetStore::new(dir.path().join("assets")));
        (dir, ctx)
    }

    #[test]
    fn file_names_round_trip_through_the_pattern() {
        assert_eq!(notebook_file_name("N1"), "notebook-N1.fnbook");
        assert_eq!(notebook_id_from_file_name("notebook-My Notebook.fnbook"), Some("My Notebook"));
        assert_eq!(notebook_id_from_file_name("notebook-.fnbook"), None);
        assert_eq!(notebook_id_from_file_name("other.fnbook"), None);
        assert_eq!(notebook_id_from_file_name("notebook-N1.fnbook.tmp"), None);
    }

    #[test]
    fn sections_are_lettered_and_renamed_by_label() {
        let (_dir, ctx) = context();
        let mut notebook = Notebook::new("N1", &ctx);
        notebook.new_section().expect("A");
        notebook.new_section().expect("B");
        assert_eq!(notebook.tab_labels(16), ["A", "B", NEW_SECTION_LABEL]);

        notebook.rename_section(0, "Recipes").expect("rename");
        assert_eq!(notebook.sections()[0].id(), "section-Recipes");
        assert!(matches!(
            notebook.rename_section(1, "Recipes"),
            Err(AppError::NameCollision(_))
        ));
        assert_eq!(notebook.sections()[1].id(), "section-B");
        notebook.rename_section(2, "ignored").expect("placeholder");

        assert_eq!(notebook.activate_slot(2).expect("new"), 2);
        assert_eq!(notebook.sections()[2].id(), "section-A");
        assert_eq!(
            notebook.tab_labels(4),
            ["Recipes", "B", "A", NEW_SECTION_LABEL]
        );
        assert_eq!(notebook.tab_labels(3), ["Rec...", "B", "A", NEW_SECTION_LABEL]);
    }

    #[test]
    fn removing_the_placeholder_is_ignored() {
        let (_dir, ctx) = context();
        let mut notebook = Notebook::new("N1", &ctx);
        notebook.new_section().expect("A");
        assert!(notebook.remove_section(1).expect("placeholder").is_none());
        assert_eq!(notebook.sections().len(), 1);
        let removed = notebook.remove_section(0).expect("remove").expect("section");
        assert_eq!(removed.id(), "section-A");
        assert_eq!(notebook.new_section().expect("reuse"), 0);
        assert_eq!(notebook.sections()[0].id(), "section-A");
    }

    #[test]
    fn save_and_reload_preserves_structure() {
        let (dir, ctx) = context();
        let mut notebook = Notebook::new("N1", &ctx);
        notebook.add_section(Section::new("section-A", &ctx)).expect("section");
        let section = notebook.section_mut("section-A").expect("section");
        section.add_page(Page::new("1", &ctx)).expect("page");
        let page = section.page_mut("1").expect("page");
        page.add_item(Item::new_text("Box1", Rect::new(0, 0, 400, 100), "abc", &ctx))
            .expect("item");
        page.add_item(Item::new_code("Box2", Rect::new(10, 10, 50, 50), "x = 1", &ctx))
            .expect("item");
        page.raise_item(0).expect("raise");

        let path = dir.path().join(notebook.file_name());
        notebook.save(&path, &ctx.assets).expect("save");
        assert!(!staging_path(&path).exists());

        let reloaded = Notebook::from_file(&path, &ctx).expect("reload");
        assert_eq!(reloaded.id(), "N1");
        let page = reloaded.sections()[0].page("1").expect("page");
        let ids: Vec<&str> = page.items().iter().map(Item::id).collect();
        assert_eq!(ids, ["Box2", "Box1"]);
        assert_eq!(page.item("Box1").and_then(Item::text), Some("abc"));
        assert_eq!(
            page.item("Box1").map(Item::geometry),
            Some(Rect::new(0, 0, 400, 100))
        );
        assert_eq!(
            reloaded.marshal(&ctx.assets).expect("marshal"),
            notebook.marshal(&ctx.assets).expect("marshal")
        );
    }

    #[test]
    fn malformed_file_is_a_persistence_error() {
        let (dir, ctx) = context();
        let path = dir.path().join("notebook-bad.fnbook");
        fs::write(&path, "id: [unterminated").expect("write");
        assert!(matches!(
            Notebook::from_file(&path, &ctx),
            Err(AppError::Persistence(_))
        ));

        fs::write(&path, "id: dup\nsections:\n  section-A: {}\n  section-A: {}\n").expect("write");
        assert!(Notebook::from_file(&path, &ctx).is_err());
    }
}
