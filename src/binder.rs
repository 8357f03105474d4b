use crate::assets::AssetStore;
use crate::debounce::{TimerFired, TimerKey};
use crate::document::notebook::{notebook_file_name, notebook_id_from_file_name, DEFAULT_NOTEBOOK_ID};
use crate::document::{claim_id, rename_in, validate_id, Context, Notebook, Page, Renameable, Slot};
use crate::errors::{AppError, AppResult};
use crate::events::{EntityKey, EntityKind, ModelEvent};
use crate::ids::{next_id, shorten_label, IdScheme};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const NEW_NOTEBOOK_LABEL: &str = "New Notebook";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<SkippedFile>,
    pub seeded_default: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookSaveFailure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReport {
    pub suppressed: bool,
    pub saved: Vec<String>,
    pub failed: Vec<NotebookSaveFailure>,
    pub finished_at: DateTime<Utc>,
}

impl SaveReport {
    fn suppressed() -> Self {
        Self {
            suppressed: true,
            saved: Vec::new(),
            failed: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Root of the document tree: every notebook file in one workspace directory.
#[derive(Debug)]
pub struct Binder {
    workspace_dir: PathBuf,
    notebooks: Vec<Notebook>,
    ids: HashSet<String>,
    just_loaded: bool,
    ctx: Context,
}

impl Binder {
    pub fn new(workspace_dir: impl Into<PathBuf>, ctx: Context) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            notebooks: Vec::new(),
            ids: HashSet::new(),
            just_loaded: false,
            ctx,
        }
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    pub fn assets(&self) -> &AssetStore {
        &self.ctx.assets
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn just_loaded(&self) -> bool {
        self.just_loaded
    }

    pub fn notebooks(&self) -> &[Notebook] {
        &self.notebooks
    }

    pub fn notebook(&self, id: &str) -> Option<&Notebook> {
        self.notebooks.iter().find(|notebook| notebook.id() == id)
    }

    pub fn notebook_mut(&mut self, id: &str) -> Option<&mut Notebook> {
        self.notebooks.iter_mut().find(|notebook| notebook.id() == id)
    }

    pub fn notebook_at_mut(&mut self, index: usize) -> Option<&mut Notebook> {
        self.notebooks.get_mut(index)
    }

    pub fn notebook_path(&self, id: &str) -> PathBuf {
        self.workspace_dir.join(notebook_file_name(id))
    }

    /// Replaces the in-memory tree with the notebooks found in `dir`.
    /// A file that fails to parse, or whose id is already taken, is skipped.
    pub fn load_workspace(&mut self, dir: &Path) -> AppResult<LoadReport> {
        if !dir.is_dir() {
            return Err(AppError::WorkspaceNotFound(format!(
                "workspace directory {} does not exist",
                dir.to_string_lossy()
            )));
        }
        self.workspace_dir = dir.to_path_buf();
        self.notebooks.clear();
        self.ids.clear();

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(|error| AppError::Io(error.to_string()))? {
            let entry = entry.map_err(|error| AppError::Io(error.to_string()))?;
            let is_notebook = entry
                .file_name()
                .to_str()
                .and_then(notebook_id_from_file_name)
                .is_some();
            if is_notebook {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let mut report = LoadReport {
            loaded: Vec::new(),
            skipped: Vec::new(),
            seeded_default: false,
        };
        for path in paths {
            match self.load_notebook_file(&path) {
                Ok(id) => report.loaded.push(id),
                Err(error) => {
                    tracing::warn!(path = %path.to_string_lossy(), error = %error, "skipping malformed notebook file");
                    report.skipped.push(SkippedFile {
                        path,
                        error: error.to_string(),
                    });
                }
            }
        }

        if self.notebooks.is_empty() {
            let notebook = Notebook::new(DEFAULT_NOTEBOOK_ID, &self.ctx);
            self.ids.insert(notebook.id().to_string());
            self.notebooks.push(notebook);
            report.seeded_default = true;
        }
        self.just_loaded = true;

        tracing::info!(
            workspace = %dir.to_string_lossy(),
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            seeded_default = report.seeded_default,
            "workspace loaded"
        );
        Ok(report)
    }

    fn load_notebook_file(&mut self, path: &Path) -> AppResult<String> {
        let notebook = Notebook::from_file(path, &self.ctx)?;
        validate_notebook_id(notebook.id())?;
        claim_id(&self.ids, EntityKind::Notebook, notebook.id())?;

        let stem_id = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(notebook_id_from_file_name);
        if stem_id != Some(notebook.id()) {
            tracing::warn!(
                path = %path.to_string_lossy(),
                notebook = notebook.id(),
                "notebook id does not match its file name; the file is replaced on the next save"
            );
        }

        let id = notebook.id().to_string();
        self.ids.insert(id.clone());
        self.notebooks.push(notebook);
        Ok(id)
    }

    /// Writes every notebook to `notebook-<id>.fnbook`. The first call after
    /// a load is a no-op. One failing notebook does not stop the others.
    pub fn save(&mut self) -> SaveReport {
        if self.just_loaded {
            self.just_loaded = false;
            tracing::debug!("save suppressed after workspace load");
            return SaveReport::suppressed();
        }

        let mut saved = Vec::new();
        let mut failed = Vec::new();
        for notebook in &mut self.notebooks {
            let path = self.workspace_dir.join(notebook.file_name());
            match notebook.save(&path, &self.ctx.assets) {
                Ok(()) => {
                    if retire_source(notebook, &path) {
                        notebook.set_source_path(path);
                    }
                    saved.push(notebook.id().to_string());
                }
                Err(error) => {
                    tracing::warn!(
                        notebook = notebook.id(),
                        path = %path.to_string_lossy(),
                        error = %error,
                        "failed to save notebook"
                    );
                    failed.push(NotebookSaveFailure {
                        id: notebook.id().to_string(),
                        error: error.to_string(),
                    });
                }
            }
        }
        tracing::info!(saved = saved.len(), failed = failed.len(), "binder saved");
        SaveReport {
            suppressed: false,
            saved,
            failed,
            finished_at: Utc::now(),
        }
    }

    pub fn add_notebook(&mut self, notebook: Notebook) -> AppResult<usize> {
        validate_notebook_id(notebook.id())?;
        claim_id(&self.ids, EntityKind::Notebook, notebook.id())?;
        self.ids.insert(notebook.id().to_string());
        self.ctx.observer.notify(ModelEvent::Added {
            kind: EntityKind::Notebook,
            key: notebook.key(),
            parent: None,
            id: notebook.id().to_string(),
        });
        self.notebooks.push(notebook);
        Ok(self.notebooks.len() - 1)
    }

    pub fn new_notebook(&mut self) -> AppResult<usize> {
        let id = next_id(DEFAULT_NOTEBOOK_ID, IdScheme::Labelled, &self.ids)?;
        let notebook = Notebook::new(id, &self.ctx);
        self.add_notebook(notebook)
    }

    pub fn rename_notebook(&mut self, current_id: &str, new_id: &str) -> AppResult<()> {
        self.try_rename(current_id, new_id)
    }

    /// Drops the notebook, its file and the assets of every image in it.
    pub fn remove_notebook(&mut self, id: &str) -> AppResult<Notebook> {
        let index = self.require_index(id)?;
        let canonical = self.notebook_path(id);
        let mut paths = vec![canonical.clone()];
        if let Some(source) = self.notebooks[index].source_path() {
            if source != canonical {
                paths.insert(0, source.to_path_buf());
            }
        }
        for path in &paths {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => {
                    return Err(AppError::Persistence(format!(
                        "failed to delete {}: {}",
                        path.to_string_lossy(),
                        error
                    )))
                }
            }
        }
        let notebook = self.notebooks.remove(index);
        self.ids.remove(notebook.id());
        let deleted = notebook.release_assets();
        tracing::info!(notebook = id, assets_deleted = deleted, "notebook removed");
        self.ctx.observer.notify(ModelEvent::Removed {
            kind: EntityKind::Notebook,
            key: notebook.key(),
            parent: None,
            id: id.to_string(),
        });
        Ok(notebook)
    }

    pub fn slots(&self) -> Vec<Slot<'_, Notebook>> {
        self.notebooks
            .iter()
            .map(Slot::Child)
            .chain(std::iter::once(Slot::Placeholder))
            .collect()
    }

    pub fn activate_slot(&mut self, index: usize) -> AppResult<usize> {
        match index.cmp(&self.notebooks.len()) {
            std::cmp::Ordering::Less => Ok(index),
            std::cmp::Ordering::Equal => self.new_notebook(),
            std::cmp::Ordering::Greater => Err(AppError::NotFound(format!(
                "binder has no tab at index {index}"
            ))),
        }
    }

    pub fn tab_labels(&self, max_chars: usize) -> Vec<String> {
        self.notebooks
            .iter()
            .map(|notebook| shorten_label(notebook.id(), max_chars))
            .chain(std::iter::once(NEW_NOTEBOOK_LABEL.to_string()))
            .collect()
    }

    pub fn find_page_mut(&mut self, key: EntityKey) -> Option<&mut Page> {
        self.notebooks
            .iter_mut()
            .find_map(|notebook| notebook.find_page_mut(key))
    }

    pub fn find_item_page_mut(&mut self, item_key: EntityKey) -> Option<&mut Page> {
        self.notebooks
            .iter_mut()
            .find_map(|notebook| notebook.find_item_page_mut(item_key))
    }

    /// Delivers a page-extent or image-resize firing to its owner. Returns
    /// false for stale firings and for owners that no longer exist.
    pub fn route_timer(&mut self, fired: &TimerFired) -> bool {
        match fired.key {
            TimerKey::Save => false,
            TimerKey::PageExtent(key) => self
                .find_page_mut(key)
                .is_some_and(|page| page.on_extent_timer(fired)),
            TimerKey::ImageResize(key) => self
                .find_item_page_mut(key)
                .is_some_and(|page| page.on_image_timer(fired)),
        }
    }

    /// Runs pending extent and image-resize work now.
    pub fn flush_pending_layout(&mut self) {
        for notebook in &mut self.notebooks {
            for page in notebook.pages_mut() {
                page.flush_pending();
            }
        }
    }

    fn require_index(&self, id: &str) -> AppResult<usize> {
        self.notebooks
            .iter()
            .position(|notebook| notebook.id() == id)
            .ok_or_else(|| AppError::NotFound(format!("no notebook named '{id}'")))
    }
}

impl Renameable for Binder {
    /// Moves the file on disk first; memory is only re-keyed once that worked.
    fn try_rename(&mut self, current_id: &str, new_id: &str) -> AppResult<()> {
        let index = self.require_index(current_id)?;
        if current_id == new_id {
            return Ok(());
        }
        validate_notebook_id(new_id)?;
        claim_id(&self.ids, EntityKind::Notebook, new_id)?;

        let old_path = self.notebooks[index]
            .source_path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.notebook_path(current_id));
        let new_path = self.notebook_path(new_id);
        if new_path != old_path && new_path.exists() {
            return Err(AppError::NameCollision(format!(
                "A notebook file named '{}' already exists.",
                notebook_file_name(new_id)
            )));
        }
        let moved = new_path != old_path && old_path.exists();
        if moved {
            fs::rename(&old_path, &new_path).map_err(|error| {
                AppError::Persistence(format!(
                    "failed to move {} to {}: {}",
                    old_path.to_string_lossy(),
                    new_path.to_string_lossy(),
                    error
                ))
            })?;
        }

        rename_in(&mut self.ids, EntityKind::Notebook, current_id, new_id)?;
        let notebook = &mut self.notebooks[index];
        notebook.set_id(new_id.to_string());
        if moved {
            notebook.set_source_path(new_path);
        }
        self.ctx.observer.notify(ModelEvent::Renamed {
            kind: EntityKind::Notebook,
            key: notebook.key(),
            parent: None,
            from: current_id.to_string(),
            to: new_id.to_string(),
        });
        Ok(())
    }
}

/// Removes the file a notebook was loaded from once it has been written under
/// its own id. Returns false while that old file is still on disk.
fn retire_source(notebook: &Notebook, saved_to: &Path) -> bool {
    let Some(source) = notebook.source_path() else {
        return true;
    };
    if source == saved_to {
        return true;
    }
    match fs::remove_file(source) {
        Ok(()) => {
            tracing::info!(
                notebook = notebook.id(),
                from = %source.to_string_lossy(),
                to = %saved_to.to_string_lossy(),
                "notebook file replaced by one named after its id"
            );
            true
        }
        Err(error) if error.kind() == ErrorKind::NotFound => true,
        Err(error) => {
            tracing::warn!(
                notebook = notebook.id(),
                path = %source.to_string_lossy(),
                error = %error,
                "failed to remove superseded notebook file"
            );
            false
        }
    }
}

fn validate_notebook_id(id: &str) -> AppResult<()> {
    validate_id(EntityKind::Notebook, id)?;
    if id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(AppError::InvalidName(format!(
            "'{id}' cannot be used as a notebook name."
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Item, Section};
    use crate::fetch::test_support::{data_url, png_bytes};
    use crate::fetch::FileFetcher;
    use crate::models::Rect;

    fn binder() -> (tempfile::TempDir, Binder) {
        let dir = tempfile::tempdir().expect("temp workspace");
        let ctx = Context::detached(AssetStore::new(dir.path().join("assets")));
        let binder = Binder::new(dir.path(), ctx);
        (dir, binder)
    }

    fn write_notebook(dir: &Path, file_name: &str, body: &str) {
        fs::write(dir.join(file_name), body).expect("write notebook file");
    }

    #[test]
    fn missing_workspace_is_fatal() {
        let (dir, mut binder) = binder();
        let error = binder
            .load_workspace(&dir.path().join("nope"))
            .expect_err("missing dir");
        assert!(matches!(error, AppError::WorkspaceNotFound(_)));
        assert!(!error.is_recoverable());
    }

    #[test]
    fn empty_workspace_seeds_default_and_suppresses_first_save() {
        let (dir, mut binder) = binder();
        let report = binder.load_workspace(dir.path()).expect("load");
        assert!(report.seeded_default);
        assert_eq!(binder.notebooks()[0].id(), DEFAULT_NOTEBOOK_ID);

        let first = binder.save();
        assert!(first.suppressed);
        assert!(!dir.path().join("notebook-My Notebook.fnbook").exists());

        let second = binder.save();
        assert!(!second.suppressed);
        assert_eq!(second.saved, [DEFAULT_NOTEBOOK_ID]);
        assert!(dir.path().join("notebook-My Notebook.fnbook").exists());
    }

    #[test]
    fn malformed_and_colliding_files_are_skipped() {
        let (dir, mut binder) = binder();
        write_notebook(dir.path(), "notebook-good.fnbook", "id: good\nsections: {}\n");
        write_notebook(dir.path(), "notebook-broken.fnbook", "id: [oops");
        write_notebook(dir.path(), "notebook-twin.fnbook", "id: good\n");
        write_notebook(dir.path(), "unrelated.fnbook", "id: other\n");

        let report = binder.load_workspace(dir.path()).expect("load");
        assert_eq!(report.loaded, ["good"]);
        assert_eq!(report.skipped.len(), 2);
        assert!(!report.seeded_default);
        assert_eq!(binder.notebooks().len(), 1);
    }

    #[test]
    fn mismatched_file_is_replaced_by_one_named_after_the_id() {
        let (dir, mut binder) = binder();
        write_notebook(dir.path(), "notebook-a.fnbook", "id: z\nsections: {}\n");
        let report = binder.load_workspace(dir.path()).expect("load");
        assert_eq!(report.loaded, ["z"]);
        assert!(binder.save().suppressed);

        binder
            .notebook_mut("z")
            .expect("z")
            .new_section()
            .expect("section");
        let report = binder.save();
        assert_eq!(report.saved, ["z"]);
        assert!(!dir.path().join("notebook-a.fnbook").exists());
        let canonical = binder.notebook_path("z");
        assert_eq!(
            binder.notebook("z").and_then(|notebook| notebook.source_path()),
            Some(canonical.as_path())
        );

        let mut reloaded = Binder::new(dir.path(), binder.context().clone());
        let report = reloaded.load_workspace(dir.path()).expect("reload");
        assert_eq!(report.loaded, ["z"]);
        assert!(report.skipped.is_empty());
        assert_eq!(reloaded.notebook("z").expect("z").sections().len(), 1);
    }

    #[test]
    fn rename_and_remove_act_on_the_file_a_notebook_came_from() {
        let (dir, mut binder) = binder();
        write_notebook(dir.path(), "notebook-a.fnbook", "id: z\nsections: {}\n");
        write_notebook(dir.path(), "notebook-b.fnbook", "id: y\nsections: {}\n");
        binder.load_workspace(dir.path()).expect("load");

        binder.rename_notebook("z", "w").expect("rename");
        assert!(!dir.path().join("notebook-a.fnbook").exists());
        assert!(binder.notebook_path("w").exists());

        binder.remove_notebook("y").expect("remove");
        assert!(!dir.path().join("notebook-b.fnbook").exists());

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .expect("list workspace")
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(".fnbook"))
            .collect();
        names.sort();
        assert_eq!(names, ["notebook-w.fnbook"]);
    }

    #[test]
    fn notebook_events_have_no_parent() {
        let dir = tempfile::tempdir().expect("temp workspace");
        let (observer, mut events) = crate::events::MutationObserver::channel();
        let ctx = Context::new(
            observer,
            crate::debounce::TimerHandle::detached(),
            AssetStore::new(dir.path().join("assets")),
        );
        let mut binder = Binder::new(dir.path(), ctx);
        binder.load_workspace(dir.path()).expect("load");
        let index = binder.new_notebook().expect("notebook");
        let key = binder.notebooks()[index].key();
        let notebook = binder.notebook_at_mut(index).expect("notebook");
        notebook.new_section().expect("section");
        let section_key = notebook.sections()[0].key();

        let added = events.try_recv().expect("notebook added");
        assert_eq!((added.key(), added.parent()), (key, None));
        let section = events.try_recv().expect("section added");
        assert_eq!((section.key(), section.parent()), (section_key, Some(key)));
    }

    #[test]
    fn one_failing_notebook_does_not_block_the_rest() {
        let (dir, mut binder) = binder();
        binder.load_workspace(dir.path()).expect("load");
        binder.save();
        binder.add_notebook(Notebook::new("A", binder.context())).expect("A");
        binder.add_notebook(Notebook::new("B", binder.context())).expect("B");
        fs::create_dir_all(dir.path().join("notebook-B.fnbook")).expect("blocking dir");

        let report = binder.save();
        assert_eq!(report.saved, [DEFAULT_NOTEBOOK_ID, "A"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, "B");
        assert!(report.failed[0].error.starts_with("PERSISTENCE_FAILURE"));
        assert!(!report.is_clean());
    }

    #[test]
    fn rename_moves_the_file_before_rekeying() {
        let (dir, mut binder) = binder();
        binder.load_workspace(dir.path()).expect("load");
        binder.save();
        binder.save();
        assert!(binder.notebook_path(DEFAULT_NOTEBOOK_ID).exists());

        binder.rename_notebook(DEFAULT_NOTEBOOK_ID, "Work").expect("rename");
        assert!(binder.notebook("Work").is_some());
        assert!(!binder.notebook_path(DEFAULT_NOTEBOOK_ID).exists());
        assert!(binder.notebook_path("Work").exists());

        binder.new_notebook().expect("new");
        assert!(matches!(
            binder.rename_notebook(DEFAULT_NOTEBOOK_ID, "Work"),
            Err(AppError::NameCollision(_))
        ));
        assert!(matches!(
            binder.rename_notebook("Work", "a/b"),
            Err(AppError::InvalidName(_))
        ));
        assert!(binder.notebook("Work").is_some());
        assert!(binder.notebook(DEFAULT_NOTEBOOK_ID).is_some());
    }

    #[test]
    fn remove_deletes_file_and_image_assets() {
        let (dir, mut binder) = binder();
        binder.load_workspace(dir.path()).expect("load");
        let ctx = binder.context().clone();
        let fetcher = FileFetcher::new(ctx.assets.clone());

        let notebook = binder.notebook_mut(DEFAULT_NOTEBOOK_ID).expect("notebook");
        notebook.add_section(Section::new("section-A", &ctx)).expect("section");
        let section = notebook.section_mut("section-A").expect("section");
        let index = section.new_page().expect("page");
        let page = section.page_at_mut(index).expect("page");
        page.new_image_item(0, 0, &data_url(&png_bytes(3, 3)), &fetcher)
            .expect("image");
        let asset_name = page.items()[0]
            .image()
            .map(|image| image.asset_name().to_string())
            .expect("image");

        binder.save();
        binder.save();
        assert!(ctx.assets.exists(&asset_name));

        binder.remove_notebook(DEFAULT_NOTEBOOK_ID).expect("remove");
        assert!(!binder.notebook_path(DEFAULT_NOTEBOOK_ID).exists());
        assert!(!ctx.assets.exists(&asset_name));
        assert!(binder.notebooks().is_empty());
    }

    #[test]
    fn timers_route_to_the_owning_page() {
        let (dir, mut binder) = binder();
        binder.load_workspace(dir.path()).expect("load");
        let ctx = binder.context().clone();
        let notebook = binder.notebook_at_mut(0).expect("notebook");
        notebook.new_section().expect("section");
        let section = notebook.section_at_mut(0).expect("section");
        section.new_page().expect("page");
        let page = section.page_at_mut(0).expect("page");
        page.add_item(Item::new_text("Box1", Rect::new(3000, 0, 10, 10), "", &ctx))
            .expect("item");
        page.set_item_geometry("Box1", Rect::new(0, 0, 10, 10)).expect("move");
        let key = TimerKey::PageExtent(page.key());

        assert!(!binder.route_timer(&TimerFired {
            key: TimerKey::PageExtent(EntityKey::next()),
            generation: 1
        }));
        assert!(binder.route_timer(&TimerFired { key, generation: 1 }));
        let page = &binder.notebooks()[0].sections()[0].pages()[0];
        assert_eq!(page.geometry(), ctx.viewport);
    }

    #[test]
    fn binder_tabs_end_with_placeholder() {
        let (dir, mut binder) = binder();
        binder.load_workspace(dir.path()).expect("load");
        assert_eq!(binder.tab_labels(16), [DEFAULT_NOTEBOOK_ID, NEW_NOTEBOOK_LABEL]);
        assert_eq!(binder.activate_slot(1).expect("new"), 1);
        assert_eq!(binder.notebooks()[1].id(), "My Notebook 1");
        assert!(binder.slots()[2].is_placeholder());
    }
}
