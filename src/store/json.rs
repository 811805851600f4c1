//! JSON-on-disk store backend
//!
//! Each project lives in `<base_dir>/<project_id>.json`. Writes go to a
//! temporary file that is renamed over the document, so a reader never sees
//! a half-written project.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::document::ProjectDocument;
use super::{
    FileEntry, Message, MessageId, NewMessage, Project, ProjectId, ProjectPath, ProjectStore,
    StoreError, TemplateKind,
};

/// Directory-backed project store
pub struct JsonStore {
    /// Base directory for project documents
    base_dir: PathBuf,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// Create a store rooted at `base_dir`, creating the directory if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Document file of a project; `None` for ids that would leave `base_dir`
    fn document_path(&self, id: &ProjectId) -> Option<PathBuf> {
        let raw = id.as_str();
        let plain = !raw.is_empty() && !raw.contains(&['/', '\\', '\0'][..]) && !raw.contains("..");
        plain.then(|| self.base_dir.join(format!("{}.json", raw)))
    }

    async fn load(&self, id: &ProjectId) -> Result<Option<ProjectDocument>, StoreError> {
        let Some(path) = self.document_path(id) else {
            return Ok(None);
        };
        match tokio::fs::read_to_string(path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_required(&self, id: &ProjectId) -> Result<ProjectDocument, StoreError> {
        self.load(id)
            .await?
            .ok_or_else(|| StoreError::ProjectNotFound(id.clone()))
    }

    async fn save(&self, doc: &ProjectDocument) -> Result<(), StoreError> {
        let path = self
            .document_path(&doc.project.id)
            .ok_or_else(|| StoreError::ProjectNotFound(doc.project.id.clone()))?;
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(doc)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn update<T>(
        &self,
        id: &ProjectId,
        f: impl FnOnce(&mut ProjectDocument) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load_required(id).await?;
        let value = f(&mut doc)?;
        self.save(&doc).await?;
        Ok(value)
    }
}

#[async_trait]
impl ProjectStore for JsonStore {
    async fn create_project(&self, owner: &str, title: &str) -> Result<Project, StoreError> {
        let project = Project::new(owner, title);
        let _guard = self.write_lock.lock().await;
        self.save(&ProjectDocument::new(project.clone())).await?;
        Ok(project)
    }

    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>, StoreError> {
        Ok(self.load(id).await?.map(|doc| doc.project))
    }

    async fn list_projects(&self, owner: &str) -> Result<Vec<Project>, StoreError> {
        let mut projects = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let json = tokio::fs::read_to_string(&path).await?;
                match serde_json::from_str::<ProjectDocument>(&json) {
                    Ok(doc) if doc.project.is_owned_by(owner) => projects.push(doc.project),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable project document");
                    }
                }
            }
        }
        projects.sort_by(|a, b| (b.created_at_ms, &b.id).cmp(&(a.created_at_ms, &a.id)));
        Ok(projects)
    }

    async fn delete_project(&self, id: &ProjectId) -> Result<(), StoreError> {
        let path = self
            .document_path(id)
            .ok_or_else(|| StoreError::ProjectNotFound(id.clone()))?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ProjectNotFound(id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_template(&self, id: &ProjectId, template: TemplateKind) -> Result<(), StoreError> {
        self.update(id, |doc| {
            doc.project.template = Some(template);
            Ok(())
        })
        .await
    }

    async fn mark_needs_refresh(&self, id: &ProjectId) -> Result<(), StoreError> {
        self.update(id, |doc| {
            doc.project.needs_refresh = true;
            Ok(())
        })
        .await
    }

    async fn take_needs_refresh(&self, id: &ProjectId) -> Result<bool, StoreError> {
        self.update(id, |doc| Ok(doc.take_refresh())).await
    }

    async fn read_file(&self, id: &ProjectId, path: &ProjectPath) -> Result<Option<String>, StoreError> {
        Ok(self.load_required(id).await?.files.get(path).cloned())
    }

    async fn write_file(&self, id: &ProjectId, path: &ProjectPath, content: &str) -> Result<(), StoreError> {
        self.update(id, |doc| {
            doc.files.insert(path.clone(), content.to_string());
            Ok(())
        })
        .await
    }

    async fn delete_file(&self, id: &ProjectId, path: &ProjectPath) -> Result<bool, StoreError> {
        self.update(id, |doc| Ok(doc.files.remove(path).is_some())).await
    }

    async fn list_files(&self, id: &ProjectId) -> Result<Vec<FileEntry>, StoreError> {
        Ok(self.load_required(id).await?.file_entries())
    }

    async fn append_message(&self, id: &ProjectId, message: NewMessage) -> Result<Message, StoreError> {
        self.update(id, |doc| Ok(doc.append(message))).await
    }

    async fn complete_tool_invocation(
        &self,
        id: &ProjectId,
        message_id: &MessageId,
        result: &str,
    ) -> Result<(), StoreError> {
        self.update(id, |doc| doc.complete(message_id, result)).await
    }

    async fn list_messages(&self, id: &ProjectId) -> Result<Vec<Message>, StoreError> {
        Ok(self.load_required(id).await?.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_project_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = JsonStore::new(dir.path()).unwrap();
            let project = store.create_project("u1", "persisted").await.unwrap();
            store
                .write_file(&project.id, &ProjectPath::new("/package.json").unwrap(), "{}")
                .await
                .unwrap();
            store.set_template(&project.id, TemplateKind::NextJs).await.unwrap();
            project.id
        };

        let store = JsonStore::new(dir.path()).unwrap();
        let project = store.get_project(&id).await.unwrap().unwrap();
        assert_eq!(project.template, Some(TemplateKind::NextJs));
        let files = store.list_files(&id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path.as_str(), "package.json");
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let project = store.create_project("u1", "demo").await.unwrap();
        store
            .append_message(&project.id, NewMessage::user("u1", "hello"))
            .await
            .unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![format!("{}.json", project.id)]);
    }

    #[tokio::test]
    async fn test_delete_project_removes_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let project = store.create_project("u1", "demo").await.unwrap();
        store.delete_project(&project.id).await.unwrap();
        assert!(store.get_project(&project.id).await.unwrap().is_none());
        assert!(matches!(
            store.delete_project(&project.id).await,
            Err(StoreError::ProjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ids_cannot_escape_base_dir() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("store");
        let store = JsonStore::new(&base).unwrap();
        std::fs::write(root.path().join("outside.json"), "{}").unwrap();

        for raw in ["../outside", "..", "a/b", "a\\b", ""] {
            let id = ProjectId::from(raw);
            assert!(store.get_project(&id).await.unwrap().is_none(), "{}", raw);
            assert!(matches!(
                store.delete_project(&id).await,
                Err(StoreError::ProjectNotFound(_))
            ));
        }
        assert!(root.path().join("outside.json").exists());
    }

    #[tokio::test]
    async fn test_list_projects_by_owner() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        store.create_project("alice", "a").await.unwrap();
        store.create_project("bob", "b").await.unwrap();
        let listed = store.list_projects("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "a");
    }
}
