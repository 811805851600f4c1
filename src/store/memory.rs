//! In-memory store backend

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::document::ProjectDocument;
use super::{
    FileEntry, Message, MessageId, NewMessage, Project, ProjectId, ProjectPath, ProjectStore,
    StoreError, TemplateKind,
};

/// Store kept entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: RwLock<HashMap<ProjectId, ProjectDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_doc<T>(
        &self,
        id: &ProjectId,
        f: impl FnOnce(&mut ProjectDocument) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut projects = self.projects.write().await;
        let doc = projects
            .get_mut(id)
            .ok_or_else(|| StoreError::ProjectNotFound(id.clone()))?;
        f(doc)
    }

    async fn read_doc<T>(
        &self,
        id: &ProjectId,
        f: impl FnOnce(&ProjectDocument) -> T,
    ) -> Result<T, StoreError> {
        let projects = self.projects.read().await;
        let doc = projects
            .get(id)
            .ok_or_else(|| StoreError::ProjectNotFound(id.clone()))?;
        Ok(f(doc))
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn create_project(&self, owner: &str, title: &str) -> Result<Project, StoreError> {
        let project = Project::new(owner, title);
        self.projects
            .write()
            .await
            .insert(project.id.clone(), ProjectDocument::new(project.clone()));
        Ok(project)
    }

    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.read().await.get(id).map(|d| d.project.clone()))
    }

    async fn list_projects(&self, owner: &str) -> Result<Vec<Project>, StoreError> {
        let projects = self.projects.read().await;
        let mut owned: Vec<Project> = projects
            .values()
            .filter(|d| d.project.is_owned_by(owner))
            .map(|d| d.project.clone())
            .collect();
        owned.sort_by(|a, b| (b.created_at_ms, &b.id).cmp(&(a.created_at_ms, &a.id)));
        Ok(owned)
    }

    async fn delete_project(&self, id: &ProjectId) -> Result<(), StoreError> {
        self.projects
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::ProjectNotFound(id.clone()))
    }

    async fn set_template(&self, id: &ProjectId, template: TemplateKind) -> Result<(), StoreError> {
        self.with_doc(id, |doc| {
            doc.project.template = Some(template);
            Ok(())
        })
        .await
    }

    async fn mark_needs_refresh(&self, id: &ProjectId) -> Result<(), StoreError> {
        self.with_doc(id, |doc| {
            doc.project.needs_refresh = true;
            Ok(())
        })
        .await
    }

    async fn take_needs_refresh(&self, id: &ProjectId) -> Result<bool, StoreError> {
        self.with_doc(id, |doc| Ok(doc.take_refresh())).await
    }

    async fn read_file(&self, id: &ProjectId, path: &ProjectPath) -> Result<Option<String>, StoreError> {
        self.read_doc(id, |doc| doc.files.get(path).cloned()).await
    }

    async fn write_file(&self, id: &ProjectId, path: &ProjectPath, content: &str) -> Result<(), StoreError> {
        self.with_doc(id, |doc| {
            doc.files.insert(path.clone(), content.to_string());
            Ok(())
        })
        .await
    }

    async fn delete_file(&self, id: &ProjectId, path: &ProjectPath) -> Result<bool, StoreError> {
        self.with_doc(id, |doc| Ok(doc.files.remove(path).is_some())).await
    }

    async fn list_files(&self, id: &ProjectId) -> Result<Vec<FileEntry>, StoreError> {
        self.read_doc(id, |doc| doc.file_entries()).await
    }

    async fn append_message(&self, id: &ProjectId, message: NewMessage) -> Result<Message, StoreError> {
        self.with_doc(id, |doc| Ok(doc.append(message))).await
    }

    async fn complete_tool_invocation(
        &self,
        id: &ProjectId,
        message_id: &MessageId,
        result: &str,
    ) -> Result<(), StoreError> {
        self.with_doc(id, |doc| doc.complete(message_id, result)).await
    }

    async fn list_messages(&self, id: &ProjectId) -> Result<Vec<Message>, StoreError> {
        self.read_doc(id, |doc| doc.messages.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InvocationState, Role};

    fn path(raw: &str) -> ProjectPath {
        ProjectPath::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_differently_slashed_paths_share_one_file() {
        let store = MemoryStore::new();
        let project = store.create_project("u1", "demo").await.unwrap();

        store.write_file(&project.id, &path("//src/main.tsx"), "v1").await.unwrap();
        store.write_file(&project.id, &path("src/main.tsx"), "v2").await.unwrap();

        let files = store.list_files(&project.id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path.as_str(), "src/main.tsx");
        assert_eq!(
            store.read_file(&project.id, &path("/src/main.tsx")).await.unwrap().as_deref(),
            Some("v2")
        );
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_noop() {
        let store = MemoryStore::new();
        let project = store.create_project("u1", "demo").await.unwrap();
        assert!(!store.delete_file(&project.id, &path("nope.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_project_cascades() {
        let store = MemoryStore::new();
        let project = store.create_project("u1", "demo").await.unwrap();
        store.write_file(&project.id, &path("a.txt"), "a").await.unwrap();
        store.append_message(&project.id, NewMessage::user("u1", "hi")).await.unwrap();

        store.delete_project(&project.id).await.unwrap();

        assert!(store.get_project(&project.id).await.unwrap().is_none());
        assert!(matches!(
            store.list_files(&project.id).await,
            Err(StoreError::ProjectNotFound(_))
        ));
        assert!(matches!(
            store.list_messages(&project.id).await,
            Err(StoreError::ProjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_flag_take_clears_once() {
        let store = MemoryStore::new();
        let project = store.create_project("u1", "demo").await.unwrap();
        assert!(!store.take_needs_refresh(&project.id).await.unwrap());

        store.mark_needs_refresh(&project.id).await.unwrap();
        store.mark_needs_refresh(&project.id).await.unwrap();
        assert!(store.take_needs_refresh(&project.id).await.unwrap());
        assert!(!store.take_needs_refresh(&project.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_tool_invocation_two_phase() {
        let store = MemoryStore::new();
        let project = store.create_project("u1", "demo").await.unwrap();
        let log = store
            .append_message(
                &project.id,
                NewMessage::tool_log("u1", "list_files", serde_json::json!({})),
            )
            .await
            .unwrap();
        assert_eq!(log.role, Role::SystemLog);

        store.complete_tool_invocation(&project.id, &log.id, "[]").await.unwrap();
        let messages = store.list_messages(&project.id).await.unwrap();
        assert_eq!(
            messages[0].tool.as_ref().unwrap().state,
            InvocationState::Completed { result: "[]".to_string() }
        );

        // completing twice is rejected
        assert!(matches!(
            store.complete_tool_invocation(&project.id, &log.id, "again").await,
            Err(StoreError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn test_messages_keep_creation_order() {
        let store = MemoryStore::new();
        let project = store.create_project("u1", "demo").await.unwrap();
        for text in ["one", "two", "three"] {
            store.append_message(&project.id, NewMessage::user("u1", text)).await.unwrap();
        }
        let contents: Vec<String> = store
            .list_messages(&project.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_list_projects_filters_by_owner() {
        let store = MemoryStore::new();
        store.create_project("alice", "one").await.unwrap();
        store.create_project("alice", "two").await.unwrap();
        store.create_project("bob", "three").await.unwrap();

        let listed = store.list_projects("alice").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|p| p.owner == "alice"));
        assert!(listed[0].created_at_ms >= listed[1].created_at_ms);
    }
}
