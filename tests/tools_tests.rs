//! Integration tests for the tool handlers against the in-memory store

mod common;

use std::sync::Arc;

use serde_json::{json, Value};

use codeagent::llm::ToolCall;
use codeagent::sandbox::{LiveSandboxes, SandboxProvider};
use codeagent::store::{Project, ProjectPath, ProjectStore};
use codeagent::tools::{self, BatchSandbox, ToolContext};

use common::*;

async fn call(
    store: &Arc<dyn ProjectStore>,
    project: &Project,
    batch: &mut BatchSandbox,
    name: &str,
    args: Value,
) -> String {
    let call = ToolCall::new("call_0", name, args);
    let mut ctx = ToolContext {
        project_id: &project.id,
        user_id: "alice",
        store: store.as_ref(),
        sandbox: batch,
    };
    tools::dispatch(&mut ctx, &call.function).await
}

fn no_sandbox(project: &Project) -> BatchSandbox {
    BatchSandbox::new(None, LiveSandboxes::new(), project.id.clone())
}

#[tokio::test]
async fn test_leading_slashes_resolve_to_one_file() {
    let store = memory_store();
    let project = seed_project(store.as_ref(), &[]).await;
    let mut batch = no_sandbox(&project);

    for (path, content) in [("/src/App.tsx", "v1"), ("src/App.tsx", "v2"), ("//src/App.tsx", "v3")] {
        let result = call(&store, &project, &mut batch, "write_file", json!({"path": path, "content": content})).await;
        assert_eq!(result, "File saved successfully.");
    }

    let files = store.list_files(&project.id).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path.as_str(), "src/App.tsx");
    assert_eq!(files[0].content, "v3");

    let listed = call(&store, &project, &mut batch, "list_files", json!({})).await;
    assert_eq!(serde_json::from_str::<Vec<String>>(&listed).unwrap(), vec!["src/App.tsx"]);
}

#[tokio::test]
async fn test_read_missing_file() {
    let store = memory_store();
    let project = seed_project(store.as_ref(), &[]).await;
    let mut batch = no_sandbox(&project);

    let result = call(&store, &project, &mut batch, "read_file", json!({"path": "/src/x.ts"})).await;
    assert_eq!(result, "Error: File src/x.ts not found.");
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let store = memory_store();
    let project = seed_project(store.as_ref(), &[("a.txt", "x")]).await;
    let mut batch = no_sandbox(&project);

    for _ in 0..2 {
        let result = call(&store, &project, &mut batch, "delete_file", json!({"path": "a.txt"})).await;
        assert_eq!(result, "File deleted successfully.");
    }
    assert!(store.list_files(&project.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_patch_replaces_first_occurrence_only() {
    let store = memory_store();
    let project = seed_project(store.as_ref(), &[("a.txt", "foo bar foo")]).await;
    let mut batch = no_sandbox(&project);

    let result = call(
        &store,
        &project,
        &mut batch,
        "patch_file",
        json!({"path": "a.txt", "old_content": "foo", "new_content": "baz"}),
    )
    .await;
    assert_eq!(result, "Successfully patched a.txt");

    let path = ProjectPath::new("a.txt").unwrap();
    assert_eq!(
        store.read_file(&project.id, &path).await.unwrap().as_deref(),
        Some("baz bar foo")
    );
}

#[tokio::test]
async fn test_patch_failures_leave_file_untouched() {
    let store = memory_store();
    let project = seed_project(store.as_ref(), &[("a.txt", "hello")]).await;
    let mut batch = no_sandbox(&project);

    let missing_content = call(
        &store,
        &project,
        &mut batch,
        "patch_file",
        json!({"path": "a.txt", "old_content": "Hello", "new_content": "bye"}),
    )
    .await;
    assert_eq!(
        missing_content,
        "Error: Could not find the specified content to replace in a.txt. \
         The content may have already been changed or the match is not exact."
    );

    let missing_file = call(
        &store,
        &project,
        &mut batch,
        "patch_file",
        json!({"path": "b.txt", "old_content": "x", "new_content": "y"}),
    )
    .await;
    assert_eq!(missing_file, "Error: File b.txt not found.");

    let path = ProjectPath::new("a.txt").unwrap();
    assert_eq!(store.read_file(&project.id, &path).await.unwrap().as_deref(), Some("hello"));
    assert!(store
        .read_file(&project.id, &ProjectPath::new("b.txt").unwrap())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_search_files() {
    let store = memory_store();
    let project = seed_project(
        store.as_ref(),
        &[
            ("src/App.tsx", "import React from 'react'\nexport default App"),
            ("src/main.tsx", "import App from './App'"),
            ("README.md", "React app"),
        ],
    )
    .await;
    let mut batch = no_sandbox(&project);

    let empty = call(&store, &project, &mut batch, "search_files", json!({"pattern": ""})).await;
    assert_eq!(empty, "Error: pattern must not be empty.");

    let filtered = call(
        &store,
        &project,
        &mut batch,
        "search_files",
        json!({"pattern": "React", "file_pattern": "*.tsx"}),
    )
    .await;
    assert!(filtered.contains("src/App.tsx"));
    assert!(!filtered.contains("README.md"));

    let nothing = call(&store, &project, &mut batch, "search_files", json!({"pattern": "Vue"})).await;
    assert_eq!(nothing, "No matches found.");
}

#[tokio::test]
async fn test_execute_command_reports_exit_code() {
    let store = memory_store();
    let project = seed_project(store.as_ref(), &[]).await;
    let provider = FakeProvider::new();
    let mut batch = BatchSandbox::new(
        Some(provider.clone() as Arc<dyn SandboxProvider>),
        LiveSandboxes::new(),
        project.id.clone(),
    );

    let result = call(&store, &project, &mut batch, "execute_command", json!({"command": "npm install"})).await;
    let parsed: Value = serde_json::from_str(&result).unwrap();
    assert_eq!(parsed["exit_code"], 0);
    assert_eq!(parsed["stdout"], "added 42 packages\n");
    assert!(batch.is_acquired());

    batch.release().await;
    assert!(!batch.is_acquired());
    assert_eq!(provider.killed(), vec!["sbx-1".to_string()]);
}

#[tokio::test]
async fn test_failed_command_exit_code_is_passed_through() {
    let store = memory_store();
    let project = seed_project(store.as_ref(), &[]).await;
    let provider = FakeProvider::new();
    provider.set_install_exit_code(1);
    let mut batch = BatchSandbox::new(
        Some(provider.clone() as Arc<dyn SandboxProvider>),
        LiveSandboxes::new(),
        project.id.clone(),
    );

    let result = call(&store, &project, &mut batch, "execute_command", json!({"command": "npm install"})).await;
    let parsed: Value = serde_json::from_str(&result).unwrap();
    assert_eq!(parsed["exit_code"], 1);
    assert_eq!(parsed["stderr"], "npm ERR! code ERESOLVE\n");
    batch.release().await;
}
