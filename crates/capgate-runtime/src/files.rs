//! A small in-memory file store driven through the capability gate.
//!
//! Used by the interactive shell and as the reference reactor in tests:
//! reading `/x` needs `read("/x")`, writing needs `write("/x")` and deleting
//! needs `delete("/x")`, so under [`file_algebra`][capgate_kernel::file_algebra]
//! a `write` grant also permits reads and `admin` permits everything.

use std::collections::BTreeMap;

use capgate_types::FileCap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::intent::Intent;
use crate::reactor::{Reactor, ReactorError, Transition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "PascalCase")]
pub enum FileIntent {
    ReadFile { path: String },
    WriteFile { path: String, contents: String },
    DeleteFile { path: String },
}

impl FileIntent {
    pub fn read(path: impl Into<String>) -> Self {
        FileIntent::ReadFile { path: path.into() }
    }

    pub fn write(path: impl Into<String>, contents: impl Into<String>) -> Self {
        FileIntent::WriteFile {
            path: path.into(),
            contents: contents.into(),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        FileIntent::DeleteFile { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            FileIntent::ReadFile { path }
            | FileIntent::WriteFile { path, .. }
            | FileIntent::DeleteFile { path } => path,
        }
    }
}

impl Intent for FileIntent {
    type Capability = FileCap;

    fn name(&self) -> &'static str {
        match self {
            FileIntent::ReadFile { .. } => "ReadFile",
            FileIntent::WriteFile { .. } => "WriteFile",
            FileIntent::DeleteFile { .. } => "DeleteFile",
        }
    }

    fn required_capabilities(&self) -> Vec<FileCap> {
        match self {
            FileIntent::ReadFile { path } => vec![FileCap::read(path.as_str())],
            FileIntent::WriteFile { path, .. } => vec![FileCap::write(path.as_str())],
            FileIntent::DeleteFile { path } => vec![FileCap::delete(path.as_str())],
        }
    }
}

/// Path → contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStore {
    files: BTreeMap<String, String>,
}

impl FileStore {
    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FileStoreReactor;

impl Reactor for FileStoreReactor {
    type Intent = FileIntent;
    type State = FileStore;

    fn transition(
        &self,
        intent: &FileIntent,
        state: &FileStore,
    ) -> Result<Transition<FileStore>, ReactorError> {
        match intent {
            FileIntent::ReadFile { path } => {
                let contents = state
                    .get(path)
                    .ok_or_else(|| ReactorError::fatal(format!("no such file: {path}")))?;
                Ok(Transition::to(state.clone())
                    .emit("file.read", json!({ "path": path, "contents": contents })))
            }
            FileIntent::WriteFile { path, contents } => {
                let created = state.get(path).is_none();
                let next = state.clone().with_file(path.as_str(), contents.as_str());
                Ok(Transition::to(next).emit(
                    "file.written",
                    json!({ "path": path, "bytes": contents.len(), "created": created }),
                ))
            }
            FileIntent::DeleteFile { path } => {
                let mut next = state.clone();
                if next.files.remove(path).is_none() {
                    return Err(ReactorError::fatal(format!("no such file: {path}")));
                }
                Ok(Transition::to(next).emit("file.deleted", json!({ "path": path })))
            }
        }
    }
}
