//! Virtual filesystem of the deep agent
//!
//! Paths are absolute. Files under `/memories/` live in the store, in the
//! `filesystem` namespace keyed by the path below `/memories/`, as
//! `{"content": ".."}`; they outlive the thread. Every other file lives in
//! the thread's state and is gone with it.

use crate::error::{AgentError, Result};
use crate::tools::{integer_param, object_schema, str_arg, string_param, Tool, ToolContext, ToolRegistry};
use agentgraph_core::Store;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const LS: &str = "ls";
pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const EDIT_FILE: &str = "edit_file";

/// Path prefix routed to the store
pub const MEMORIES_PREFIX: &str = "/memories/";

const DEFAULT_READ_LIMIT: usize = 2000;
const MAX_LISTED: usize = 10_000;

/// Store namespace of `/memories/` files
pub fn memories_namespace() -> Vec<String> {
    vec!["filesystem".to_string()]
}

enum Route<'a> {
    Memory(&'a str),
    Thread,
}

fn route(path: &str) -> Result<Route<'_>> {
    if !path.starts_with('/') {
        return Err(AgentError::InvalidInput(format!("path must be absolute: {}", path)));
    }
    match path.strip_prefix(MEMORIES_PREFIX) {
        Some("") => Err(AgentError::InvalidInput(format!("{} is a directory", path))),
        Some(key) => Ok(Route::Memory(key)),
        None => Ok(Route::Thread),
    }
}

/// Files one tool round works on
///
/// Built from the thread's files at the start of the round; the files
/// written during the round are read back with [`changed`](Self::changed).
pub struct Workspace {
    files: Mutex<BTreeMap<String, String>>,
    written: Mutex<BTreeSet<String>>,
    store: Option<Arc<dyn Store>>,
}

impl Workspace {
    pub fn new(files: HashMap<String, String>, store: Option<Arc<dyn Store>>) -> Self {
        Self {
            files: Mutex::new(files.into_iter().collect()),
            written: Mutex::new(BTreeSet::new()),
            store,
        }
    }

    fn store(&self) -> Result<&Arc<dyn Store>> {
        self.store
            .as_ref()
            .ok_or_else(|| AgentError::Custom(format!("no store attached for {}", MEMORIES_PREFIX)))
    }

    async fn load(&self, path: &str) -> Result<Option<String>> {
        match route(path)? {
            Route::Memory(key) => {
                let item = self.store()?.get(&memories_namespace(), key).await?;
                Ok(item.map(|item| item.value["content"].as_str().unwrap_or_default().to_string()))
            }
            Route::Thread => Ok(self.files.lock().await.get(path).cloned()),
        }
    }

    async fn save(&self, path: &str, content: String) -> Result<()> {
        match route(path)? {
            Route::Memory(key) => {
                self.store()?
                    .put(&memories_namespace(), key, json!({"content": content}))
                    .await?;
            }
            Route::Thread => {
                self.files.lock().await.insert(path.to_string(), content);
                self.written.lock().await.insert(path.to_string());
            }
        }
        Ok(())
    }

    /// Paths of the files under `dir`, sorted
    pub async fn ls(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = if dir.ends_with('/') { dir.to_string() } else { format!("{}/", dir) };
        let mut paths: Vec<String> = self.files.lock().await.keys().cloned().collect();
        if let Some(store) = &self.store {
            let items = store.search(&memories_namespace(), None, MAX_LISTED).await?;
            paths.extend(items.into_iter().map(|item| format!("{}{}", MEMORIES_PREFIX, item.key)));
        }
        paths.retain(|p| p.starts_with(&prefix));
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    /// Lines `offset..offset + limit`, numbered from 1
    pub async fn read_file(&self, path: &str, offset: usize, limit: usize) -> Result<String> {
        let content = self
            .load(path)
            .await?
            .ok_or_else(|| AgentError::InvalidInput(format!("file not found: {}", path)))?;
        if content.is_empty() {
            return Ok("System reminder: File exists but has empty contents".to_string());
        }
        let lines: Vec<String> = content
            .lines()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(i, line)| format!("{:6}\t{}", i + 1, line))
            .collect();
        if lines.is_empty() {
            return Err(AgentError::InvalidInput(format!(
                "line offset {} exceeds file length ({} lines)",
                offset,
                content.lines().count()
            )));
        }
        Ok(lines.join("\n"))
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<String> {
        self.save(path, content.to_string()).await?;
        Ok(format!("Updated file {}", path))
    }

    /// Replace `old` by `new`; `old` must be unique unless `replace_all`
    pub async fn edit_file(&self, path: &str, old: &str, new: &str, replace_all: bool) -> Result<String> {
        let content = self
            .load(path)
            .await?
            .ok_or_else(|| AgentError::InvalidInput(format!("file not found: {}", path)))?;
        let occurrences = content.matches(old).count();
        if old.is_empty() || occurrences == 0 {
            return Err(AgentError::InvalidInput(format!("string not found in {}: {}", path, old)));
        }
        if occurrences > 1 && !replace_all {
            return Err(AgentError::InvalidInput(format!(
                "string appears {} times in {}; pass replace_all or give more context",
                occurrences, path
            )));
        }
        let edited = if replace_all {
            content.replace(old, new)
        } else {
            content.replacen(old, new, 1)
        };
        self.save(path, edited).await?;
        Ok(format!(
            "Successfully replaced {} instance(s) of the string in '{}'",
            if replace_all { occurrences } else { 1 },
            path
        ))
    }

    /// Thread files written this round
    pub async fn changed(&self) -> HashMap<String, String> {
        let files = self.files.lock().await;
        let written = self.written.lock().await;
        written
            .iter()
            .filter_map(|path| files.get(path).map(|content| (path.clone(), content.clone())))
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum FileOp {
    Ls,
    ReadFile,
    WriteFile,
    EditFile,
}

impl FileOp {
    fn name(self) -> &'static str {
        match self {
            FileOp::Ls => LS,
            FileOp::ReadFile => READ_FILE,
            FileOp::WriteFile => WRITE_FILE,
            FileOp::EditFile => EDIT_FILE,
        }
    }

    fn description(self) -> &'static str {
        match self {
            FileOp::Ls => "Lists all files under a directory. The path must be absolute.",
            FileOp::ReadFile => "Reads a file, with line numbers. Use offset and limit to page through long files.",
            FileOp::WriteFile => "Writes a new file or replaces an existing one. Files under /memories/ are kept across conversations.",
            FileOp::EditFile => "Performs an exact string replacement in a file. old_string must be unique unless replace_all is set.",
        }
    }

    fn parameters(self) -> Value {
        match self {
            FileOp::Ls => object_schema([("path", string_param("Absolute directory path"))]),
            FileOp::ReadFile => {
                let mut schema = object_schema([("file_path", string_param("Absolute path of the file"))]);
                schema["properties"]["offset"] = integer_param("Line to start reading from, 0-based");
                schema["properties"]["limit"] = integer_param("Maximum number of lines to read");
                schema
            }
            FileOp::WriteFile => object_schema([
                ("file_path", string_param("Absolute path of the file")),
                ("content", string_param("Full content of the file")),
            ]),
            FileOp::EditFile => {
                let mut schema = object_schema([
                    ("file_path", string_param("Absolute path of the file")),
                    ("old_string", string_param("Text to replace")),
                    ("new_string", string_param("Replacement text")),
                ]);
                schema["properties"]["replace_all"] =
                    json!({"type": "boolean", "description": "Replace every occurrence"});
                schema
            }
        }
    }
}

/// One filesystem operation over a [`Workspace`]
pub struct FileTool {
    op: FileOp,
    workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for FileTool {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn description(&self) -> &str {
        self.op.description()
    }

    fn parameters(&self) -> Value {
        self.op.parameters()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        let ws = &self.workspace;
        match self.op {
            FileOp::Ls => Ok(format!("{:?}", ws.ls(str_arg(&args, "path")?).await?)),
            FileOp::ReadFile => {
                let offset = args["offset"].as_u64().unwrap_or(0) as usize;
                let limit = args["limit"].as_u64().map_or(DEFAULT_READ_LIMIT, |l| l as usize);
                ws.read_file(str_arg(&args, "file_path")?, offset, limit).await
            }
            FileOp::WriteFile => {
                ws.write_file(str_arg(&args, "file_path")?, str_arg(&args, "content")?)
                    .await
            }
            FileOp::EditFile => {
                ws.edit_file(
                    str_arg(&args, "file_path")?,
                    str_arg(&args, "old_string")?,
                    str_arg(&args, "new_string")?,
                    args["replace_all"].as_bool().unwrap_or(false),
                )
                .await
            }
        }
    }
}

/// `ls`, `read_file`, `write_file` and `edit_file` over `workspace`
pub fn file_tools(workspace: Arc<Workspace>) -> ToolRegistry {
    [FileOp::Ls, FileOp::ReadFile, FileOp::WriteFile, FileOp::EditFile]
        .into_iter()
        .map(|op| {
            Arc::new(FileTool {
                op,
                workspace: Arc::clone(&workspace),
            }) as Arc<dyn Tool>
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgraph_core::store::InMemoryStore;

    fn workspace(store: Option<Arc<dyn Store>>) -> Workspace {
        Workspace::new(
            HashMap::from([("/notes/plan.md".to_string(), "step one\nstep two\nstep one".to_string())]),
            store,
        )
    }

    #[tokio::test]
    async fn test_read_numbers_lines() {
        let ws = workspace(None);
        assert_eq!(
            ws.read_file("/notes/plan.md", 1, 1).await.unwrap(),
            "     2\tstep two"
        );
        assert!(ws.read_file("/notes/plan.md", 9, 1).await.is_err());
        assert!(ws.read_file("/missing.md", 0, 10).await.is_err());
        assert!(ws.read_file("relative.md", 0, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_edit_needs_unique_match() {
        let ws = workspace(None);
        let err = ws.edit_file("/notes/plan.md", "step one", "first", false).await.unwrap_err();
        assert!(err.to_string().contains("appears 2 times"));

        ws.edit_file("/notes/plan.md", "step two", "second", false).await.unwrap();
        let out = ws.edit_file("/notes/plan.md", "step one", "first", true).await.unwrap();
        assert!(out.contains("2 instance(s)"));
        assert_eq!(
            ws.changed().await.get("/notes/plan.md").map(String::as_str),
            Some("first\nsecond\nfirst")
        );
    }

    #[tokio::test]
    async fn test_memories_go_to_the_store() {
        let store = Arc::new(InMemoryStore::new());
        let ws = workspace(Some(store.clone()));

        ws.write_file("/memories/research_notes.md", "Rust is fast").await.unwrap();

        let item = store
            .get(&memories_namespace(), "research_notes.md")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.value, json!({"content": "Rust is fast"}));
        assert!(ws.changed().await.is_empty());
        assert_eq!(
            ws.ls("/").await.unwrap(),
            vec!["/memories/research_notes.md", "/notes/plan.md"]
        );
        assert_eq!(ws.ls("/memories").await.unwrap(), vec!["/memories/research_notes.md"]);

        // a later thread sees the same memory
        let later = Workspace::new(HashMap::new(), Some(store));
        assert_eq!(
            later.read_file("/memories/research_notes.md", 0, 10).await.unwrap(),
            "     1\tRust is fast"
        );
    }

    #[tokio::test]
    async fn test_memories_need_a_store() {
        let ws = workspace(None);
        assert!(ws.write_file("/memories/x.md", "x").await.is_err());
        assert!(ws.write_file("/memories/", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_tools_share_the_workspace() {
        let ws = Arc::new(workspace(None));
        let tools = file_tools(Arc::clone(&ws));
        assert_eq!(tools.names(), vec![LS, READ_FILE, WRITE_FILE, EDIT_FILE]);

        let write = agentgraph_core::llm::ToolCall::new(
            "w",
            WRITE_FILE,
            json!({"file_path": "/final_report.md", "content": "# Report"}),
        );
        assert_eq!(
            tools.execute(&write, &ToolContext::new()).await.unwrap(),
            "Updated file /final_report.md"
        );
        let read = agentgraph_core::llm::ToolCall::new("r", READ_FILE, json!({"file_path": "/final_report.md"}));
        assert_eq!(
            tools.execute(&read, &ToolContext::new()).await.unwrap(),
            "     1\t# Report"
        );
    }
}
