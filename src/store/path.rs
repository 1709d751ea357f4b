//! Store paths and the RPC namespace layout.
//!
//! ```text
//! {root}/clients/{clientId}            presence record (ephemeral)
//! {root}/queue/tasks/{taskKey}         queued task
//! {root}/results/{clientId}/{key}      result envelope (ephemeral collection)
//! ```

/// Splits a path into its non-empty segments.
pub fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Joins two paths, normalising duplicate and trailing separators.
pub fn join(base: &str, child: &str) -> String {
    let mut parts = segments(base);
    parts.extend(segments(child));
    parts.join("/")
}

/// Computes every path the RPC protocol uses below a configured root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    root: String,
}

impl Namespace {
    pub fn new(root: &str) -> Self {
        Self {
            root: segments(root).join("/"),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn clients(&self) -> String {
        join(&self.root, "clients")
    }

    pub fn client(&self, client_id: &str) -> String {
        join(&self.clients(), client_id)
    }

    pub fn queue_tasks(&self) -> String {
        join(&self.root, "queue/tasks")
    }

    pub fn task(&self, key: &str) -> String {
        join(&self.queue_tasks(), key)
    }

    pub fn all_results(&self) -> String {
        join(&self.root, "results")
    }

    pub fn results(&self, client_id: &str) -> String {
        join(&self.all_results(), client_id)
    }

    pub fn result(&self, client_id: &str, key: &str) -> String {
        join(&self.results(client_id), key)
    }
}
