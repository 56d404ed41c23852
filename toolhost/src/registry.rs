//! C2: the Tool Registry. Starts every configured backend concurrently,
//! builds the tool catalog, resolves name collisions to qualified names,
//! and supervises backends across restarts.
//!
//! Grounded on `McpManager`'s `new`/`connect_server_with_retry`/
//! `refresh_server_inventory`/`shutdown` shape, generalized from the
//! `rmcp` transport to the line-JSON child-process protocol in
//! `protocol.rs`/`session.rs`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::error::{ToolHostError, ToolHostResult};
use crate::protocol::ToolSpecWire;
use crate::session::{BackendDescriptor, BackendSession};

/// A catalog entry as exposed to the orchestrator: the name the model
/// sees (possibly qualified), the backend that owns it, and its schema.
#[derive(Clone)]
pub struct ToolCatalogEntry {
    pub qualified_name: String,
    pub backend_name: String,
    pub schema: ToolSpecWire,
}

struct BackendSlot {
    descriptor: BackendDescriptor,
    session: parking_lot::RwLock<Option<Arc<BackendSession>>>,
    backoff: parking_lot::Mutex<backoff::ExponentialBackoff>,
}

fn restart_backoff() -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(100))
        .with_multiplier(2.0)
        .with_max_interval(Duration::from_secs(5))
        .with_max_elapsed_time(None)
        .build()
}

/// Launches, supervises, and multiplexes calls to backend processes;
/// maintains the global tool catalog.
pub struct ToolRegistry {
    slots: HashMap<String, Arc<BackendSlot>>,
    /// bare tool name -> catalog entry, or `None` once withdrawn due to collision.
    catalog: DashMap<String, Option<ToolCatalogEntry>>,
    /// qualified name -> catalog entry, populated for every tool regardless
    /// of collision (so `invoke` can always be called with a qualified name).
    by_qualified: DashMap<String, ToolCatalogEntry>,
}

impl ToolRegistry {
    /// Start every backend concurrently; join before returning. A backend
    /// whose `list_tools` fails or times out is excluded, not fatal.
    pub async fn start(descriptors: Vec<BackendDescriptor>) -> Arc<Self> {
        let mut slots = HashMap::new();
        let mut joins = Vec::new();

        for descriptor in descriptors {
            let name = descriptor.name.clone();
            let slot = Arc::new(BackendSlot {
                descriptor: descriptor.clone(),
                session: parking_lot::RwLock::new(None),
                backoff: parking_lot::Mutex::new(restart_backoff()),
            });
            slots.insert(name.clone(), slot.clone());
            joins.push(tokio::spawn(async move {
                let result = connect_and_list(&slot).await;
                (name, result)
            }));
        }

        let registry = Arc::new(ToolRegistry {
            slots,
            catalog: DashMap::new(),
            by_qualified: DashMap::new(),
        });

        let mut per_backend_tools: Vec<(String, Vec<ToolSpecWire>)> = Vec::new();
        for join in joins {
            match join.await {
                Ok((name, Ok(tools))) => per_backend_tools.push((name, tools)),
                Ok((name, Err(e))) => warn!(backend = %name, error = %e, "backend excluded from catalog at startup"),
                Err(e) => warn!(error = %e, "backend startup task panicked"),
            }
        }

        registry.rebuild_catalog(per_backend_tools);
        info!(tools = registry.by_qualified.len(), "tool registry ready");
        registry
    }

    fn rebuild_catalog(&self, per_backend_tools: Vec<(String, Vec<ToolSpecWire>)>) {
        self.catalog.clear();
        self.by_qualified.clear();

        let mut name_counts: HashMap<String, usize> = HashMap::new();
        for (_, tools) in &per_backend_tools {
            for tool in tools {
                *name_counts.entry(tool.name.clone()).or_insert(0) += 1;
            }
        }

        for (backend_name, tools) in per_backend_tools {
            for tool in tools {
                let collides = name_counts.get(&tool.name).copied().unwrap_or(0) > 1;
                let qualified_name = if collides {
                    format!("{backend_name}.{}", tool.name)
                } else {
                    tool.name.clone()
                };
                let entry = ToolCatalogEntry {
                    qualified_name: qualified_name.clone(),
                    backend_name: backend_name.clone(),
                    schema: tool,
                };
                self.by_qualified.insert(qualified_name.clone(), entry.clone());
                if collides {
                    // Bare name withdrawn on collision.
                    self.catalog.insert(entry.schema.name.clone(), None);
                } else {
                    self.catalog.insert(entry.schema.name.clone(), Some(entry));
                }
            }
        }
    }

    /// The full catalog as exposed to the model: bare names where
    /// unambiguous, qualified names where collisions were resolved.
    pub fn list_exposed_tools(&self) -> Vec<ToolCatalogEntry> {
        let mut out = Vec::new();
        for item in self.catalog.iter() {
            if let Some(entry) = item.value() {
                out.push(entry.clone());
            }
        }
        for item in self.by_qualified.iter() {
            if item.key().contains('.') {
                out.push(item.value().clone());
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.by_qualified.is_empty()
    }

    fn resolve(&self, name: &str) -> Option<ToolCatalogEntry> {
        if let Some(entry) = self.by_qualified.get(name) {
            return Some(entry.clone());
        }
        self.catalog.get(name).and_then(|e| e.clone())
    }

    /// Invoke a tool by its exposed (possibly qualified) name.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> ToolHostResult<String> {
        let entry = self
            .resolve(name)
            .ok_or_else(|| ToolHostError::ToolNotFound(name.to_string()))?;
        let slot = self
            .slots
            .get(&entry.backend_name)
            .ok_or_else(|| ToolHostError::BackendUnavailable(entry.backend_name.clone()))?;

        let session = slot.session.read().clone();
        let session = match session {
            Some(s) if !s.is_crashed() => s,
            _ => self.restart(slot).await?,
        };

        match session
            .call_tool(&entry.schema.name, arguments.clone(), timeout)
            .await
        {
            Ok(content) => Ok(content),
            Err(ToolHostError::BackendCrashed(_)) => {
                // One retry against a freshly restarted session; callers
                // above (C3) still see a single invoke() failure if this
                // also fails, never a hang.
                let session = self.restart(slot).await?;
                session.call_tool(&entry.schema.name, arguments, timeout).await
            }
            Err(e) => Err(e),
        }
    }

    async fn restart(&self, slot: &Arc<BackendSlot>) -> ToolHostResult<Arc<BackendSession>> {
        use backoff::backoff::Backoff;
        let wait = slot.backoff.lock().next_backoff();
        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }

        let session = Arc::new(BackendSession::spawn(&slot.descriptor).await?);
        let tools_value = session.list_tools().await?;
        let tools: Vec<ToolSpecWire> = serde_json::from_value(tools_value).map_err(|e| {
            ToolHostError::ListToolsFailed(slot.descriptor.name.clone(), e.to_string())
        })?;

        // Atomic swap: readers observe either the old (failed) or
        // new (ready) session, never a half-initialized one.
        *slot.session.write() = Some(session.clone());
        slot.backoff.lock().reset();
        self.merge_backend_catalog(&slot.descriptor.name, tools);
        Ok(session)
    }

    /// After a backend restart re-issues `list_tools`, recompute catalog
    /// entries across every backend's current tool set (not just the
    /// restarted one) so a collision introduced or resolved by the refresh
    /// is reflected the same way it would be at startup (§4.2 "merges the
    /// refreshed schemas").
    fn merge_backend_catalog(&self, backend_name: &str, tools: Vec<ToolSpecWire>) {
        let mut per_backend: HashMap<String, Vec<ToolSpecWire>> = HashMap::new();
        for entry in self.by_qualified.iter() {
            per_backend
                .entry(entry.backend_name.clone())
                .or_default()
                .push(entry.schema.clone());
        }
        per_backend.insert(backend_name.to_string(), tools);
        self.rebuild_catalog(per_backend.into_iter().collect());
    }

    /// Close every backend's stdin, wait up to 5s each, then force-terminate.
    pub async fn shutdown(&self) {
        for slot in self.slots.values() {
            if let Some(session) = slot.session.read().clone() {
                session.shutdown().await;
            }
        }
    }
}

async fn connect_and_list(slot: &Arc<BackendSlot>) -> ToolHostResult<Vec<ToolSpecWire>> {
    let session = Arc::new(BackendSession::spawn(&slot.descriptor).await?);
    let tools_value = session.list_tools().await?;
    let tools: Vec<ToolSpecWire> = serde_json::from_value(tools_value).map_err(|e| {
        ToolHostError::ListToolsFailed(slot.descriptor.name.clone(), e.to_string())
    })?;
    *slot.session.write() = Some(session);
    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(name: &str) -> ToolSpecWire {
        ToolSpecWire {
            name: name.to_string(),
            description: None,
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn collision_withdraws_bare_name() {
        let registry = ToolRegistry {
            slots: HashMap::new(),
            catalog: DashMap::new(),
            by_qualified: DashMap::new(),
        };
        registry.rebuild_catalog(vec![
            ("a".to_string(), vec![wire("shared")]),
            ("b".to_string(), vec![wire("shared")]),
        ]);

        assert!(registry.catalog.get("shared").unwrap().is_none());
        assert!(registry.by_qualified.contains_key("a.shared"));
        assert!(registry.by_qualified.contains_key("b.shared"));
    }

    #[test]
    fn unique_names_stay_bare() {
        let registry = ToolRegistry {
            slots: HashMap::new(),
            catalog: DashMap::new(),
            by_qualified: DashMap::new(),
        };
        registry.rebuild_catalog(vec![("a".to_string(), vec![wire("echo")])]);

        assert!(registry.catalog.get("echo").unwrap().is_some());
        let exposed = registry.list_exposed_tools();
        assert_eq!(exposed.len(), 1);
        assert_eq!(exposed[0].qualified_name, "echo");
    }

    #[test]
    fn restart_merges_refreshed_schema_for_its_backend_only() {
        let registry = ToolRegistry {
            slots: HashMap::new(),
            catalog: DashMap::new(),
            by_qualified: DashMap::new(),
        };
        registry.rebuild_catalog(vec![
            ("a".to_string(), vec![wire("echo")]),
            ("b".to_string(), vec![wire("ping")]),
        ]);

        let mut refreshed = wire("echo");
        refreshed.description = Some("refreshed description".to_string());
        registry.merge_backend_catalog("a", vec![refreshed]);

        let entry = registry.by_qualified.get("echo").unwrap();
        assert_eq!(entry.schema.description.as_deref(), Some("refreshed description"));
        // Backend "b"'s entry must survive the merge untouched.
        assert!(registry.by_qualified.contains_key("ping"));
    }

    #[test]
    fn restart_merge_can_introduce_a_fresh_collision() {
        let registry = ToolRegistry {
            slots: HashMap::new(),
            catalog: DashMap::new(),
            by_qualified: DashMap::new(),
        };
        registry.rebuild_catalog(vec![
            ("a".to_string(), vec![wire("echo")]),
            ("b".to_string(), vec![wire("ping")]),
        ]);

        // Backend "b" restarts and now also exposes "echo" -> collision.
        registry.merge_backend_catalog("b", vec![wire("ping"), wire("echo")]);

        assert!(registry.catalog.get("echo").unwrap().is_none());
        assert!(registry.by_qualified.contains_key("a.echo"));
        assert!(registry.by_qualified.contains_key("b.echo"));
    }
}
