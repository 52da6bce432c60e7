//! RefID resolver - short handles (`e1`, `e2`, ...) over snapshot elements.
//!
//! RefIDs are semantic locators, not live DOM pointers: the `RefData` behind
//! a handle carries (role, name, nth) plus hints, so a handle can re-find its
//! element after the DOM mutates. The cache is replaced wholesale on every
//! refresh, never patched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::page::Page;
use crate::probe;
use crate::tree::{AccessibilityNode, AccessibilitySnapshot};
use crate::Result;

/// Default cache lifetime.
pub const DEFAULT_REF_TTL: Duration = Duration::from_secs(300);

/// Semantic locator data behind one RefID.
#[derive(Debug, Clone, PartialEq)]
pub struct RefData {
    pub role: String,
    pub name: String,
    /// 0-based index among elements sharing the same role+name.
    pub nth: usize,
    /// Fast-path hint; may be stale after DOM mutation.
    pub backend_id: i64,
    /// Set when role is "link".
    pub href: Option<String>,
    /// Set for input elements with a placeholder.
    pub placeholder: Option<String>,
    /// Tiebreaker subset of the node's attributes (id, class).
    pub attributes: HashMap<String, String>,
}

struct RefCache {
    map: HashMap<String, RefData>,
    snapshot: Arc<AccessibilitySnapshot>,
    captured_at: Instant,
}

/// Owns the single RefID cache of an executor.
pub struct RefResolver {
    cache: RwLock<Option<RefCache>>,
    ttl: Duration,
}

impl Default for RefResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl RefResolver {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_REF_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(None),
            ttl,
        }
    }

    /// Cached snapshot when fresh, otherwise acquire a new one, assign
    /// RefIDs and replace the cache atomically. Readers block while a
    /// refresh holds the write lock.
    pub async fn snapshot(&self, page: &dyn Page) -> Result<Arc<AccessibilitySnapshot>> {
        {
            let guard = self.cache.read().await;
            if let Some(cache) = guard.as_ref() {
                if cache.captured_at.elapsed() < self.ttl {
                    debug!(
                        age_ms = cache.captured_at.elapsed().as_millis() as u64,
                        refs = cache.map.len(),
                        "using cached snapshot"
                    );
                    return Ok(cache.snapshot.clone());
                }
            }
        }

        let mut guard = self.cache.write().await;
        // A concurrent refresh may have run while we waited for the lock.
        if let Some(cache) = guard.as_ref() {
            if cache.captured_at.elapsed() < self.ttl {
                return Ok(cache.snapshot.clone());
            }
        }

        let mut snapshot = probe::acquire(page).await?;
        let map = assign_ref_ids(&mut snapshot);
        let snapshot = Arc::new(snapshot);
        info!(refs = map.len(), url = %snapshot.page_url, "ref cache replaced");

        *guard = Some(RefCache {
            map,
            snapshot: snapshot.clone(),
            captured_at: Instant::now(),
        });
        Ok(snapshot)
    }

    /// Look a handle up in the current cache epoch. Handles stay resolvable
    /// until the cache is replaced or invalidated; the TTL only governs when
    /// `snapshot` refreshes.
    pub async fn resolve(&self, ref_id: &str) -> Option<RefData> {
        let guard = self.cache.read().await;
        guard.as_ref()?.map.get(ref_id).cloned()
    }

    pub async fn invalidate(&self) {
        let mut guard = self.cache.write().await;
        if guard.take().is_some() {
            debug!("ref cache invalidated");
        }
    }

    /// Drop the cache when the page moved to a different URL.
    pub async fn note_url(&self, url: &str) {
        let stale = {
            let guard = self.cache.read().await;
            matches!(guard.as_ref(), Some(c) if c.snapshot.page_url != url)
        };
        if stale {
            debug!(%url, "url changed, dropping ref cache");
            self.invalidate().await;
        }
    }

    pub async fn ref_count(&self) -> usize {
        self.cache
            .read()
            .await
            .as_ref()
            .map(|c| c.map.len())
            .unwrap_or(0)
    }
}

/// Walk clickables first, then inputs, assigning `e1..eN`. The `nth`
/// counter is keyed by `role:name` and shared across both passes, so two
/// same-named elements get distinct indices regardless of bucket.
pub(crate) fn assign_ref_ids(
    snapshot: &mut AccessibilitySnapshot,
) -> HashMap<String, RefData> {
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut map = HashMap::new();
    let mut next = 0usize;

    snapshot.root.for_each_mut(&mut |node| {
        if node.is_clickable() && node.ref_id.is_none() {
            assign(node, &mut counters, &mut map, &mut next);
        }
    });
    // A node can be both clickable and an input; the first pass wins.
    snapshot.root.for_each_mut(&mut |node| {
        if node.is_input() && node.ref_id.is_none() {
            assign(node, &mut counters, &mut map, &mut next);
        }
    });

    map
}

fn assign(
    node: &mut AccessibilityNode,
    counters: &mut HashMap<String, usize>,
    map: &mut HashMap<String, RefData>,
    next: &mut usize,
) {
    let key = format!("{}:{}", node.role, node.label);
    let counter = counters.entry(key).or_insert(0);
    let nth = *counter;
    *counter += 1;

    *next += 1;
    let ref_id = format!("e{next}");
    node.ref_id = Some(ref_id.clone());

    let mut attributes = HashMap::new();
    for key in ["id", "class"] {
        if let Some(v) = node.attributes.get(key) {
            if !v.is_empty() {
                attributes.insert(key.to_string(), v.clone());
            }
        }
    }

    let href = if node.role == "link" {
        node.attributes.get("href").cloned()
    } else {
        None
    };
    let placeholder = if node.is_input() && !node.placeholder.is_empty() {
        Some(node.placeholder.clone())
    } else {
        None
    };

    map.insert(
        ref_id,
        RefData {
            role: node.role.clone(),
            name: node.label.clone(),
            nth,
            backend_id: node.backend_node_id,
            href,
            placeholder,
            attributes,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPage;
    use crate::tree::tests::{node, snapshot_of};

    fn sample_snapshot() -> AccessibilitySnapshot {
        let mut root = node("generic", "");
        root.children.push(node("button", "Submit"));
        root.children.push(node("button", "Submit"));

        let mut link = node("link", "Docs");
        link.attributes
            .insert("href".into(), "/docs".into());
        root.children.push(link);

        let mut search = node("searchbox", "Search");
        search.placeholder = "Search".into();
        search.attributes.insert("id".into(), "q".into());
        root.children.push(search);

        // Both clickable and input, must be assigned exactly once.
        root.children.push(node("checkbox", "Agree"));

        snapshot_of(root)
    }

    #[test]
    fn ref_ids_are_unique_and_contiguous() {
        let mut snap = sample_snapshot();
        let map = assign_ref_ids(&mut snap);

        let expected = snap.clickable_elements().len()
            + snap
                .input_elements()
                .iter()
                .filter(|n| !n.is_clickable())
                .count();
        assert_eq!(map.len(), expected);

        for i in 1..=map.len() {
            assert!(map.contains_key(&format!("e{i}")), "missing e{i}");
        }
    }

    #[test]
    fn nth_counts_duplicates_per_role_and_name() {
        let mut snap = sample_snapshot();
        let map = assign_ref_ids(&mut snap);

        let submits: Vec<&RefData> = map
            .values()
            .filter(|d| d.role == "button" && d.name == "Submit")
            .collect();
        let mut nths: Vec<usize> = submits.iter().map(|d| d.nth).collect();
        nths.sort_unstable();
        assert_eq!(nths, vec![0, 1]);

        let docs = map.values().find(|d| d.name == "Docs").unwrap();
        assert_eq!(docs.nth, 0);
        assert_eq!(docs.href.as_deref(), Some("/docs"));
    }

    #[test]
    fn input_extras_and_attribute_subset_are_captured() {
        let mut snap = sample_snapshot();
        let map = assign_ref_ids(&mut snap);

        let search = map.values().find(|d| d.role == "searchbox").unwrap();
        assert_eq!(search.placeholder.as_deref(), Some("Search"));
        assert_eq!(search.attributes.get("id").map(String::as_str), Some("q"));
        assert!(!search.attributes.contains_key("href"));
    }

    #[test]
    fn dual_bucket_nodes_keep_their_first_handle() {
        let mut snap = sample_snapshot();
        assign_ref_ids(&mut snap);

        let mut agree_refs = Vec::new();
        snap.root.for_each(&mut |n| {
            if n.label == "Agree" {
                agree_refs.push(n.ref_id.clone());
            }
        });
        assert_eq!(agree_refs.len(), 1);
        assert!(agree_refs[0].is_some());
    }

    fn probe_json() -> String {
        serde_json::json!({
            "role": "generic",
            "name": "",
            "attrs": {"tag": "body"},
            "backendId": 1,
            "visible": true,
            "enabled": true,
            "children": [{
                "role": "button",
                "name": "Go",
                "attrs": {"tag": "button"},
                "backendId": 2,
                "visible": true,
                "enabled": true,
                "children": []
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn snapshot_caches_until_invalidated() {
        let page = MockPage::new("https://example.com/", "Example");
        page.on_probe(probe_json());

        let resolver = RefResolver::new();
        let first = resolver.snapshot(&page).await.unwrap();
        let second = resolver.snapshot(&page).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert!(resolver.resolve("e1").await.is_some());
        assert!(resolver.resolve("e99").await.is_none());

        resolver.invalidate().await;
        assert!(resolver.resolve("e1").await.is_none());

        let third = resolver.snapshot(&page).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn expired_cache_refreshes_on_next_snapshot() {
        let page = MockPage::new("https://example.com/", "Example");
        page.on_probe(probe_json());

        let resolver = RefResolver::with_ttl(Duration::ZERO);
        let first = resolver.snapshot(&page).await.unwrap();
        // Handles from the current epoch keep resolving until replacement.
        assert!(resolver.resolve("e1").await.is_some());

        let second = resolver.snapshot(&page).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn url_change_drops_the_cache() {
        let page = MockPage::new("https://example.com/", "Example");
        page.on_probe(probe_json());

        let resolver = RefResolver::new();
        resolver.snapshot(&page).await.unwrap();
        assert_eq!(resolver.ref_count().await, 1);

        resolver.note_url("https://example.com/").await;
        assert_eq!(resolver.ref_count().await, 1);

        resolver.note_url("https://example.com/other").await;
        assert_eq!(resolver.ref_count().await, 0);
    }
}
