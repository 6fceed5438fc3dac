//! Tab store keyed by target id.
//!
//! The list is driven by `Target.targetCreated` / `targetInfoChanged` /
//! `targetDestroyed` events; the viewer addresses tabs by index and looks
//! up the target id at dispatch time.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    pub target_id: String,
    pub url: String,
    pub title: String,
}

/// What an inbound target event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabChange {
    Created(usize),
    Updated(usize),
    Removed(usize),
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct TabStore {
    tabs: Vec<Tab>,
    active: usize,
}

impl TabStore {
    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.tabs.get(self.active)
    }

    pub fn get(&self, index: usize) -> Option<&Tab> {
        self.tabs.get(index)
    }

    pub fn index_of(&self, target_id: &str) -> Option<usize> {
        self.tabs.iter().position(|t| t.target_id == target_id)
    }

    pub fn set_active(&mut self, index: usize) -> bool {
        if index < self.tabs.len() {
            self.active = index;
            true
        } else {
            false
        }
    }

    /// Titles for the tab picker, in index order.
    pub fn titles(&self) -> Vec<String> {
        self.tabs
            .iter()
            .map(|t| {
                if t.title.is_empty() {
                    t.url.clone()
                } else {
                    t.title.clone()
                }
            })
            .collect()
    }

    /// Apply a `targetInfo` payload from a created/changed event. Only
    /// top-level page targets become tabs.
    pub fn upsert(&mut self, target_info: &Value) -> TabChange {
        let Some(target_id) = target_info.get("targetId").and_then(Value::as_str) else {
            return TabChange::Ignored;
        };
        if target_info.get("type").and_then(Value::as_str) != Some("page") {
            return TabChange::Ignored;
        }
        let url = target_info
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let title = target_info
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        match self.index_of(target_id) {
            Some(i) => {
                let tab = &mut self.tabs[i];
                if tab.url == url && tab.title == title {
                    return TabChange::Ignored;
                }
                tab.url = url;
                tab.title = title;
                TabChange::Updated(i)
            }
            None => {
                self.tabs.push(Tab {
                    target_id: target_id.to_string(),
                    url,
                    title,
                });
                TabChange::Created(self.tabs.len() - 1)
            }
        }
    }

    /// Remove a destroyed target. The active index clamps to the surviving
    /// list.
    pub fn remove(&mut self, target_id: &str) -> TabChange {
        let Some(i) = self.index_of(target_id) else {
            return TabChange::Ignored;
        };
        self.tabs.remove(i);
        if self.active >= self.tabs.len() && !self.tabs.is_empty() {
            self.active = self.tabs.len() - 1;
        } else if self.active > i {
            self.active -= 1;
        }
        TabChange::Removed(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(target_id: &str, url: &str, title: &str) -> Value {
        json!({ "targetId": target_id, "type": "page", "url": url, "title": title })
    }

    #[test]
    fn page_targets_become_tabs() {
        let mut store = TabStore::default();
        assert_eq!(
            store.upsert(&page("t1", "https://example.com", "Example")),
            TabChange::Created(0)
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.active_tab().expect("tab").url, "https://example.com");
    }

    #[test]
    fn non_page_targets_are_ignored() {
        let mut store = TabStore::default();
        let sw = json!({ "targetId": "w1", "type": "service_worker", "url": "x" });
        assert_eq!(store.upsert(&sw), TabChange::Ignored);
        assert!(store.is_empty());
    }

    #[test]
    fn info_change_updates_in_place() {
        let mut store = TabStore::default();
        store.upsert(&page("t1", "about:blank", ""));
        assert_eq!(
            store.upsert(&page("t1", "https://example.com", "Example")),
            TabChange::Updated(0)
        );
        assert_eq!(store.len(), 1);
        // Identical payload is a no-op.
        assert_eq!(
            store.upsert(&page("t1", "https://example.com", "Example")),
            TabChange::Ignored
        );
    }

    #[test]
    fn remove_clamps_active_index() {
        let mut store = TabStore::default();
        store.upsert(&page("t1", "u1", ""));
        store.upsert(&page("t2", "u2", ""));
        store.upsert(&page("t3", "u3", ""));
        store.set_active(2);
        assert_eq!(store.remove("t3"), TabChange::Removed(2));
        assert_eq!(store.active_index(), 1);

        store.set_active(0);
        store.remove("t1");
        assert_eq!(store.active_index(), 0);
        assert_eq!(store.active_tab().expect("tab").target_id, "t2");
    }

    #[test]
    fn remove_before_active_shifts_index() {
        let mut store = TabStore::default();
        store.upsert(&page("t1", "u1", ""));
        store.upsert(&page("t2", "u2", ""));
        store.set_active(1);
        store.remove("t1");
        assert_eq!(store.active_index(), 0);
        assert_eq!(store.active_tab().expect("tab").target_id, "t2");
    }

    #[test]
    fn titles_fall_back_to_url() {
        let mut store = TabStore::default();
        store.upsert(&page("t1", "https://example.com", ""));
        store.upsert(&page("t2", "https://docs.example.com", "Docs"));
        assert_eq!(store.titles(), vec!["https://example.com", "Docs"]);
    }
}
