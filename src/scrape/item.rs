//! `ScrapeItem`: a unit of crawling work, plus the `children_limit` and
//! `create_child` bookkeeping scrapers build tree-shaped crawls with.

/// Collection type a scraper can mark a [`ScrapeItem`] as; each bounds its
/// children via `children_limit` (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    /// A forum thread listing.
    Forum,
    /// A single forum post within a thread.
    ForumPost,
    /// A user/creator profile page.
    Profile,
    /// A media album/gallery.
    Album,
    /// Not yet classified.
    None,
}

/// Returned by [`ScrapeItem::add_children`] once `children_limit` is hit —
/// an explicit early-return sentinel rather than a raised exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxChildrenReached;

/// Per-`ItemType` default child caps, indexed via [`ScrapeItem::set_type`].
fn default_limit_for(item_type: ItemType) -> u32 {
    match item_type {
        ItemType::Forum => 10_000,
        ItemType::ForumPost => 500,
        ItemType::Profile => 5_000,
        ItemType::Album => 5_000,
        ItemType::None => u32::MAX,
    }
}

/// A unit of crawling work.
#[derive(Debug, Clone)]
pub struct ScrapeItem {
    /// Absolute http(s) URL; authority present, path normalized, no
    /// trailing slash unless root. A scraper may rewrite this in place
    /// (e.g. to a canonicalized form) after construction.
    pub url: String,
    /// The URL this item was constructed with, captured once and never
    /// mutated afterward. A scraper that rewrites `url` before calling
    /// `handle_file` still has the original here for the `Referer` header,
    /// independent of whatever `url` becomes.
    pub referer: String,
    /// Ordered sequence of ancestor URLs, for attribution ("came-from"
    /// tracing). Immutable once set, except via [`Self::reset`].
    pub parents: Vec<String>,
    /// Slash-joined path of ancestor album/profile titles, sanitized.
    pub parent_title: String,
    /// Whether this item belongs to an album/collection.
    pub part_of_album: bool,
    /// Opaque site-scoped album id.
    pub album_id: Option<String>,
    /// Unix seconds; used for file mtime and date-range filters.
    pub possible_datetime: Option<i64>,
    /// Collection-type classification.
    pub item_type: ItemType,
    /// Current child count.
    pub children: u32,
    /// Cap on children for this item's `item_type`.
    pub children_limit: u32,
    /// True if this item came from a `retry_*` input source.
    pub retry: bool,
    /// Output placement override when `retry` is true.
    pub retry_path: Option<std::path::PathBuf>,
}

impl ScrapeItem {
    /// Creates a fresh, top-level item (as the Dispatcher does from input).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            referer: url.clone(),
            url,
            parents: Vec::new(),
            parent_title: String::new(),
            part_of_album: false,
            album_id: None,
            possible_datetime: None,
            item_type: ItemType::None,
            children: 0,
            children_limit: default_limit_for(ItemType::None),
            retry: false,
            retry_path: None,
        }
    }

    /// Deep-clones `self` as a child of `child_url`: appends `self.referer`
    /// (the pre-rewrite URL, so a canonicalizing scraper doesn't lose the
    /// original referer) to `parents`, sets `part_of_album = true`, and
    /// optionally extends `parent_title`. Retried items (`self.retry ==
    /// true`) or an empty title never extend the title, per
    /// `add_to_parent_title`'s no-op rule.
    #[must_use]
    pub fn create_child(&self, child_url: impl Into<String>, extend_title: Option<&str>) -> Self {
        let mut parents = self.parents.clone();
        parents.push(self.referer.clone());

        let parent_title = match extend_title {
            Some(title) if !self.retry && !title.is_empty() => {
                if self.parent_title.is_empty() {
                    title.to_string()
                } else {
                    format!("{}/{}", self.parent_title, title)
                }
            }
            _ => self.parent_title.clone(),
        };

        let child_url = child_url.into();
        Self {
            referer: child_url.clone(),
            url: child_url,
            parents,
            parent_title,
            part_of_album: true,
            album_id: self.album_id.clone(),
            possible_datetime: self.possible_datetime,
            item_type: ItemType::None,
            children: 0,
            children_limit: default_limit_for(ItemType::None),
            retry: self.retry,
            retry_path: self.retry_path.clone(),
        }
    }

    /// Sets `item_type` and resets `children`/`children_limit` from the
    /// per-type default table.
    pub fn set_type(&mut self, item_type: ItemType) {
        self.item_type = item_type;
        self.children = 0;
        self.children_limit = default_limit_for(item_type);
    }

    /// Marks this item as an album root.
    pub fn setup_as_album(&mut self, album_id: impl Into<String>) {
        self.set_type(ItemType::Album);
        self.part_of_album = true;
        self.album_id = Some(album_id.into());
    }

    /// Marks this item as a profile root.
    pub fn setup_as_profile(&mut self) {
        self.set_type(ItemType::Profile);
    }

    /// Marks this item as a forum thread root.
    pub fn setup_as_forum(&mut self) {
        self.set_type(ItemType::Forum);
    }

    /// Marks this item as a single forum post.
    pub fn setup_as_post(&mut self) {
        self.set_type(ItemType::ForumPost);
    }

    /// Increments the child counter by `n`, returning
    /// [`MaxChildrenReached`] once the limit is hit (and nonzero) instead
    /// of erroring.
    pub fn add_children(&mut self, n: u32) -> Result<(), MaxChildrenReached> {
        if self.children_limit != 0 && self.children >= self.children_limit {
            return Err(MaxChildrenReached);
        }
        self.children = self.children.saturating_add(n);
        Ok(())
    }

    /// Clears `album_id`, `possible_datetime`, and `item_type` — for
    /// handing this item to a different sub-scraper with a fresh identity.
    /// Optionally also clears `parents`/`parent_title`.
    pub fn reset(&mut self, reset_parents: bool, reset_parent_title: bool) {
        self.album_id = None;
        self.possible_datetime = None;
        self.item_type = ItemType::None;
        self.children = 0;
        self.children_limit = default_limit_for(ItemType::None);
        if reset_parents {
            self.parents.clear();
        }
        if reset_parent_title {
            self.parent_title.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_child_appends_parent_and_extends_title() {
        let root = ScrapeItem::new("https://x.test/album/1");
        let child = root.create_child("https://x.test/album/1/img.jpg", Some("My Album"));
        assert_eq!(child.parents, vec!["https://x.test/album/1".to_string()]);
        assert_eq!(child.parent_title, "My Album");
        assert!(child.part_of_album);
    }

    #[test]
    fn referer_survives_an_in_place_url_rewrite() {
        let mut item = ScrapeItem::new("https://cdn.example.com/redirect/abc");
        item.url = "https://cdn.example.com/canonical/abc".to_string();
        assert_eq!(item.referer, "https://cdn.example.com/redirect/abc");

        let child = item.create_child("https://cdn.example.com/canonical/abc/1.jpg", None);
        assert_eq!(child.parents, vec!["https://cdn.example.com/redirect/abc".to_string()]);
        assert_eq!(child.referer, "https://cdn.example.com/canonical/abc/1.jpg");
    }

    #[test]
    fn create_child_nests_titles() {
        let mut root = ScrapeItem::new("https://x.test/profile/u");
        root.parent_title = "Creator".to_string();
        let child = root.create_child("https://x.test/profile/u/album/1", Some("Album One"));
        assert_eq!(child.parent_title, "Creator/Album One");
    }

    #[test]
    fn retried_items_never_extend_title() {
        let mut root = ScrapeItem::new("https://x.test/a");
        root.retry = true;
        root.parent_title = "Original".to_string();
        let child = root.create_child("https://x.test/a/1", Some("Ignored"));
        assert_eq!(child.parent_title, "Original");
    }

    #[test]
    fn add_children_returns_sentinel_at_limit() {
        let mut item = ScrapeItem::new("https://x.test/album/1");
        item.set_type(ItemType::Album);
        item.children_limit = 2;
        assert!(item.add_children(1).is_ok());
        assert!(item.add_children(1).is_ok());
        assert_eq!(item.add_children(1), Err(MaxChildrenReached));
    }

    #[test]
    fn set_type_resets_counters() {
        let mut item = ScrapeItem::new("https://x.test/a");
        item.children = 5;
        item.set_type(ItemType::Profile);
        assert_eq!(item.children, 0);
        assert_eq!(item.item_type, ItemType::Profile);
    }

    #[test]
    fn reset_clears_identity_but_can_keep_lineage() {
        let mut item = ScrapeItem::new("https://x.test/a");
        item.album_id = Some("abc".to_string());
        item.possible_datetime = Some(123);
        item.parents.push("https://x.test".to_string());
        item.parent_title = "Title".to_string();

        item.reset(false, false);
        assert!(item.album_id.is_none());
        assert!(item.possible_datetime.is_none());
        assert_eq!(item.parents.len(), 1);
        assert_eq!(item.parent_title, "Title");

        item.reset(true, true);
        assert!(item.parents.is_empty());
        assert!(item.parent_title.is_empty());
    }
}
