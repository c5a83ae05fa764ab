/*
 * Activation engine for datasource files. Per category (connection-url,
 * security) the document is rewritten so that exactly the requested
 * candidate is live and every competing candidate is a block comment.
 * URLs are fabricated into the first datasource when missing; users are
 * only ever switched between existing candidates.
 */
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::backup::{self, BackupError};
use crate::core::comment_codec::{
    element_to_comment, replace_comment_with_element, try_parse_comment_as_element,
};
use crate::core::indent::get_indent;
use crate::core::normalizer::normalize;
use crate::core::xml_tree::{Document, Element, XmlError, XmlNode};

#[derive(Debug)]
pub enum ProcessorError {
    Xml(XmlError),
    Backup(BackupError),
}

impl From<XmlError> for ProcessorError {
    fn from(err: XmlError) -> Self {
        ProcessorError::Xml(err)
    }
}

impl From<BackupError> for ProcessorError {
    fn from(err: BackupError) -> Self {
        ProcessorError::Backup(err)
    }
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorError::Xml(e) => write!(f, "{e}"),
            ProcessorError::Backup(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ProcessorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessorError::Xml(e) => Some(e),
            ProcessorError::Backup(e) => Some(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProcessorError>;

/// The two kinds of toggleable fragments a datasource file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    ConnectionUrl,
    Security,
}

impl Category {
    fn local_name(self) -> &'static str {
        match self {
            Category::ConnectionUrl => "connection-url",
            Category::Security => "security",
        }
    }
}

// The key a candidate is identified by: the URL text itself, or the
// user-name text inside a security block. Blank keys identify nothing.
fn candidate_key(element: &Element, category: Category) -> Option<String> {
    let text = match category {
        Category::ConnectionUrl => element.text.as_deref(),
        Category::Security => element
            .find_descendant("user-name")
            .and_then(|user| user.text.as_deref()),
    }?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Distinct candidate keys of `category` across the whole document, both
/// live elements and comment payloads.
pub fn collect_candidates(document: &Document, category: Category) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    collect_into(&document.root, category, &mut keys);
    keys
}

fn collect_into(parent: &Element, category: Category, keys: &mut BTreeSet<String>) {
    for child in &parent.children {
        match child {
            XmlNode::Element(el) => {
                if el.local_name() == category.local_name() {
                    if let Some(key) = candidate_key(el, category) {
                        keys.insert(key);
                    }
                }
                collect_into(el, category, keys);
            }
            XmlNode::Comment(comment) => {
                if let Some(el) = try_parse_comment_as_element(comment) {
                    if el.local_name() == category.local_name() {
                        if let Some(key) = candidate_key(&el, category) {
                            keys.insert(key);
                        }
                    }
                }
            }
        }
    }
}

/// Makes `target_url` the single live connection-url. Matching comments
/// are re-activated; if the URL exists nowhere it is added to the first
/// datasource element; every other live URL is commented out. An empty
/// target leaves the category untouched.
pub fn activate_connection_url(document: &mut Document, target_url: &str) {
    if target_url.is_empty() {
        return;
    }
    uncomment_matching(&mut document.root, Category::ConnectionUrl, target_url);
    if !live_candidate_exists(&document.root, Category::ConnectionUrl, target_url) {
        ensure_connection_url_exists(document, target_url);
    }
    disable_other_live(&mut document.root, Category::ConnectionUrl, target_url);
}

/// Makes `target_username` the single live security block, but only when
/// that user already exists as a live or commented candidate. Unknown
/// users leave the document untouched; security blocks are never
/// fabricated.
pub fn activate_user(document: &mut Document, target_username: &str) {
    if target_username.is_empty() {
        return;
    }
    let found_live = live_candidate_exists(&document.root, Category::Security, target_username);
    let found_commented =
        uncomment_matching(&mut document.root, Category::Security, target_username);
    if found_live || found_commented {
        disable_other_live(&mut document.root, Category::Security, target_username);
    } else {
        log::debug!(
            "Processor: user {target_username:?} not found in any security block, leaving category untouched"
        );
    }
}

// Replaces every comment decoding to a candidate of `category` with key
// `key` by its live element. Returns whether any match was found.
fn uncomment_matching(parent: &mut Element, category: Category, key: &str) -> bool {
    let mut found = false;
    for idx in 0..parent.children.len() {
        let parsed = match &parent.children[idx] {
            XmlNode::Comment(comment) => try_parse_comment_as_element(comment)
                .filter(|el| el.local_name() == category.local_name()),
            XmlNode::Element(_) => None,
        };
        match parsed {
            Some(el) if candidate_key(&el, category).as_deref() == Some(key) => {
                log::debug!(
                    "Processor: re-activating commented {} candidate {key:?}",
                    category.local_name()
                );
                replace_comment_with_element(parent, idx, el);
                found = true;
            }
            _ => {
                if let XmlNode::Element(child) = &mut parent.children[idx] {
                    found |= uncomment_matching(child, category, key);
                }
            }
        }
    }
    found
}

fn live_candidate_exists(parent: &Element, category: Category, key: &str) -> bool {
    parent.children.iter().any(|child| match child {
        XmlNode::Element(el) => {
            (el.local_name() == category.local_name()
                && candidate_key(el, category).as_deref() == Some(key))
                || live_candidate_exists(el, category, key)
        }
        XmlNode::Comment(_) => false,
    })
}

// Comments out every live candidate of `category` whose key differs from
// `key`. A candidate without a usable key counts as differing.
fn disable_other_live(parent: &mut Element, category: Category, key: &str) {
    for idx in 0..parent.children.len() {
        let differs = matches!(
            parent.children[idx].as_element(),
            Some(el) if el.local_name() == category.local_name()
                && candidate_key(el, category).as_deref() != Some(key)
        );
        if differs {
            log::debug!(
                "Processor: disabling live {} candidate at child index {idx}",
                category.local_name()
            );
            element_to_comment(parent, idx);
        } else if let XmlNode::Element(child) = &mut parent.children[idx] {
            disable_other_live(child, category, key);
        }
    }
}

// Child-index path from the root to the first datasource element in
// document order. The root itself is handled separately by the caller.
fn first_datasource_path(parent: &Element, path: &mut Vec<usize>) -> bool {
    for (idx, child) in parent.children.iter().enumerate() {
        if let XmlNode::Element(el) = child {
            path.push(idx);
            if el.local_name() == "datasource" || first_datasource_path(el, path) {
                return true;
            }
            path.pop();
        }
    }
    false
}

// One past the last driver/connection-url/security child, the slot where
// a connection-url conventionally belongs.
fn insertion_index(datasource: &Element) -> usize {
    const ANCHORS: [&str; 3] = ["driver", "connection-url", "security"];
    datasource
        .children
        .iter()
        .enumerate()
        .filter(|(_, child)| {
            matches!(child.as_element(), Some(el) if ANCHORS.contains(&el.local_name()))
        })
        .map(|(idx, _)| idx + 1)
        .last()
        .unwrap_or(0)
}

fn ensure_connection_url_exists(document: &mut Document, target_url: &str) {
    let mut path = Vec::new();
    let found = document.root.local_name() == "datasource"
        || first_datasource_path(&document.root, &mut path);
    if !found {
        log::warn!("Processor: no datasource element found, cannot add url {target_url:?}");
        return;
    }
    // Indent of the datasource's own line and of its children, read before
    // taking the mutable walk down.
    let (ds_own, ds_child_indent) = if path.is_empty() {
        get_indent(None, 0)
    } else {
        let mut parent = &document.root;
        for &idx in &path[..path.len() - 1] {
            parent = match parent.children[idx].as_element() {
                Some(el) => el,
                None => return,
            };
        }
        get_indent(Some(parent), path[path.len() - 1])
    };
    let mut datasource = &mut document.root;
    for &idx in &path {
        datasource = match datasource.children[idx].as_element_mut() {
            Some(el) => el,
            None => return,
        };
    }
    let tag = datasource
        .find_descendant("connection-url")
        .map(|el| el.tag.clone())
        .unwrap_or_else(|| "connection-url".to_string());
    let index = insertion_index(datasource);
    let mut element = Element::new(&tag);
    element.text = Some(target_url.to_string());
    log::debug!("Processor: adding <{tag}> with {target_url:?} at child index {index}");
    if datasource.children.is_empty() {
        datasource.text = Some(format!("\n{ds_child_indent}"));
        element.tail = Some(format!("\n{ds_own}"));
        datasource.children.push(XmlNode::Element(element));
    } else if index == datasource.children.len() {
        let last = datasource.children.len() - 1;
        element.tail = datasource.children[last]
            .tail_mut()
            .take()
            .or_else(|| Some(format!("\n{ds_own}")));
        datasource.children[last].set_tail(Some(format!("\n{ds_child_indent}")));
        datasource.children.push(XmlNode::Element(element));
    } else {
        element.tail = Some(format!("\n{ds_child_indent}"));
        datasource.children.insert(index, XmlNode::Element(element));
    }
}

/// File-level entry points shared by the CLI commands: candidate listing,
/// in-memory previews, and the destructive apply with its backup.
pub struct DatasourceProcessor {
    backup_root: PathBuf,
    backup_limit: usize,
}

impl DatasourceProcessor {
    pub fn new(backup_root: &Path, backup_limit: usize) -> Self {
        DatasourceProcessor {
            backup_root: backup_root.to_path_buf(),
            backup_limit,
        }
    }

    /// Candidate URL and user keys of one file, live and commented alike.
    pub fn collect_urls_and_users(
        &self,
        path: &Path,
    ) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
        let document = Document::parse_file(path)?;
        Ok((
            collect_candidates(&document, Category::ConnectionUrl),
            collect_candidates(&document, Category::Security),
        ))
    }

    /// The document text `apply_changes_to_file` would write, without
    /// touching the file or the backup directory.
    pub fn preview_changes(
        &self,
        path: &Path,
        target_url: &str,
        target_username: &str,
    ) -> Result<String> {
        let mut document = Document::parse_file(path)?;
        normalize(&mut document);
        activate_connection_url(&mut document, target_url);
        activate_user(&mut document, target_username);
        Ok(document.to_xml_string())
    }

    /// Normalizes and activates, backs up the pre-edit file, then writes
    /// the result over the original. Returns the backup path.
    pub fn apply_changes_to_file(
        &self,
        path: &Path,
        target_url: &str,
        target_username: &str,
    ) -> Result<PathBuf> {
        log::info!(
            "Processor: applying url={target_url:?} user={target_username:?} to {path:?}"
        );
        let mut document = Document::parse_file(path)?;
        normalize(&mut document);
        activate_connection_url(&mut document, target_url);
        activate_user(&mut document, target_username);
        let backup_path = backup::backup_file(path, &self.backup_root, self.backup_limit)?;
        document.write_to_file(path)?;
        log::info!("Processor: wrote {path:?}, backup at {backup_path:?}");
        Ok(backup_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SCENARIO: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<datasources>\n    <datasource>\n        <driver>h2</driver>\n        <!--\n                <connection-url>jdbc:a</connection-url>\n        -->\n        <!--\n                <connection-url>jdbc:b</connection-url>\n        -->\n        <connection-url>jdbc:c</connection-url>\n    </datasource>\n</datasources>\n";

    const WITH_USERS: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<datasources>\n    <datasource>\n        <driver>h2</driver>\n        <connection-url>jdbc:c</connection-url>\n        <security>\n            <user-name>admin</user-name>\n        </security>\n        <!--\n                <security>\n                        <user-name>app_rw</user-name>\n                </security>\n        -->\n    </datasource>\n</datasources>\n";

    fn datasource(doc: &Document) -> &Element {
        doc.root.children[0].as_element().unwrap()
    }

    fn live_keys(doc: &Document, category: Category) -> Vec<String> {
        fn walk(parent: &Element, category: Category, out: &mut Vec<String>) {
            for child in &parent.children {
                if let XmlNode::Element(el) = child {
                    if el.local_name() == category.local_name() {
                        if let Some(key) = candidate_key(el, category) {
                            out.push(key);
                        }
                    }
                    walk(el, category, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&doc.root, category, &mut out);
        out
    }

    fn commented_keys(doc: &Document, category: Category) -> Vec<String> {
        fn walk(parent: &Element, category: Category, out: &mut Vec<String>) {
            for child in &parent.children {
                match child {
                    XmlNode::Comment(comment) => {
                        if let Some(el) = try_parse_comment_as_element(comment) {
                            if el.local_name() == category.local_name() {
                                if let Some(key) = candidate_key(&el, category) {
                                    out.push(key);
                                }
                            }
                        }
                    }
                    XmlNode::Element(el) => walk(el, category, out),
                }
            }
        }
        let mut out = Vec::new();
        walk(&doc.root, category, &mut out);
        out
    }

    #[test]
    fn test_collect_candidates_finds_live_and_commented() {
        let doc = Document::parse_str(SCENARIO).unwrap();
        let urls = collect_candidates(&doc, Category::ConnectionUrl);
        assert_eq!(
            urls.into_iter().collect::<Vec<_>>(),
            vec!["jdbc:a", "jdbc:b", "jdbc:c"]
        );

        let doc = Document::parse_str(WITH_USERS).unwrap();
        let users = collect_candidates(&doc, Category::Security);
        assert_eq!(users.into_iter().collect::<Vec<_>>(), vec!["admin", "app_rw"]);
    }

    #[test]
    fn test_collect_candidates_skips_blank_keys() {
        let input = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<datasources>\n    <datasource>\n        <connection-url>   </connection-url>\n        <security>\n            <password>x</password>\n        </security>\n        <!--<connection-url></connection-url>-->\n    </datasource>\n</datasources>\n";
        let doc = Document::parse_str(input).unwrap();
        assert!(collect_candidates(&doc, Category::ConnectionUrl).is_empty());
        assert!(collect_candidates(&doc, Category::Security).is_empty());
    }

    #[test]
    fn test_activate_url_switches_between_candidates() {
        let mut doc = Document::parse_str(SCENARIO).unwrap();
        normalize(&mut doc);
        activate_connection_url(&mut doc, "jdbc:b");

        assert_eq!(live_keys(&doc, Category::ConnectionUrl), vec!["jdbc:b"]);
        let mut commented = commented_keys(&doc, Category::ConnectionUrl);
        commented.sort();
        assert_eq!(commented, vec!["jdbc:a", "jdbc:c"]);
        // One driver plus three URL candidates, no fourth URL node.
        assert_eq!(datasource(&doc).children.len(), 4);
    }

    #[test]
    fn test_activate_url_is_idempotent_across_passes() {
        let mut doc = Document::parse_str(SCENARIO).unwrap();
        normalize(&mut doc);
        activate_connection_url(&mut doc, "jdbc:b");
        let first = doc.to_xml_string();

        let mut again = Document::parse_str(&first).unwrap();
        normalize(&mut again);
        activate_connection_url(&mut again, "jdbc:b");
        assert_eq!(again.to_xml_string(), first);
    }

    #[test]
    fn test_activate_url_fabricates_missing_target() {
        let mut doc = Document::parse_str(SCENARIO).unwrap();
        normalize(&mut doc);
        activate_connection_url(&mut doc, "jdbc:new");

        assert_eq!(live_keys(&doc, Category::ConnectionUrl), vec!["jdbc:new"]);
        let mut commented = commented_keys(&doc, Category::ConnectionUrl);
        commented.sort();
        assert_eq!(commented, vec!["jdbc:a", "jdbc:b", "jdbc:c"]);
        let ds = datasource(&doc);
        assert_eq!(ds.children.len(), 5);
        let added = ds.children[4].as_element().unwrap();
        assert_eq!(added.text.as_deref(), Some("jdbc:new"));
        assert_eq!(added.tail.as_deref(), Some("\n    "));
        // The previously last child now points at the new element's line.
        assert_eq!(ds.children[3].tail(), Some("\n        "));
    }

    #[test]
    fn test_activate_url_reuses_namespace_prefixed_tag() {
        let input = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<ds:datasources xmlns:ds=\"urn:jboss:domain:datasources:5.0\">\n    <ds:datasource>\n        <ds:driver>h2</ds:driver>\n        <ds:connection-url>jdbc:c</ds:connection-url>\n    </ds:datasource>\n</ds:datasources>\n";
        let mut doc = Document::parse_str(input).unwrap();
        normalize(&mut doc);
        activate_connection_url(&mut doc, "jdbc:new");

        let ds = datasource(&doc);
        assert_eq!(ds.children.len(), 3);
        let added = ds.children[2].as_element().unwrap();
        assert_eq!(added.tag, "ds:connection-url");
        assert_eq!(added.text.as_deref(), Some("jdbc:new"));
        assert_eq!(commented_keys(&doc, Category::ConnectionUrl), vec!["jdbc:c"]);
    }

    #[test]
    fn test_activate_url_without_datasource_adds_nothing() {
        let input = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<config>\n    <connection-url>jdbc:c</connection-url>\n</config>\n";
        let mut doc = Document::parse_str(input).unwrap();
        activate_connection_url(&mut doc, "jdbc:new");

        assert!(live_keys(&doc, Category::ConnectionUrl).is_empty());
        assert_eq!(commented_keys(&doc, Category::ConnectionUrl), vec!["jdbc:c"]);
        assert_eq!(doc.root.children.len(), 1);
    }

    #[test]
    fn test_activate_url_with_empty_target_is_noop() {
        let mut doc = Document::parse_str(SCENARIO).unwrap();
        activate_connection_url(&mut doc, "");
        assert_eq!(doc.to_xml_string(), SCENARIO);
    }

    #[test]
    fn test_activate_user_switches_security_blocks() {
        let mut doc = Document::parse_str(WITH_USERS).unwrap();
        normalize(&mut doc);
        activate_user(&mut doc, "app_rw");

        assert_eq!(live_keys(&doc, Category::Security), vec!["app_rw"]);
        assert_eq!(commented_keys(&doc, Category::Security), vec!["admin"]);
        let live = datasource(&doc).children[3].as_element().unwrap();
        assert_eq!(live.text.as_deref(), Some("\n                "));
        assert_eq!(live.children[0].tail(), Some("\n        "));
    }

    #[test]
    fn test_activate_user_unknown_target_leaves_document_untouched() {
        let mut doc = Document::parse_str(WITH_USERS).unwrap();
        activate_user(&mut doc, "ghost");
        assert_eq!(doc.to_xml_string(), WITH_USERS);
    }

    #[test]
    fn test_activate_user_with_empty_target_is_noop() {
        let mut doc = Document::parse_str(WITH_USERS).unwrap();
        activate_user(&mut doc, "");
        assert_eq!(doc.to_xml_string(), WITH_USERS);
    }

    #[test]
    fn test_apply_changes_backs_up_the_pre_edit_file() {
        let work = tempdir().unwrap();
        let backups = tempdir().unwrap();
        let path = work.path().join("prod-ds.xml");
        fs::write(&path, SCENARIO).unwrap();

        let processor = DatasourceProcessor::new(backups.path(), 5);
        let expected = processor.preview_changes(&path, "jdbc:b", "").unwrap();
        let backup_path = processor.apply_changes_to_file(&path, "jdbc:b", "").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), expected);
        assert_eq!(fs::read_to_string(&backup_path).unwrap(), SCENARIO);
        assert!(backup_path.starts_with(backups.path().join("prod-ds_backup")));
    }

    #[test]
    fn test_preview_leaves_disk_untouched() {
        let work = tempdir().unwrap();
        let backups = tempdir().unwrap();
        let path = work.path().join("prod-ds.xml");
        fs::write(&path, SCENARIO).unwrap();

        let processor = DatasourceProcessor::new(backups.path(), 5);
        let preview = processor.preview_changes(&path, "jdbc:b", "").unwrap();

        assert!(preview.contains("<connection-url>jdbc:b</connection-url>"));
        assert_eq!(fs::read_to_string(&path).unwrap(), SCENARIO);
        assert_eq!(fs::read_dir(backups.path()).unwrap().count(), 0);
    }
}
