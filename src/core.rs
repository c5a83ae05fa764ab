/*
 * This module consolidates the core logic of the application. It re-exports
 * the XML document tree, the comment codec and indentation heuristics the
 * editing passes are built on, the normalizer and activation engine, the
 * backup rotation, and the persistent settings (including the abstraction
 * `SettingsStoreOperations` the CLI layer is written against).
 */
pub mod backup;
pub mod comment_codec;
pub mod indent;
pub mod normalizer;
pub mod path_utils;
pub mod processor;
pub mod settings;
pub mod xml_tree;

// Re-export the document tree
pub use xml_tree::{Comment, Document, Element, XmlError, XmlNode};

// Re-export the editing primitives
pub use comment_codec::{
    element_to_comment, replace_child_at, replace_comment_with_element,
    try_parse_comment_as_element,
};
pub use indent::{detect_indent_width, get_indent};
pub use normalizer::normalize;

// Re-export activation related items
pub use processor::{
    Category, DatasourceProcessor, ProcessorError, activate_connection_url, activate_user,
    collect_candidates,
};

// Re-export backup related items
pub use backup::{BackupError, backup_file};

// Re-export settings related items
pub use settings::{CoreSettingsStore, Settings, SettingsError, SettingsStoreOperations};
