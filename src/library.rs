//! A minimal read-only snapshot of the on-disk collection, keyed by
//! "simplified" names. Full filesystem scanning and indexing is an external
//! collaborator's job; this exists only so dispatch has a library to resolve
//! URLs against. Grounded on `original_source/munic.py`'s `load_library`
//! (recursive directory dict keyed by simplified name, one "graphic" image
//! per directory) and on `crates/collection/src/util.rs`'s `is_audio`
//! extension list; walks directories with the `walkdir` crate the way
//! `resonance-stream-resonance` does for its own library snapshot.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use log::{info, warn};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "ogg", "wav", "flac", "wma"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Returns a canonicalized search key for a directory or file stem: accents
/// stripped, lower-cased, a leading "the" removed, anything non-alphanumeric
/// dropped.
pub fn simplify_name(name: &str) -> String {
    let unaccented: String = name.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let lower = unaccented.to_lowercase();
    let without_the = strip_leading_the(&lower);
    without_the.chars().filter(|c| c.is_alphanumeric()).collect()
}

fn strip_leading_the(s: &str) -> &str {
    match s.strip_prefix("the") {
        Some(rest) if rest.chars().next().map_or(true, |c| !c.is_alphanumeric()) => rest,
        _ => s,
    }
}

#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub real_path: PathBuf,
    pub stored_extension: String,
}

#[derive(Debug, Default)]
pub struct LibraryNode {
    /// Properly-formatted name for display, e.g. in a menu built by an
    /// external collaborator - not consulted by dispatch itself.
    pub display_name: String,
    pub real_path: PathBuf,
    pub media: HashMap<String, MediaEntry>,
    pub dirs: HashMap<String, LibraryNode>,
    /// Literal on-disk filename of this directory's album art, paired with
    /// its real path - matched by exact name, not simplified, since art is
    /// requested by its actual filename.
    pub graphic: Option<(String, PathBuf)>,
}

impl LibraryNode {
    fn scan(dir: &Path) -> Self {
        let mut node = LibraryNode {
            real_path: dir.to_path_buf(),
            ..LibraryNode::default()
        };
        let mut best_graphic: Option<(String, PathBuf, u64)> = None;

        let entries = match WalkDir::new(dir).min_depth(1).max_depth(1).into_iter().collect::<Result<Vec<_>, _>>() {
            Ok(e) => e,
            Err(e) => {
                warn!("error reading directory {:?}: {}", dir, e);
                return node;
            }
        };

        for entry in entries {
            let path = entry.path();
            if entry.file_type().is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let mut child = LibraryNode::scan(path);
                child.display_name = name.clone();
                node.dirs.insert(simplify_name(&name), child);
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(ext) = path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()) else {
                continue;
            };
            if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                node.media.insert(
                    simplify_name(stem),
                    MediaEntry {
                        real_path: path.to_path_buf(),
                        stored_extension: ext,
                    },
                );
            } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if best_graphic.as_ref().map_or(true, |(_, _, best)| size > *best) {
                    let filename = entry.file_name().to_string_lossy().into_owned();
                    best_graphic = Some((filename, path.to_path_buf(), size));
                }
            }
        }

        node.graphic = best_graphic.map(|(name, path, _)| (name, path));
        node
    }
}

pub struct Library {
    root: LibraryNode,
}

/// What a URL path resolved to within the library.
pub enum ResolvedTarget {
    Graphic(PathBuf),
    Media {
        real_path: PathBuf,
        stored_extension: String,
        requested_extension: String,
    },
}

impl Library {
    /// Scans every root in `media_dirs`, merging them into one tree -
    /// directories (and their media) present in more than one root overlay
    /// rather than overwrite.
    pub fn scan(media_dirs: &[PathBuf]) -> Self {
        let mut root = LibraryNode::default();
        for dir in media_dirs {
            info!("scanning media dir {:?}", dir);
            merge(&mut root, LibraryNode::scan(dir));
        }
        Library { root }
    }

    /// Resolves a request path (no leading/trailing slash required) to a
    /// library node's file. `None` covers every failure mode - unknown
    /// directory, unknown basename, or a path with no filename segment.
    pub fn resolve(&self, url_path: &str) -> Option<ResolvedTarget> {
        let mut segments = url_path.split('/').filter(|s| !s.is_empty()).peekable();
        let mut node = &self.root;
        let mut filename = None;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                filename = Some(segment);
                break;
            }
            node = node.dirs.get(&simplify_name(segment))?;
        }
        let filename = filename?;

        if let Some((graphic_name, graphic_path)) = &node.graphic {
            if graphic_name == filename {
                return Some(ResolvedTarget::Graphic(graphic_path.clone()));
            }
        }

        let (stem, ext) = filename.rsplit_once('.')?;
        let entry = node.media.get(&simplify_name(stem))?;
        Some(ResolvedTarget::Media {
            real_path: entry.real_path.clone(),
            stored_extension: entry.stored_extension.clone(),
            requested_extension: ext.to_lowercase(),
        })
    }
}

fn merge(into: &mut LibraryNode, from: LibraryNode) {
    for (name, entry) in from.media {
        into.media.entry(name).or_insert(entry);
    }
    if into.graphic.is_none() {
        into.graphic = from.graphic;
    }
    for (name, child) in from.dirs {
        match into.dirs.entry(name) {
            std::collections::hash_map::Entry::Occupied(mut existing) => {
                merge(existing.get_mut(), child);
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(child);
            }
        }
    }
}
