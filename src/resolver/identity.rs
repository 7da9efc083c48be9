//! Identity strings derived from external references.
//!
//! A resolved identity is appended to ids as `<id>$<identity>`. For git-backed
//! definitions the identity is the commit hash; for registry images it is the
//! normalized tag made safe for identifiers.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::git::parse_git_url;
use crate::topology::ContainerDefinition;

/// Separator between an id and its resolved identity.
pub const IDENTITY_SEPARATOR: char = '$';

/// Tag used when an image name carries none.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// `id` with `identity` appended after [`IDENTITY_SEPARATOR`].
#[must_use]
pub fn suffixed(id: &str, identity: &str) -> String {
    format!("{id}{IDENTITY_SEPARATOR}{identity}")
}

/// Image name in `name:tag` form, adding `:latest` when no `:` is present.
#[must_use]
pub fn normalize_image_tag(name: &str) -> String {
    if name.contains(':') {
        name.to_string()
    } else {
        format!("{name}:{DEFAULT_IMAGE_TAG}")
    }
}

/// Identifier-safe form of a normalized tag.
///
/// Only the first `:`, the first `-` and the first `/` are replaced (with `_`, `.` and
/// `.` respectively). Ids of already deployed systems were generated this way, so
/// later occurrences stay as they are.
#[must_use]
pub fn tag_suffix(tag: &str) -> String {
    tag.replacen(':', "_", 1).replacen('-', ".", 1).replacen('/', ".", 1)
}

/// Where the synchronizer keeps the checkout of a git-backed definition:
/// `<repo_path>/workspace/<checkoutDir or repository name>`.
///
/// The URL must parse even when `checkoutDir` is set.
pub fn checkout_path(repo_path: &Path, definition: &ContainerDefinition, url: &str) -> Result<PathBuf> {
    let parsed = parse_git_url(url)?;
    let dir = definition.checkout_dir().map_or(parsed.repo, str::to_string);
    Ok(repo_path.join("workspace").join(dir))
}
