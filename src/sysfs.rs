// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Device node resolution through `/sys/dev/char`.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves character device numbers to `/dev` paths.
#[derive(Clone, Debug)]
pub struct Sysfs {
    root: PathBuf,
}

impl Default for Sysfs {
    fn default() -> Self {
        Sysfs::new("/sys")
    }
}

impl Sysfs {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Sysfs {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Device node of the character device `major:minor`, or `None` if sysfs
    /// has no entry for it.
    ///
    /// DVB targets such as `dvb0.frontend0` live under `/dev/dvb/adapter0/`.
    pub fn devname(&self, major: u32, minor: u32) -> Option<String> {
        let link = self.root.join(format!("dev/char/{major}:{minor}"));
        let target = match std::fs::read_link(&link) {
            Ok(target) => target,
            Err(err) => {
                debug!("readlink {} failed: {}", link.display(), err);
                return None;
            }
        };
        let name = target.file_name()?.to_str()?;
        devname_from_target(name)
    }
}

/// Map the last component of a sysfs device link to its `/dev` path.
pub fn devname_from_target(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }

    match name.strip_prefix("dvb") {
        Some(rest) => {
            let (adapter, node) = rest.split_once('.')?;
            Some(format!("/dev/dvb/adapter{adapter}/{node}"))
        }
        None => Some(format!("/dev/{name}")),
    }
}
