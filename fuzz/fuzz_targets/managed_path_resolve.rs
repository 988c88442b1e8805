//! Fuzz harness for `ManagedRoot::resolve`.
//!
//! Any path that resolves must stay under the root, and none of its
//! components may carry the sidecar suffix.

#![no_main]
use std::path::{Component, Path};

use libfuzzer_sys::fuzz_target;
use sealkeep_core::ManagedRoot;

fuzz_target!(|data: &[u8]| {
    let Ok(relative) = std::str::from_utf8(data) else {
        return;
    };

    let root = ManagedRoot::new("/srv/sealkeep");
    let Ok(path) = root.resolve(relative) else {
        return;
    };

    assert!(path.absolute().starts_with(Path::new("/srv/sealkeep")));
    assert!(path.relative().components().all(|c| match c {
        Component::Normal(part) => !part.to_string_lossy().ends_with(".meta"),
        _ => false,
    }));
});
