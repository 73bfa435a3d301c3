// SPDX-License-Identifier: MIT
#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::path::Path;

use pixsort::renamer::{class_tag, target_file_name};
use pixsort::workspace::sanitize_file_name;

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    upload_name: &'a str,
    label: &'a str,
    index: usize,
}

fuzz_target!(|input: Input<'_>| {
    let name = sanitize_file_name(input.upload_name);
    assert!(!name.is_empty());
    assert!(!name.starts_with('.'));
    assert!(!name.contains('/') && !name.contains('\\'));

    let tag = class_tag(input.label);
    assert!(!tag.contains('_'));

    let target = target_file_name(tag, input.index, Path::new(&name));
    assert!(target.starts_with(tag));
});
