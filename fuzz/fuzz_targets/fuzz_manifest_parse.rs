#![no_main]

use cytoframe::Index;
use libfuzzer_sys::fuzz_target;

// Any text either fails with a line-numbered error or parses into an index
// whose saved form parses back to the same index.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(index) = Index::parse(text, ".") else {
        return;
    };
    // A leading byte-order mark is dropped on parse, so such a first
    // filename cannot survive a save.
    if index
        .entries()
        .first()
        .is_some_and(|entry| entry.filename.starts_with('\u{feff}'))
    {
        return;
    }
    let saved = index.to_manifest();
    let reparsed = Index::parse(&saved, ".").expect("saved manifest must parse");
    assert_eq!(reparsed, index);
    for tag in index.all_tags() {
        let legend = index.legend(tag).expect("legend per tag");
        for value in index.all_values_for_tag(tag) {
            let code = legend.code_of(&value).expect("code per value");
            assert_eq!(legend.label_of(code), Some(value.as_str()));
        }
    }
});
