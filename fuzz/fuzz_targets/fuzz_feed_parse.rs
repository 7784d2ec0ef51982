#![no_main]
use libfuzzer_sys::fuzz_target;
use nostr_feeds::Feed;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(feed) = Feed::from_json(s) {
            // Whatever decodes must encode and decode to the same tree.
            let again = Feed::from_value(feed.to_value()).expect("re-decode");
            assert_eq!(again, feed);
        }
    }
});
