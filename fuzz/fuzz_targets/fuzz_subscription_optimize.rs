#![no_main]
use libfuzzer_sys::fuzz_target;
use nostr_feeds::{optimize_subscriptions, Subscription};

fuzz_target!(|data: &[u8]| {
    if let Ok(subscriptions) = serde_json::from_slice::<Vec<Subscription>>(data) {
        let plan: Vec<Subscription> = optimize_subscriptions(&subscriptions).collect();
        for sub in &plan {
            assert_eq!(sub.relays.len(), 1);
        }
    }
});
