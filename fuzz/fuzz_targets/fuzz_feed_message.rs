#![no_main]

use libfuzzer_sys::fuzz_target;
use trafficmind::transport::FeedMessage;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = serde_json::from_slice::<FeedMessage>(data) {
        let _ = message.into_command();
    }
});
