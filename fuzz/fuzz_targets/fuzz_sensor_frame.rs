#![no_main]

use libfuzzer_sys::fuzz_target;
use trafficmind::transport::SensorFrame;

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);
    if let Ok(frame) = SensorFrame::parse(&line) {
        // Anything accepted must render back to a line that parses the same
        let again = SensorFrame::parse(&frame.to_line()).expect("rendered frame must parse");
        assert_eq!(frame, again);
    }
});
