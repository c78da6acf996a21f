#![no_main]

use herald::protocol::handshake::{identify_message, parse_identify};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };

    // Anything accepted must be rebuildable into a line that parses the same way
    if let Ok(identification) = parse_identify(line) {
        let secret = line.rsplit(':').next().unwrap_or_default();
        let rebuilt = identify_message(identification.nid, &identification.link_type, secret);
        let reparsed = parse_identify(&rebuilt).expect("rebuilt line must parse");
        assert_eq!(reparsed, identification);
    }
});
