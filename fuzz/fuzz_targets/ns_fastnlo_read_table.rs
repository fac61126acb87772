#![no_main]

use libfuzzer_sys::fuzz_target;
use ns_fastnlo::FastNloTable;

fuzz_target!(|data: &[u8]| {
    if let Ok(table) = FastNloTable::read_bytes(data) {
        // Anything that decodes must survive a re-encode.
        let text = table.write_string();
        let again = FastNloTable::read_str(&text);
        assert!(again.is_ok(), "re-encoded table failed to decode: {:?}", again.err());
    }
});
