#![no_main]

use edb_client::ConnectOptions;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = ConnectOptions::from_dsn(s).resolve();
    }
});
