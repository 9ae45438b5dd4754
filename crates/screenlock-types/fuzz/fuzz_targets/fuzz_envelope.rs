#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Any JSON value must classify as Ok, Failure or Malformed without panicking
    if let Ok(s) = std::str::from_utf8(data)
        && let Ok(value) = serde_json::from_str::<serde_json::Value>(s)
    {
        let _ = screenlock_types::Envelope::into_result(value);
    }
});
