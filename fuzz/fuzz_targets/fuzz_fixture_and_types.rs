#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Raw equipment types must normalize the same way after folding.
    let kind = hvac_core::normalize_type(data);
    assert_eq!(kind, hvac_core::normalize_type(&hvac_core::kind::fold_type(data)));

    let _ = hvac_adapters::JsonFixtureStore::from_json(data);
});
