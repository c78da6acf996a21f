#![no_main]

use herald::core::package::Package;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(package) = Package::from_wire(data) {
        let wire = package.to_wire().expect("decoded package must encode");
        let again = Package::from_wire(wire.as_bytes()).expect("encoded package must decode");
        assert_eq!(again.destination(), package.destination());
        assert_eq!(again.source(), package.source());
    }
});
