use std::sync::Arc;
use std::thread;

use chat_access_registry::{CanonicalName, Registry, RegistryError};

#[test]
fn concurrent_registration_of_one_name_has_a_single_winner() {
    let registry = Arc::new(Registry::new());
    let name = CanonicalName::parse("racer").expect("valid name");

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let registry = registry.clone();
            let name = name.clone();
            thread::spawn(move || registry.register(&name, &format!("UKEY{i}")))
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("thread completes"))
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(RegistryError::AlreadyExists { .. })))
        .count();

    assert_eq!(winners, 1);
    assert_eq!(rejected, 31);
    assert_eq!(registry.len(), 1);
}
