use joinrate::{
    AdminCommand, Arrival, ChannelSink, Decision, JoinRate, JoinRateBuilder, JoinRateError,
    JsonFilePolicyStore, MemoryPolicyStore, Policy, PolicyStore, StoreError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn engine_over(store: Arc<dyn PolicyStore>) -> JoinRate {
    JoinRateBuilder::new(store)
        .store_synced(true)
        .build()
        .unwrap()
}

#[test]
fn test_reference_timeline() {
    let (sink, warnings) = ChannelSink::new();
    let engine = JoinRateBuilder::new(Arc::new(MemoryPolicyStore::new()))
        .sink(sink)
        .store_synced(true)
        .build()
        .unwrap();

    let timeline = [0, 0, 0, 0, 0, 0, 1, 1, 1];
    let decisions: Vec<Decision> = timeline
        .iter()
        .map(|&t| engine.on_arrival("#chan", t).unwrap())
        .collect();

    use Decision::*;
    assert_eq!(
        decisions,
        vec![
            Admit,
            Admit,
            Admit,
            Admit,
            Admit,
            Warn,
            Admit,
            WarnSuppressedByPolicy,
            WarnSuppressedByPolicy
        ]
    );

    let warning = warnings.try_recv().unwrap();
    assert_eq!(
        warning.to_string(),
        "JOINRATE: #chan exceeds warning threshold (5 joins in 5s)"
    );
    assert!(warnings.try_recv().is_err());
}

#[test]
fn test_warning_cooldown() {
    let (sink, warnings) = ChannelSink::new();
    let engine = JoinRateBuilder::new(Arc::new(MemoryPolicyStore::new()))
        .sink(sink)
        .store_synced(true)
        .build()
        .unwrap();
    engine.set("#slow", 1, 3600).unwrap();

    assert_eq!(engine.on_arrival("#slow", 0).unwrap(), Decision::Admit);
    assert_eq!(engine.on_arrival("#slow", 0).unwrap(), Decision::Warn);
    assert_eq!(
        engine.on_arrival("#slow", 29).unwrap(),
        Decision::WarnSuppressedByPolicy
    );
    assert_eq!(engine.on_arrival("#slow", 30).unwrap(), Decision::Warn);
    assert_eq!(
        engine.on_arrival("#slow", 31).unwrap(),
        Decision::WarnSuppressedByPolicy
    );

    assert_eq!(warnings.try_iter().count(), 2);
}

#[test]
fn test_override_applies_from_full_bucket() {
    let engine = engine_over(Arc::new(MemoryPolicyStore::new()));
    for _ in 0..5 {
        engine.on_arrival("#c", 0).unwrap();
    }
    assert_eq!(engine.on_arrival("#c", 0).unwrap(), Decision::Warn);

    engine.set("#c", 10, 10).unwrap();
    for _ in 0..10 {
        assert_eq!(engine.on_arrival("#c", 0).unwrap(), Decision::Admit);
    }
    // Cooldown state survives invalidation.
    assert_eq!(
        engine.on_arrival("#c", 0).unwrap(),
        Decision::WarnSuppressedByPolicy
    );
}

#[test]
fn test_default_fallback_and_reset() {
    let store = Arc::new(MemoryPolicyStore::new());
    let engine = engine_over(store.clone());

    assert_eq!(store.get("DEFAULT"), Some(Policy::default_policy(5, 5)));

    engine.set("#x", 1, 1).unwrap();
    assert!(!engine.get("#x").unwrap().is_default);

    assert!(engine.reset("#x").unwrap());
    assert!(!engine.reset("#x").unwrap());
    let policy = engine.get("#x").unwrap();
    assert!(policy.is_default);
    assert_eq!((policy.rate, policy.window), (5, 5));
    assert!(store.get("#x").is_none());
}

#[test]
fn test_disabled_policy_is_inert() {
    let engine = engine_over(Arc::new(MemoryPolicyStore::with_policies([
        Policy::new("#bots", -1, 10),
    ])));

    for t in 0..100 {
        assert_eq!(engine.on_arrival("#bots", t).unwrap(), Decision::AdmitSilently);
    }
    assert!(engine.bucket("#bots").is_none());
    assert_eq!(engine.stats().admitted_silently, 100);
}

#[test]
fn test_host_gating() {
    let engine = engine_over(Arc::new(MemoryPolicyStore::new()));

    assert_eq!(engine.observe(&Arrival::new("#a", 0).during_burst()).unwrap(), None);
    assert_eq!(
        engine
            .observe(&Arrival::new("#a", 0).from_privileged_origin())
            .unwrap(),
        None
    );
    assert!(engine.bucket("#a").is_none());

    assert_eq!(
        engine.observe(&Arrival::new("#a", 0)).unwrap(),
        Some(Decision::Admit)
    );
}

#[test]
fn test_json_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("joinrate.json");

    {
        let engine = engine_over(Arc::new(JsonFilePolicyStore::new(&path)));
        let cmd = AdminCommand::parse(&["SET", "#Rust", "20", "10"]).unwrap();
        assert_eq!(
            engine.execute(&cmd).unwrap().to_string(),
            "Joinrate warning threshold for #Rust is now set to 20 joins in 10s"
        );
        engine.set("#gone", 1, 1).unwrap();
        engine.reset("#gone").unwrap();
    }

    let text = std::fs::read_to_string(&path).unwrap();
    let mut records: Vec<Policy> = serde_json::from_str(&text).unwrap();
    records.sort_by(|a, b| a.key.cmp(&b.key));
    assert_eq!(
        records,
        vec![Policy::new("#rust", 20, 10), Policy::default_policy(5, 5)]
    );

    let engine = engine_over(Arc::new(JsonFilePolicyStore::new(&path)));
    let reply = engine
        .execute(&AdminCommand::Get { key: "#rust".into() })
        .unwrap();
    assert_eq!(
        reply.to_string(),
        "Joinrate warning threshold for #rust is set to 20 joins in 10s"
    );
}

#[test]
fn test_corrupt_store_fails_build() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("joinrate.json");
    std::fs::write(&path, "not json").unwrap();

    let result = JoinRateBuilder::new(Arc::new(JsonFilePolicyStore::new(&path)))
        .store_synced(true)
        .build();
    assert!(matches!(
        result,
        Err(JoinRateError::Store(StoreError::Format(_)))
    ));
}

#[test]
fn test_arrival_before_store_loaded() {
    let engine = JoinRateBuilder::new(Arc::new(MemoryPolicyStore::new()))
        .build()
        .unwrap();

    assert!(matches!(
        engine.on_arrival("#early", 0),
        Err(JoinRateError::UninitializedDefault)
    ));
    assert!(engine.bucket("#early").is_none());
    assert_eq!(engine.stats().rejected_uninitialized, 1);

    engine.store_loaded().unwrap();
    assert_eq!(engine.on_arrival("#early", 0).unwrap(), Decision::Admit);
}

#[test]
fn test_store_loaded_races_arrivals() {
    let store = Arc::new(MemoryPolicyStore::new());
    let engine = Arc::new(
        JoinRateBuilder::new(store.clone())
            .build()
            .unwrap(),
    );
    let barrier = Arc::new(Barrier::new(5));
    let loaded = Arc::new(AtomicBool::new(false));
    let mut handles = vec![];

    for i in 0..4 {
        let (engine, barrier, loaded) = (engine.clone(), barrier.clone(), loaded.clone());
        handles.push(thread::spawn(move || {
            let key = format!("#c{}", i);
            barrier.wait();
            loop {
                let done = loaded.load(Ordering::Acquire);
                match engine.on_arrival(&key, 0) {
                    Ok(decision) => return decision,
                    Err(JoinRateError::UninitializedDefault) => {
                        assert!(!done, "rejected after store_loaded returned");
                        thread::yield_now();
                    }
                    Err(err) => panic!("unexpected error: {}", err),
                }
            }
        }));
    }

    barrier.wait();
    assert!(engine.store_loaded().unwrap());
    loaded.store(true, Ordering::Release);

    for handle in handles {
        assert_eq!(handle.join().unwrap(), Decision::Admit);
    }
    assert_eq!(store.len(), 1);
    assert!(!engine.store_loaded().unwrap());
}

#[test]
fn test_concurrent_keys_are_independent() {
    let engine = Arc::new(engine_over(Arc::new(MemoryPolicyStore::new())));
    let mut handles = vec![];

    for i in 0..8 {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            let key = format!("#room{}", i);
            (0..6)
                .map(|_| engine.on_arrival(&key, 0).unwrap())
                .filter(|d| *d == Decision::Admit)
                .count()
        }));
    }

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 5);
    }
    let stats = engine.stats();
    assert_eq!(stats.admitted, 40);
    assert_eq!(stats.warned, 8);
    assert_eq!(stats.tracked_buckets, 8);
}

#[test]
fn test_set_default_moves_shared_buckets() {
    let engine = engine_over(Arc::new(MemoryPolicyStore::new()));
    engine.on_arrival("#a", 0).unwrap();

    let cmd = AdminCommand::parse(&["SET", "default", "2", "60"]).unwrap();
    engine.execute(&cmd).unwrap();

    assert_eq!(engine.on_arrival("#a", 0).unwrap(), Decision::Admit);
    assert_eq!(engine.on_arrival("#a", 0).unwrap(), Decision::Admit);
    assert_eq!(engine.on_arrival("#a", 0).unwrap(), Decision::Warn);
}
