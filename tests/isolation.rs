use deterministic_keygen::ambient::{self, rng::fill_random, AmbientRng};
use deterministic_keygen::derivation::DerivationError;
use deterministic_keygen::engine::{
    BundledEngine, EngineError, GeneratedKeyPair, KeyEngine, KeyRequest,
};
use deterministic_keygen::{DeriverConfig, KeyDeriver};
use rand::RngCore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Draws more bytes than the buffer holds, through the fallible API
struct GreedyEngine;

impl KeyEngine for GreedyEngine {
    fn generate_key_pair(&self, _request: &KeyRequest) -> Result<GeneratedKeyPair, EngineError> {
        let mut bytes = vec![0u8; 4096];
        fill_random(&mut bytes).map_err(|e| EngineError::Randomness(e.to_string()))?;
        Err(EngineError::Internal("unreachable".into()))
    }

    fn read_fingerprint(&self, _public_key: &str) -> Result<String, EngineError> {
        Err(EngineError::Internal("unused".into()))
    }
}

/// Draws more bytes than the buffer holds through `RngCore`, which panics
struct PanickingEngine;

impl KeyEngine for PanickingEngine {
    fn generate_key_pair(&self, _request: &KeyRequest) -> Result<GeneratedKeyPair, EngineError> {
        let mut bytes = vec![0u8; 4096];
        AmbientRng.fill_bytes(&mut bytes);
        Err(EngineError::Internal("unreachable".into()))
    }

    fn read_fingerprint(&self, _public_key: &str) -> Result<String, EngineError> {
        Err(EngineError::Internal("unused".into()))
    }
}

struct FailingEngine;

impl KeyEngine for FailingEngine {
    fn generate_key_pair(&self, _request: &KeyRequest) -> Result<GeneratedKeyPair, EngineError> {
        Err(EngineError::Internal("engine refused".into()))
    }

    fn read_fingerprint(&self, _public_key: &str) -> Result<String, EngineError> {
        Err(EngineError::Internal("unused".into()))
    }
}

struct SlowEngine;

impl KeyEngine for SlowEngine {
    fn generate_key_pair(&self, request: &KeyRequest) -> Result<GeneratedKeyPair, EngineError> {
        std::thread::sleep(Duration::from_millis(300));
        BundledEngine::new().generate_key_pair(request)
    }

    fn read_fingerprint(&self, public_key: &str) -> Result<String, EngineError> {
        BundledEngine::new().read_fingerprint(public_key)
    }
}

/// Outlives the timeout, then keeps pulling from the ambient source
struct LateDrawingEngine;

impl KeyEngine for LateDrawingEngine {
    fn generate_key_pair(&self, _request: &KeyRequest) -> Result<GeneratedKeyPair, EngineError> {
        std::thread::sleep(Duration::from_millis(400));
        for _ in 0..64 {
            let mut bytes = [0u8; 32];
            fill_random(&mut bytes).map_err(|e| EngineError::Randomness(e.to_string()))?;
        }
        Err(EngineError::Internal("abandoned".into()))
    }

    fn read_fingerprint(&self, _public_key: &str) -> Result<String, EngineError> {
        Err(EngineError::Internal("unused".into()))
    }
}

fn small_buffer() -> DeriverConfig {
    DeriverConfig {
        pregenerate_bytes: 64,
        ..DeriverConfig::default()
    }
}

async fn assert_sources_are_real() {
    let _gate = ambient::lock_gate().await;
    assert!(!ambient::is_active());

    let mut a = [0u8; 32];
    let mut b = [0u8; 32];
    fill_random(&mut a).unwrap();
    fill_random(&mut b).unwrap();
    assert_ne!(a, b);
}

#[tokio::test]
async fn exhaustion_is_reported() {
    init_tracing();

    let deriver = KeyDeriver::new(small_buffer())
        .unwrap()
        .with_engine_factory(|| Box::new(GreedyEngine));
    let err = deriver.generate("BTC", &"aa".repeat(32)).await.unwrap_err();

    assert_eq!(
        err,
        DerivationError::BufferExhausted {
            requested: 4096,
            remaining: 64
        }
    );
    assert_sources_are_real().await;
}

#[tokio::test]
async fn exhaustion_through_rng_panic_is_reported() {
    init_tracing();

    let deriver = KeyDeriver::new(small_buffer())
        .unwrap()
        .with_engine_factory(|| Box::new(PanickingEngine));
    let err = deriver.generate("BTC", &"aa".repeat(32)).await.unwrap_err();

    assert!(matches!(err, DerivationError::BufferExhausted { .. }));
    assert_sources_are_real().await;
}

#[tokio::test]
async fn engine_errors_pass_through() {
    init_tracing();

    let deriver = KeyDeriver::new(DeriverConfig::default())
        .unwrap()
        .with_engine_factory(|| Box::new(FailingEngine));
    let err = deriver.generate("BTC", &"aa".repeat(32)).await.unwrap_err();

    assert_eq!(
        err,
        DerivationError::ExternalEngine(EngineError::Internal("engine refused".into()))
    );
    assert_sources_are_real().await;
}

#[tokio::test]
async fn timeout_releases_override() {
    init_tracing();

    let config = DeriverConfig {
        timeout_ms: 50,
        ..DeriverConfig::default()
    };
    let slow = KeyDeriver::new(config)
        .unwrap()
        .with_engine_factory(|| Box::new(SlowEngine));

    let err = slow.generate("BTC", &"aa".repeat(32)).await.unwrap_err();
    assert_eq!(err, DerivationError::Timeout { after_ms: 50 });
    assert!(!ambient::is_active());

    // The next call waits for the abandoned engine and is unaffected by it
    let material = KeyDeriver::new(DeriverConfig::default())
        .unwrap()
        .generate("BTC", &"aa".repeat(32))
        .await
        .unwrap();
    assert_eq!(material.fingerprint, "6444 2100 315A 97EA 1EFC 44A1 9F62 F671 CF6C CDCD");

    assert_sources_are_real().await;
}

#[tokio::test]
async fn engine_is_built_inside_the_window() {
    init_tracing();

    let saw_override = Arc::new(AtomicBool::new(false));
    let flag = saw_override.clone();

    let deriver = KeyDeriver::new(DeriverConfig::default())
        .unwrap()
        .with_engine_factory(move || {
            flag.store(ambient::is_active(), Ordering::SeqCst);
            Box::new(BundledEngine::new())
        });
    deriver.generate("DOGE", &"01".repeat(32)).await.unwrap();

    assert!(saw_override.load(Ordering::SeqCst));
    assert_sources_are_real().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_do_not_interleave() {
    init_tracing();

    let deriver = KeyDeriver::new(DeriverConfig::default()).unwrap();
    let secrets: Vec<String> = (0..8u8).map(|i| format!("{:02x}", i + 0x10).repeat(32)).collect();

    let mut expected = Vec::new();
    for secret in &secrets {
        expected.push(deriver.generate("BTC", secret).await.unwrap());
    }

    let handles: Vec<_> = secrets
        .iter()
        .cloned()
        .map(|secret| {
            let deriver = deriver.clone();
            tokio::spawn(async move { deriver.generate("BTC", &secret).await })
        })
        .collect();

    let mut fingerprints = HashSet::new();
    for (handle, expected) in handles.into_iter().zip(expected.iter()) {
        let material = handle.await.unwrap().unwrap();
        assert_eq!(&material, expected);
        fingerprints.insert(material.fingerprint.clone());
    }

    assert_eq!(fingerprints.len(), secrets.len());
    assert_sources_are_real().await;
}

#[test]
fn abandoned_engine_cannot_drain_a_later_window() {
    init_tracing();

    let secret = "bb".repeat(32);
    let expected = tokio_test::block_on(deterministic_keygen::generate("ETH", &secret)).unwrap();

    // Time out, then tear the runtime down while the engine is still asleep
    let first = std::thread::spawn(|| {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let config = DeriverConfig {
            timeout_ms: 50,
            ..DeriverConfig::default()
        };
        let deriver = KeyDeriver::new(config)
            .unwrap()
            .with_engine_factory(|| Box::new(LateDrawingEngine));
        let err = runtime
            .block_on(deriver.generate("BTC", &"aa".repeat(32)))
            .unwrap_err();
        runtime.shutdown_background();
        err
    })
    .join()
    .unwrap();
    assert_eq!(first, DerivationError::Timeout { after_ms: 50 });

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let again = runtime
        .block_on(deterministic_keygen::generate("ETH", &secret))
        .unwrap();
    assert_eq!(again, expected);

    runtime.block_on(assert_sources_are_real());
}

#[tokio::test]
async fn engine_panics_are_engine_errors() {
    init_tracing();

    struct ExplodingEngine;

    impl KeyEngine for ExplodingEngine {
        fn generate_key_pair(&self, _request: &KeyRequest) -> Result<GeneratedKeyPair, EngineError> {
            panic!("engine blew up");
        }

        fn read_fingerprint(&self, _public_key: &str) -> Result<String, EngineError> {
            Err(EngineError::Internal("unused".into()))
        }
    }

    let deriver = KeyDeriver::new(DeriverConfig::default())
        .unwrap()
        .with_engine_factory(|| Box::new(ExplodingEngine));
    let err = deriver.generate("BTC", &"aa".repeat(32)).await.unwrap_err();

    assert_eq!(
        err,
        DerivationError::ExternalEngine(EngineError::Internal(
            "key engine panicked: engine blew up".into()
        ))
    );
    assert_sources_are_real().await;
}
