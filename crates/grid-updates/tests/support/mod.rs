//! Scripted collaborators shared by the engine integration tests.

#![allow(dead_code, reason = "Each test binary uses a different subset")]

use async_trait::async_trait;
use grid_core::{Error, ImageData, ImageId, ImageSource, PollingConfig, Result, UpdatesConfig};
use grid_updates::{
    BatchCoordinator, Cascade, ImageCache, MutationAck, MutationHandler, MutationRegistry,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Install a test writer subscriber once per binary.
pub fn init_tracing() {
    drop(
        tracing_subscriber::fmt()
            .with_env_filter("grid_updates=debug")
            .with_test_writer()
            .try_init(),
    );
}

/// Handler whose behavior per image is set up front.
#[derive(Default)]
pub struct ScriptedHandler {
    /// Images whose write is rejected.
    pub reject: HashSet<ImageId>,
    /// Images whose write panics.
    pub panic_on: HashSet<ImageId>,
    /// Poll attempt on which each image confirms; absent means never.
    pub confirm_on: HashMap<ImageId, u32>,
    /// Confirm attempt for images not listed in `confirm_on`.
    pub default_confirm_on: Option<u32>,
    pub polling: Option<PollingConfig>,
    pub cascades: Vec<Cascade>,
    pub mutations: AtomicU32,
    pub polls: Mutex<HashMap<ImageId, u32>>,
}

impl ScriptedHandler {
    /// Every image confirms on the given poll attempt.
    pub fn confirming_on(attempt: u32) -> Self {
        Self {
            default_confirm_on: Some(attempt),
            ..Self::default()
        }
    }

    /// No image ever confirms.
    pub fn never_confirming() -> Self {
        Self::default()
    }

    pub fn polls_for(&self, image_id: &ImageId) -> u32 {
        self.polls
            .lock()
            .expect("polls lock")
            .get(image_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn mutation_count(&self) -> u32 {
        self.mutations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MutationHandler for ScriptedHandler {
    async fn mutate(&self, image_id: &ImageId, _value: &Value) -> Result<MutationAck> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        assert!(!self.panic_on.contains(image_id), "scripted panic for {image_id}");
        if self.reject.contains(image_id) {
            return Err(Error::Api {
                status: 400,
                message: format!("rejected {image_id}"),
            });
        }
        Ok(MutationAck::accepted())
    }

    async fn poll(&self, image_id: &ImageId, _value: &Value, _ack: &MutationAck) -> Result<bool> {
        let attempt = {
            let mut polls = self.polls.lock().expect("polls lock");
            let count = polls.entry(image_id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let target = self
            .confirm_on
            .get(image_id)
            .copied()
            .or(self.default_confirm_on);
        Ok(target.is_some_and(|target| attempt >= target))
    }

    fn polling(&self) -> Option<PollingConfig> {
        self.polling.clone()
    }

    fn cascades(&self) -> Vec<Cascade> {
        self.cascades.clone()
    }
}

/// Image source that serves a bare record for any id.
#[derive(Default)]
pub struct StubSource {
    pub fetches: AtomicU32,
    pub fail: bool,
}

#[async_trait]
impl ImageSource for StubSource {
    async fn fetch_image(&self, image_id: &ImageId) -> Result<ImageData> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Api {
                status: 503,
                message: "unavailable".to_owned(),
            });
        }
        Ok(ImageData::new(image_id.clone()))
    }
}

/// Cache that records every write.
#[derive(Default)]
pub struct RecordingCache {
    pub writes: Mutex<Vec<ImageId>>,
}

impl RecordingCache {
    pub fn writes_for(&self, image_id: &ImageId) -> usize {
        self.writes
            .lock()
            .expect("writes lock")
            .iter()
            .filter(|written| *written == image_id)
            .count()
    }

    pub fn total(&self) -> usize {
        self.writes.lock().expect("writes lock").len()
    }
}

impl ImageCache for RecordingCache {
    fn update(&self, image_id: &ImageId, _data: ImageData) {
        self.writes.lock().expect("writes lock").push(image_id.clone());
    }
}

pub struct Harness {
    pub coordinator: BatchCoordinator,
    pub cache: Arc<RecordingCache>,
    pub source: Arc<StubSource>,
}

/// Coordinator over the given handlers with default configuration.
pub fn harness(handlers: Vec<(&str, Arc<dyn MutationHandler>)>) -> Harness {
    harness_with(handlers, StubSource::default(), &UpdatesConfig::default())
}

pub fn harness_with(
    handlers: Vec<(&str, Arc<dyn MutationHandler>)>,
    source: StubSource,
    config: &UpdatesConfig,
) -> Harness {
    init_tracing();
    let mut registry = MutationRegistry::new();
    for (operation_type, handler) in handlers {
        registry
            .register(operation_type, handler)
            .expect("register handler");
    }
    let cache = Arc::new(RecordingCache::default());
    let source = Arc::new(source);
    let coordinator = BatchCoordinator::new(
        Arc::new(registry),
        Arc::clone(&source) as Arc<dyn ImageSource>,
        Arc::clone(&cache) as Arc<dyn ImageCache>,
        config,
    );
    Harness {
        coordinator,
        cache,
        source,
    }
}

pub fn images(ids: &[&str]) -> Vec<ImageId> {
    ids.iter().copied().map(ImageId::new).collect()
}
