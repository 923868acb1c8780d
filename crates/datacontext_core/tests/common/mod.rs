#![allow(dead_code)]

use datacontext_core::{BatchView, DataContext, Entity, StoreConfig, ViewOp};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub client_id: Option<String>,
    pub name: Option<String>,
    pub birthday: Option<String>,
    pub city: Option<String>,
}

impl Entity for Client {
    type Key = String;
    const COLLECTION: &'static str = "Client";
    const KEY_FIELD: &'static str = "client_id";

    fn key(&self) -> Option<String> {
        self.client_id.clone()
    }

    fn set_key(&mut self, key: String) {
        self.client_id = Some(key);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Option<i64>,
    pub title: String,
    pub priority: i64,
}

impl Entity for Ticket {
    type Key = i64;
    const COLLECTION: &'static str = "Ticket";
    const KEY_FIELD: &'static str = "id";

    fn key(&self) -> Option<i64> {
        self.id
    }

    fn set_key(&mut self, key: i64) {
        self.id = Some(key);
    }
}

pub fn store_config(dir: &Path) -> StoreConfig {
    StoreConfig::new("Clients", dir)
}

pub fn open_store(dir: &Path) -> DataContext {
    DataContext::open(&store_config(dir)).unwrap()
}

/// View double recording every batch it receives.
#[derive(Debug, Default)]
pub struct RecordingView {
    pub atomic_moves: bool,
    pub reloads: usize,
    pub batches: Vec<Vec<ViewOp>>,
    open_batch: Option<Vec<ViewOp>>,
}

impl RecordingView {
    pub fn with_atomic_moves() -> Self {
        Self {
            atomic_moves: true,
            ..Self::default()
        }
    }

    pub fn last_batch(&self) -> &[ViewOp] {
        self.batches.last().map(Vec::as_slice).unwrap_or(&[])
    }
}

impl BatchView for RecordingView {
    fn begin_updates(&mut self) {
        assert!(self.open_batch.is_none(), "nested batch");
        self.open_batch = Some(Vec::new());
    }

    fn apply_op(&mut self, op: &ViewOp) {
        self.open_batch
            .as_mut()
            .expect("op outside of a batch")
            .push(*op);
    }

    fn end_updates(&mut self) {
        let batch = self.open_batch.take().expect("end without begin");
        self.batches.push(batch);
    }

    fn reload_data(&mut self) {
        self.reloads += 1;
    }

    fn supports_atomic_move(&self) -> bool {
        self.atomic_moves
    }
}
