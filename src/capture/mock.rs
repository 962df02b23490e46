use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use enumflags2::BitFlags;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::{CaptureDevice, CaptureService, MetadataBatch, Symbology};

/// Events one attached pipeline delivers, in order.
pub(crate) type Script = Vec<eyre::Result<MetadataBatch>>;

/// Observable state of the most recently attached pipeline.
pub(crate) struct PipelineHandles {
    pub(crate) symbologies: BitFlags<Symbology>,
    pub(crate) running: watch::Receiver<bool>,
    pub(crate) token: CancellationToken,
}

/// Scripted capture service for tests: a configurable device, an optional
/// attach failure, and per-attachment event scripts delivered only while
/// the pipeline is running.
pub(crate) struct ScriptedCaptureService {
    device: Option<CaptureDevice>,
    attach_error: Option<String>,
    scripts: Mutex<VecDeque<Script>>,
    handles: Arc<Mutex<Option<PipelineHandles>>>,
}

impl ScriptedCaptureService {
    pub(crate) fn new(script: Script) -> Self {
        Self::with_scripts(vec![script])
    }

    /// One script per expected pipeline attachment.
    pub(crate) fn with_scripts(scripts: Vec<Script>) -> Self {
        Self {
            device: Some(CaptureDevice {
                name: "Scripted Engine".to_string(),
                id: "scripted0".to_string(),
            }),
            attach_error: None,
            scripts: Mutex::new(scripts.into()),
            handles: Arc::default(),
        }
    }

    pub(crate) fn without_device() -> Self {
        Self {
            device: None,
            ..Self::with_scripts(Vec::new())
        }
    }

    pub(crate) fn failing_attach(message: &str) -> Self {
        Self {
            attach_error: Some(message.to_string()),
            ..Self::with_scripts(Vec::new())
        }
    }

    pub(crate) fn handles(&self) -> Arc<Mutex<Option<PipelineHandles>>> {
        self.handles.clone()
    }
}

#[async_trait]
impl CaptureService for ScriptedCaptureService {
    async fn default_device(&self) -> eyre::Result<Option<CaptureDevice>> {
        Ok(self.device.clone())
    }

    async fn attach_pipeline(
        &self,
        _device: &CaptureDevice,
        symbologies: BitFlags<Symbology>,
        running: watch::Receiver<bool>,
        token: CancellationToken,
    ) -> eyre::Result<mpsc::Receiver<eyre::Result<MetadataBatch>>> {
        if let Some(message) = &self.attach_error {
            eyre::bail!("{message}");
        }

        *self.handles.lock().unwrap() = Some(PipelineHandles {
            symbologies,
            running: running.clone(),
            token: token.clone(),
        });

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut running = running;

            for event in script {
                // A stopped pipeline produces nothing; wait for the gate.
                while !*running.borrow() {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        res = running.changed() => {
                            if res.is_err() {
                                return;
                            }
                        }
                    }
                }

                let event = event.map(|batch| {
                    batch
                        .into_iter()
                        .filter(|object| symbologies.contains(object.symbology))
                        .collect()
                });

                tokio::select! {
                    _ = token.cancelled() => return,
                    res = tx.send(event) => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
