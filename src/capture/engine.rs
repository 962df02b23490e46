use std::time::Duration;

use async_trait::async_trait;
use enumflags2::BitFlags;
use eyre::WrapErr;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::{mpsc, watch},
    time::interval,
};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;

use super::{parse_read, CaptureDevice, CaptureService, MetadataBatch, MetadataObject, Symbology};

pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Capture service backed by a serial-attached scan engine. The engine
/// decodes symbologies in firmware and streams AIM-prefixed reads; this
/// backend frames those reads and reports them as metadata objects.
#[derive(Debug)]
pub struct EngineCaptureService {
    device_override: Option<String>,
    baud_rate: u32,
}

impl EngineCaptureService {
    pub fn new(device_override: Option<String>, baud_rate: u32) -> Self {
        Self {
            device_override,
            baud_rate,
        }
    }
}

impl Default for EngineCaptureService {
    fn default() -> Self {
        Self::new(None, DEFAULT_BAUD_RATE)
    }
}

#[async_trait]
impl CaptureService for EngineCaptureService {
    async fn default_device(&self) -> eyre::Result<Option<CaptureDevice>> {
        if let Some(path) = &self.device_override {
            return Ok(Some(CaptureDevice {
                name: path.clone(),
                id: path.clone(),
            }));
        }

        let mut ports = tokio::task::spawn_blocking(tokio_serial::available_ports).await??;
        ports.sort_by(|a, b| a.port_name.cmp(&b.port_name));

        Ok(ports.into_iter().next().map(|port| CaptureDevice {
            name: port.port_name.clone(),
            id: port.port_name,
        }))
    }

    async fn attach_pipeline(
        &self,
        device: &CaptureDevice,
        symbologies: BitFlags<Symbology>,
        running: watch::Receiver<bool>,
        token: CancellationToken,
    ) -> eyre::Result<mpsc::Receiver<eyre::Result<MetadataBatch>>> {
        let port = tokio_serial::new(device.id.as_str(), self.baud_rate)
            .open_native_async()
            .wrap_err("could not attach capture device input")?;

        eyre::ensure!(
            !symbologies.is_empty(),
            "could not attach metadata output: no symbologies configured"
        );

        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(pump_reads(port, symbologies, running, token, tx));

        Ok(rx)
    }
}

/// Forward framed engine reads as metadata batches until the pipeline is
/// torn down. Reads arriving while the running gate is down belong to a
/// stopped pipeline and are discarded.
#[tracing::instrument(skip(port, running, token, tx))]
async fn pump_reads<R: AsyncRead + Unpin>(
    mut port: R,
    symbologies: BitFlags<Symbology>,
    running: watch::Receiver<bool>,
    token: CancellationToken,
    tx: mpsc::Sender<eyre::Result<MetadataBatch>>,
) {
    let mut buf = [0u8; 4096];
    let mut pending = String::new();

    // Engines without a configured terminator go quiet between reads; flush
    // whatever accumulated once input pauses.
    let mut flush = interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("pipeline torn down, ending reads");
                break;
            }
            _ = tx.closed() => {
                tracing::debug!("event receiver closed, ending reads");
                break;
            }
            _ = flush.tick() => {
                if !*running.borrow() {
                    pending.clear();
                    continue;
                }

                if let Some(batch) = drain_reads(&mut pending, symbologies, true) {
                    if tx.send(Ok(batch)).await.is_err() {
                        break;
                    }
                }
            }
            res = port.read(&mut buf) => {
                let size = match res {
                    Ok(size) => size,
                    Err(err) => {
                        tracing::error!("capture device read failed: {err}");
                        let report = eyre::Report::new(err).wrap_err("capture device read failed");
                        let _ = tx.send(Err(report)).await;
                        break;
                    }
                };

                if size == 0 {
                    continue;
                }

                tracing::trace!(size, raw = hex::encode(&buf[0..size]), "got device data");

                if !*running.borrow() {
                    pending.clear();
                    continue;
                }

                pending.push_str(&String::from_utf8_lossy(&buf[0..size]));

                if let Some(batch) = drain_reads(&mut pending, symbologies, false) {
                    if tx.send(Ok(batch)).await.is_err() {
                        break;
                    }
                }

                flush.reset();
            }
        }
    }
}

/// Split completed reads out of the pending buffer and parse them into a
/// batch. Terminator-framed reads complete on CR or LF; `flush_partial`
/// also takes whatever is left.
fn drain_reads(
    pending: &mut String,
    symbologies: BitFlags<Symbology>,
    flush_partial: bool,
) -> Option<MetadataBatch> {
    let mut objects = Vec::new();

    while let Some(end) = pending.find(['\r', '\n']) {
        let read: String = pending.drain(..=end).collect();
        push_read(&mut objects, &read, symbologies);
    }

    if flush_partial && !pending.is_empty() {
        let read = std::mem::take(pending);
        push_read(&mut objects, &read, symbologies);
    }

    (!objects.is_empty()).then_some(objects)
}

fn push_read(objects: &mut Vec<MetadataObject>, read: &str, symbologies: BitFlags<Symbology>) {
    let read = read.trim_end_matches(['\r', '\n']);
    if read.is_empty() {
        return;
    }

    match parse_read(read) {
        Some(object) if symbologies.contains(object.symbology) => objects.push(object),
        Some(object) => {
            tracing::debug!(
                symbology = %object.symbology,
                "discarding read outside configured symbologies"
            );
        }
        None => {
            tracing::debug!(?read, "discarding read without a usable symbology identifier");
        }
    }
}
