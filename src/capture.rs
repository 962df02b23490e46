use async_trait::async_trait;
use enum_iterator::Sequence;
use enumflags2::{bitflags, BitFlags};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod engine;
#[cfg(test)]
pub(crate) mod mock;

/// Barcode encodings the capture pipeline can be asked to report.
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Sequence)]
pub enum Symbology {
    Ean8 = 0b001,
    Ean13 = 0b010,
    Pdf417 = 0b100,
}

impl Symbology {
    /// Map an AIM symbology identifier (code character plus modifier) to a
    /// supported symbology. EAN-13 and EAN-8 share the `E` code character
    /// and are told apart by the modifier.
    fn from_aim(code: char, modifier: char) -> Option<Self> {
        match (code, modifier) {
            ('E', '4') => Some(Self::Ean8),
            ('E', _) => Some(Self::Ean13),
            ('L', _) => Some(Self::Pdf417),
            _ => None,
        }
    }
}

impl std::fmt::Display for Symbology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ean8 => write!(f, "EAN-8"),
            Self::Ean13 => write!(f, "EAN-13"),
            Self::Pdf417 => write!(f, "PDF417"),
        }
    }
}

/// The symbology set the scanner screen configures its pipeline for.
pub fn scan_symbologies() -> BitFlags<Symbology> {
    enum_iterator::all::<Symbology>().collect()
}

/// A decoded detection delivered by the capture pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataObject {
    pub symbology: Symbology,
    /// Payload carried by the read. Engines can report a decode with an
    /// empty payload; those objects have no value.
    pub value: Option<String>,
}

pub type MetadataBatch = Vec<MetadataObject>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDevice {
    pub name: String,
    /// Backend-specific identifier, such as a serial port path.
    pub id: String,
}

/// The capture collaborator: device enumeration and pipeline attachment.
/// Decoding happens on the other side of this boundary.
#[async_trait]
pub trait CaptureService: Send + Sync {
    /// The default capture device, or `None` when no hardware is available.
    async fn default_device(&self) -> eyre::Result<Option<CaptureDevice>>;

    /// Attach the device input and a metadata output restricted to
    /// `symbologies`, failing if either is incompatible. Batches are only
    /// produced while `running` is true; cancelling `token` tears the
    /// pipeline down.
    async fn attach_pipeline(
        &self,
        device: &CaptureDevice,
        symbologies: BitFlags<Symbology>,
        running: watch::Receiver<bool>,
        token: CancellationToken,
    ) -> eyre::Result<mpsc::Receiver<eyre::Result<MetadataBatch>>>;
}

/// Parse one raw engine read into a metadata object. Reads without an AIM
/// prefix, or with an identifier outside the supported set, are not
/// metadata objects.
pub(crate) fn parse_read(raw: &str) -> Option<MetadataObject> {
    let raw = raw.trim_end_matches(['\r', '\n']);
    let rest = raw.strip_prefix(']')?;

    let mut chars = rest.chars();
    let code = chars.next()?;
    let modifier = chars.next()?;
    let symbology = Symbology::from_aim(code, modifier)?;

    let payload = chars.as_str();

    Some(MetadataObject {
        symbology,
        value: (!payload.is_empty()).then(|| payload.to_string()),
    })
}

/// An active capture pipeline. At most one exists at a time, exclusively
/// owned by the scanner screen; dropping it tears the pipeline down.
pub struct CaptureSession {
    id: Uuid,
    device: CaptureDevice,
    running: watch::Sender<bool>,
    token: CancellationToken,
    events: Option<mpsc::Receiver<eyre::Result<MetadataBatch>>>,
}

impl CaptureSession {
    /// Build a pipeline against the service's default device. Fails when no
    /// device is available or the pipeline cannot be attached; a partially
    /// constructed pipeline is cleaned up by the service.
    pub async fn configure(
        service: &dyn CaptureService,
        symbologies: BitFlags<Symbology>,
    ) -> eyre::Result<Self> {
        let device = service
            .default_device()
            .await?
            .ok_or_else(|| eyre::eyre!("no capture device is available"))?;

        let id = Uuid::new_v4();
        let (running, running_rx) = watch::channel(false);
        let token = CancellationToken::new();

        tracing::info!(%id, device = %device.name, ?symbologies, "attaching capture pipeline");

        let events = service
            .attach_pipeline(&device, symbologies, running_rx, token.clone())
            .await?;

        Ok(Self {
            id,
            device,
            running,
            token,
            events: Some(events),
        })
    }

    pub fn device(&self) -> &CaptureDevice {
        &self.device
    }

    /// Start or restart the pipeline. Idempotent.
    pub fn start(&self) {
        self.running.send_replace(true);
    }

    /// Halt the pipeline without tearing it down. Idempotent.
    pub fn stop(&self) {
        self.running.send_replace(false);
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Take the decoded-metadata stream. Yields once; the UI worker owns the
    /// receiver afterwards.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<eyre::Result<MetadataBatch>>> {
        self.events.take()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.running.send_replace(false);
        self.token.cancel();
        tracing::debug!(id = %self.id, "capture session torn down");
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
