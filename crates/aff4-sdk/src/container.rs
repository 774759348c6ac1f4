use std::collections::HashMap;
use std::io::{ErrorKind, Read, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use aff4_resolver::{
    Aff4Error, Aff4Result, MapStream, ObjectHandle, ObjectKind, OpenMode, Resolver, ResolverConfig,
};
use aff4_store::{Triple, TripleStore};
use aff4_types::predicates::{self, HASH, STORED, TYPE};
use aff4_types::{Urn, Value};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{SdkError, SdkResult};
use crate::request::{ImageInfo, ImageRequest};

const COPY_BUFFER: usize = 1024 * 1024;

/// An open evidence stream. Each handle keeps its own read position.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Aff4Handle {
    id: u64,
    urn: Urn,
}

impl Aff4Handle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The stream this handle reads.
    pub fn urn(&self) -> &Urn {
        &self.urn
    }
}

struct OpenStream {
    object: ObjectHandle,
    position: u64,
}

/// High-level AFF4 API.
pub struct Aff4 {
    resolver: Resolver,
    streams: Mutex<HashMap<u64, OpenStream>>,
    next_id: AtomicU64,
}

impl Default for Aff4 {
    fn default() -> Self {
        Self::new(ResolverConfig::default().with_env_overrides())
    }
}

impl Aff4 {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            resolver: Resolver::new(config),
            streams: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Configure from TOML text, then apply environment overrides.
    pub fn from_toml(text: &str) -> SdkResult<Self> {
        let config = ResolverConfig::from_toml_str(text)?.with_env_overrides();
        Ok(Self::new(config))
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    // ---- Reading ----

    /// Load the volumes in `images` and open the evidence stream they hold.
    ///
    /// Maps are preferred over encrypted streams, and both over plain
    /// images; ties go to the smallest URN.
    pub fn open<P: AsRef<Path>>(&self, images: &[P]) -> SdkResult<Aff4Handle> {
        if images.is_empty() {
            return Err(SdkError::NoStream("an empty image list".into()));
        }
        let mut volumes = Vec::with_capacity(images.len());
        for path in images {
            let handle = self.resolver.open_volume(path.as_ref(), OpenMode::Read)?;
            volumes.push(handle.urn().clone());
            self.resolver.cache_return(&handle);
        }
        let urn = self.select_stream(&volumes).ok_or_else(|| {
            let names: Vec<String> = images
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect();
            SdkError::NoStream(names.join(", "))
        })?;
        info!(stream = %urn, volumes = volumes.len(), "opened evidence");
        self.open_stream(&urn)
    }

    /// Open a specific stream by URN.
    pub fn open_stream(&self, urn: &Urn) -> SdkResult<Aff4Handle> {
        let object = self.resolver.open(urn, OpenMode::Read)?;
        if !object.kind().is_stream() {
            let kind = object.kind();
            self.resolver.cache_return(&object);
            return Err(Aff4Error::InvalidArgument(format!("{urn} is a {kind:?}, not a stream")).into());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.streams
            .lock()
            .expect("lock poisoned")
            .insert(id, OpenStream { object, position: 0 });
        debug!(handle = id, stream = %urn, "opened stream");
        Ok(Aff4Handle {
            id,
            urn: urn.clone(),
        })
    }

    fn select_stream(&self, volumes: &[Urn]) -> Option<Urn> {
        let mut candidates: Vec<(u8, Urn)> = self
            .resolver
            .query(None, Some(TYPE), None)
            .into_iter()
            .filter(|t| t.predicate == TYPE)
            .filter_map(|t| {
                let kind = t.value.as_str().and_then(ObjectKind::from_type_name)?;
                let rank = stream_rank(kind)?;
                let stored = self.resolver.store().resolve_urns(&t.subject, STORED);
                stored
                    .iter()
                    .any(|v| volumes.contains(v))
                    .then_some((rank, t.subject))
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next().map(|(_, urn)| urn)
    }

    pub fn seek(&self, handle: &Aff4Handle, pos: SeekFrom) -> SdkResult<u64> {
        let (object, position) = self.entry(handle)?;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => position.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let size = object.lock()?.size(&self.resolver)?;
                size.checked_add_signed(delta)
            }
        };
        let target = target.ok_or_else(|| {
            Aff4Error::InvalidArgument(format!("seek to {pos:?} from {position} is out of range"))
        })?;
        self.set_position(handle, target)?;
        Ok(target)
    }

    pub fn tell(&self, handle: &Aff4Handle) -> SdkResult<u64> {
        Ok(self.entry(handle)?.1)
    }

    /// Fill `buf` from the current position. Returns fewer bytes only at the
    /// end of the stream.
    pub fn read(&self, handle: &Aff4Handle, buf: &mut [u8]) -> SdkResult<usize> {
        let (object, position) = self.entry(handle)?;
        let mut filled = 0;
        {
            let mut guard = object.lock()?;
            while filled < buf.len() {
                let n = guard.read_at(&self.resolver, position + filled as u64, &mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
        }
        self.set_position(handle, position + filled as u64)?;
        Ok(filled)
    }

    pub fn size(&self, handle: &Aff4Handle) -> SdkResult<u64> {
        let (object, _) = self.entry(handle)?;
        let size = object.lock()?.size(&self.resolver)?;
        Ok(size)
    }

    pub fn close(&self, handle: &Aff4Handle) -> SdkResult<()> {
        let open = self
            .streams
            .lock()
            .expect("lock poisoned")
            .remove(&handle.id)
            .ok_or(SdkError::UnknownHandle(handle.id))?;
        self.resolver.cache_return(&open.object);
        debug!(handle = handle.id, "closed stream");
        Ok(())
    }

    fn entry(&self, handle: &Aff4Handle) -> SdkResult<(ObjectHandle, u64)> {
        let streams = self.streams.lock().expect("lock poisoned");
        let open = streams
            .get(&handle.id)
            .ok_or(SdkError::UnknownHandle(handle.id))?;
        Ok((open.object.clone(), open.position))
    }

    fn set_position(&self, handle: &Aff4Handle, position: u64) -> SdkResult<()> {
        let mut streams = self.streams.lock().expect("lock poisoned");
        let open = streams
            .get_mut(&handle.id)
            .ok_or(SdkError::UnknownHandle(handle.id))?;
        open.position = position;
        Ok(())
    }

    // ---- Metadata ----

    /// Triples whose parts start with the given prefixes.
    pub fn query(
        &self,
        subject_prefix: Option<&str>,
        predicate_prefix: Option<&str>,
        value_prefix: Option<&str>,
    ) -> Vec<Triple> {
        self.resolver
            .query(subject_prefix, predicate_prefix, value_prefix)
    }

    /// Every attribute of `urn` as a JSON object. Repeated predicates
    /// become arrays in insertion order.
    pub fn describe(&self, urn: &Urn) -> serde_json::Value {
        let mut attributes = serde_json::Map::new();
        let triples = self.resolver.query(Some(urn.as_str()), None, None);
        for triple in triples.into_iter().filter(|t| t.subject == *urn) {
            let value = json_value(&triple.value);
            match attributes.get_mut(&triple.predicate) {
                None => {
                    attributes.insert(triple.predicate, value);
                }
                Some(serde_json::Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = serde_json::Value::Array(vec![first, value]);
                }
            }
        }
        json!({ "urn": urn.as_str(), "attributes": attributes })
    }

    // ---- Keys ----

    /// Register a signing identity; volumes closed afterwards carry signed
    /// hash statements.
    pub fn add_identity(&self, key_file: &Path, cert_file: &Path) -> SdkResult<Urn> {
        Ok(self.resolver.add_identity(key_file, cert_file)?)
    }

    /// Passphrase for creating and opening encrypted streams.
    pub fn set_passphrase(&self, passphrase: impl Into<String>) {
        self.resolver.set_passphrase(passphrase);
    }

    // ---- Writing ----

    /// Start a new volume at `path`, replacing any file there.
    pub fn create_volume(&self, path: &Path) -> SdkResult<Urn> {
        let handle = self.resolver.create_volume(path)?;
        let urn = handle.urn().clone();
        self.resolver.cache_return(&handle);
        info!(volume = %urn, file = %path.display(), "created volume");
        Ok(urn)
    }

    /// Copy `reader` into a new image stream stored in `volume`.
    ///
    /// Encrypted requests write through an encrypted stream whose backing
    /// image uses the configured image settings.
    pub fn write_image(
        &self,
        volume: &Urn,
        mut reader: impl Read,
        request: &ImageRequest,
    ) -> SdkResult<ImageInfo> {
        let handle = if request.encrypted {
            self.resolver.create_encrypted(volume, request.urn.clone())?
        } else {
            let config = request.effective_config(&self.resolver.config().image);
            self.resolver
                .create_image_with(volume, request.urn.clone(), config)?
        };
        let urn = handle.urn().clone();
        let mut buf = vec![0u8; COPY_BUFFER];
        let mut size = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            handle.lock()?.write(&self.resolver, &buf[..n])?;
            size += n as u64;
        }
        self.resolver.close(&handle)?;
        let hash = self
            .resolver
            .resolve(&urn, HASH)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned));
        info!(image = %urn, size, encrypted = request.encrypted, "wrote image");
        Ok(ImageInfo { urn, size, hash })
    }

    /// Create a map stream in `volume` and close it once `build` has filled
    /// in its points.
    pub fn create_map(
        &self,
        volume: &Urn,
        urn: Option<Urn>,
        build: impl FnOnce(&mut MapStream) -> Aff4Result<()>,
    ) -> SdkResult<Urn> {
        let handle = self.resolver.create_map(volume, urn)?;
        let built = handle.lock().and_then(|mut guard| match guard.as_map_mut() {
            Some(map) => build(map),
            None => Err(Aff4Error::InvalidArgument(format!(
                "{} is not a map",
                handle.urn()
            ))),
        });
        let closed = self.resolver.close(&handle);
        built?;
        closed?;
        Ok(handle.urn().clone())
    }

    /// Re-read an image and compare it against its recorded hash.
    pub fn verify_image(&self, urn: &Urn) -> SdkResult<()> {
        Ok(self.resolver.verify_image(urn)?)
    }

    /// Finish `volume`: close the streams written into it and write its
    /// properties and central directory.
    pub fn close_volume(&self, volume: &Urn) -> SdkResult<()> {
        let declared = self.resolver.store().resolve_string(volume, TYPE).ok();
        if declared.as_deref() != Some(predicates::TYPE_ZIP_VOLUME) {
            return Err(SdkError::NotAVolume(volume.clone()));
        }
        self.resolver.close_urn(volume)?;
        info!(volume = %volume, "closed volume");
        Ok(())
    }
}

impl Drop for Aff4 {
    fn drop(&mut self) {
        let open: Vec<OpenStream> = self
            .streams
            .get_mut()
            .map(|streams| streams.drain().map(|(_, open)| open).collect())
            .unwrap_or_default();
        for stream in open {
            self.resolver.cache_return(&stream.object);
        }
        if let Err(e) = self.resolver.close_all() {
            warn!(error = %e, "closing objects on drop failed");
        }
    }
}

fn stream_rank(kind: ObjectKind) -> Option<u8> {
    match kind {
        ObjectKind::Map => Some(0),
        ObjectKind::Encrypted => Some(1),
        ObjectKind::Image => Some(2),
        _ => None,
    }
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::String(s) => json!(s),
        Value::Urn(u) => json!(u.as_str()),
        Value::Int32(i) => json!(i),
        Value::Int64(i) => json!(i),
        Value::Binary(bytes) => json!(hex::encode(bytes)),
    }
}
