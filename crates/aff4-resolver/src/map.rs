//! Map streams: a logical stream assembled from ranges of other streams.

use std::fmt;

use aff4_map::{EncodedMap, MapEncoding, MapTable};
use aff4_store::TripleStore;
use aff4_types::predicates::{
    BLOCKSIZE, IMAGE_PERIOD, MAP_ENCODING, MAP_INLINE, SIZE, STORED, TARGET_PERIOD,
};
use aff4_types::Urn;
use aff4_zip::ZipCompression;
use tracing::{debug, warn};

use crate::config::MapReadPolicy;
use crate::error::{Aff4Error, Aff4Result};
use crate::object::{OpenMode, Stream};
use crate::resolver::Resolver;

const TEXT_MEMBER: &str = "map";
const BINARY_MEMBER: &str = "map.bin";
const TARGETS_MEMBER: &str = "map.targets";

pub struct MapStream {
    urn: Urn,
    volume: Urn,
    table: MapTable,
    policy: MapReadPolicy,
    writable: bool,
    position: u64,
}

impl MapStream {
    pub(crate) fn create(resolver: &Resolver, urn: &Urn) -> Aff4Result<Self> {
        let volume = resolver.store().resolve_urn(urn, STORED)?;
        Ok(Self {
            urn: urn.clone(),
            volume,
            table: MapTable::new(),
            policy: resolver.config().map_read_policy,
            writable: true,
            position: 0,
        })
    }

    /// Load a stored map. In write mode the table may be extended and is
    /// stored again on close.
    pub(crate) fn open(resolver: &Resolver, urn: &Urn, mode: OpenMode) -> Aff4Result<Self> {
        let store = resolver.store();
        let volume = store.resolve_urn(urn, STORED)?;
        let mut table = MapTable::new();
        if let Some(block_size) = optional(store.resolve_u64(urn, BLOCKSIZE))? {
            table.set_block_size(block_size)?;
        }
        let target_period = optional(store.resolve_u64(urn, TARGET_PERIOD))?.unwrap_or(0);
        table.set_period(optional(store.resolve_u64(urn, IMAGE_PERIOD))?, target_period)?;

        let encoding = match optional(store.resolve_string(urn, MAP_ENCODING))? {
            Some(name) => name.parse::<MapEncoding>()?,
            None if optional(store.resolve_string(urn, MAP_INLINE))?.is_some() => MapEncoding::Inline,
            None => MapEncoding::Text,
        };
        match encoding {
            MapEncoding::Inline => {
                let text = optional(store.resolve_string(urn, MAP_INLINE))?.unwrap_or_default();
                table.decode_inline(&text)?;
            }
            MapEncoding::Text => {
                let text = resolver.read_member(&urn.join(TEXT_MEMBER))?;
                table.decode_text(&String::from_utf8_lossy(&text))?;
            }
            MapEncoding::Binary => {
                let records = resolver.read_member(&urn.join(BINARY_MEMBER))?;
                let targets = resolver.read_member(&urn.join(TARGETS_MEMBER))?;
                table.decode_binary(&records, &String::from_utf8_lossy(&targets))?;
            }
        }
        table.set_size(store.resolve_u64(urn, SIZE)?);
        debug!(map = %urn, %encoding, points = table.len(), targets = table.targets().len(), "map loaded");
        Ok(Self {
            urn: urn.clone(),
            volume,
            table,
            policy: resolver.config().map_read_policy,
            writable: mode == OpenMode::Write,
            position: 0,
        })
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn table(&self) -> &MapTable {
        &self.table
    }

    pub fn policy(&self) -> MapReadPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: MapReadPolicy) {
        self.policy = policy;
    }

    fn table_mut(&mut self) -> Aff4Result<&mut MapTable> {
        if !self.writable {
            return Err(Aff4Error::InvalidArgument(format!("map {} is read-only", self.urn)));
        }
        Ok(&mut self.table)
    }

    fn check_target(&self, target: &Urn) -> Aff4Result<()> {
        if *target == self.urn {
            return Err(Aff4Error::InvalidArgument(format!("map {} cannot target itself", self.urn)));
        }
        Ok(())
    }

    /// From `image_offset` on, read `target` starting at `target_offset`.
    pub fn add_point(&mut self, image_offset: u64, target_offset: u64, target: &Urn) -> Aff4Result<()> {
        self.check_target(target)?;
        self.table_mut()?.add_point(image_offset, target_offset, target);
        Ok(())
    }

    /// Map `length` bytes at `image_offset` to `target`, growing the
    /// stream to cover them.
    pub fn add_range(
        &mut self,
        image_offset: u64,
        target_offset: u64,
        length: u64,
        target: &Urn,
    ) -> Aff4Result<()> {
        self.check_target(target)?;
        self.table_mut()?
            .add_range(image_offset, target_offset, length, target);
        Ok(())
    }

    pub fn set_period(&mut self, image_period: Option<u64>, target_period: u64) -> Aff4Result<()> {
        Ok(self.table_mut()?.set_period(image_period, target_period)?)
    }

    pub fn set_block_size(&mut self, block_size: u64) -> Aff4Result<()> {
        stored_block_size(block_size)?;
        Ok(self.table_mut()?.set_block_size(block_size)?)
    }

    pub fn set_size(&mut self, size: u64) -> Aff4Result<()> {
        self.table_mut()?.set_size(size);
        Ok(())
    }

    /// Fill `out` from `target`; returns how many bytes it had.
    fn read_target(
        &self,
        resolver: &Resolver,
        target: &Urn,
        offset: u64,
        out: &mut [u8],
    ) -> Aff4Result<usize> {
        let mut filled = 0;
        while filled < out.len() {
            let n = resolver.read_stream_at(target, offset + filled as u64, &mut out[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Store the table and its geometry.
    pub fn close(&mut self, resolver: &Resolver) -> Aff4Result<()> {
        if !self.writable {
            return Ok(());
        }
        let block_size = stored_block_size(self.table.block_size())?;
        let encoded = self.table.encode()?;
        let encoding = encoded.encoding();
        match encoded {
            EncodedMap::Inline(text) => {
                resolver.set(&self.urn, MAP_INLINE, text)?;
            }
            EncodedMap::Text(text) => {
                resolver.delete(&self.urn, MAP_INLINE);
                resolver.write_member(
                    &self.volume,
                    &self.urn.join(TEXT_MEMBER),
                    text.as_bytes(),
                    ZipCompression::Deflate,
                )?;
            }
            EncodedMap::Binary { records, targets } => {
                resolver.delete(&self.urn, MAP_INLINE);
                resolver.write_member(
                    &self.volume,
                    &self.urn.join(BINARY_MEMBER),
                    &records,
                    ZipCompression::Deflate,
                )?;
                resolver.write_member(
                    &self.volume,
                    &self.urn.join(TARGETS_MEMBER),
                    targets.as_bytes(),
                    ZipCompression::Deflate,
                )?;
            }
        }
        resolver.set(&self.urn, MAP_ENCODING, encoding.name())?;
        resolver.set(&self.urn, SIZE, self.table.size())?;
        resolver.set(&self.urn, BLOCKSIZE, block_size)?;
        match self.table.image_period() {
            Some(period) => {
                resolver.set(&self.urn, IMAGE_PERIOD, period)?;
                resolver.set(&self.urn, TARGET_PERIOD, self.table.target_period())?;
            }
            None => {
                resolver.delete(&self.urn, IMAGE_PERIOD);
                resolver.delete(&self.urn, TARGET_PERIOD);
            }
        }
        self.writable = false;
        debug!(map = %self.urn, %encoding, points = self.table.len(), "map stored");
        Ok(())
    }
}

impl Stream for MapStream {
    fn size(&self, _: &Resolver) -> Aff4Result<u64> {
        Ok(self.table.size())
    }

    fn read_at(&mut self, resolver: &Resolver, offset: u64, buf: &mut [u8]) -> Aff4Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done as u64;
            let Some(range) = self.table.get_range(pos) else {
                break;
            };
            let want = ((buf.len() - done) as u64).min(range.available) as usize;
            let out = &mut buf[done..done + want];
            match range.target_index {
                None => out.fill(0),
                Some(index) => {
                    let target = self.table.target(index).ok_or_else(|| {
                        Aff4Error::CorruptArchive(format!("map {} has no target {index}", self.urn))
                    })?;
                    self.check_target(target)?;
                    let read = self.read_target(resolver, target, range.target_offset, out);
                    let failure = match read {
                        Ok(n) if n == want => None,
                        Ok(n) => {
                            out[n..].fill(0);
                            Some(Aff4Error::not_found(
                                target,
                                format!("{} bytes at {}", want, range.target_offset),
                            ))
                        }
                        Err(e) => {
                            out.fill(0);
                            Some(e)
                        }
                    };
                    if let Some(e) = failure {
                        match self.policy {
                            MapReadPolicy::FailFast => return Err(e),
                            MapReadPolicy::BestEffort => warn!(
                                map = %self.urn,
                                target = %target,
                                offset = pos,
                                error = %e,
                                "map target unreadable, substituting zeros"
                            ),
                        }
                    }
                }
            }
            done += want;
        }
        Ok(done)
    }

    fn write(&mut self, _: &Resolver, _: &[u8]) -> Aff4Result<usize> {
        Err(Aff4Error::InvalidArgument(format!(
            "map {} is built from points, not written",
            self.urn
        )))
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) {
        self.position = position;
    }
}

impl fmt::Debug for MapStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapStream")
            .field("urn", &self.urn)
            .field("points", &self.table.len())
            .field("targets", &self.table.targets().len())
            .field("size", &self.table.size())
            .field("policy", &self.policy)
            .finish()
    }
}

/// `Ok(None)` for a missing attribute.
fn optional<T>(result: aff4_store::StoreResult<T>) -> Aff4Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// `aff4:blocksize` is stored as an i32.
fn stored_block_size(block_size: u64) -> Aff4Result<i32> {
    i32::try_from(block_size).map_err(|_| {
        Aff4Error::InvalidArgument(format!("block size {block_size} does not fit in an i32"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use aff4_types::Value;
    use std::path::Path;

    fn resolver(policy: MapReadPolicy) -> Resolver {
        Resolver::new(ResolverConfig {
            lock_files: false,
            map_read_policy: policy,
            ..ResolverConfig::default()
        })
    }

    fn target_file(dir: &Path, name: &str, fill: u8, len: usize) -> Urn {
        let path = dir.join(name);
        std::fs::write(&path, vec![fill; len]).unwrap();
        Urn::from_path(&path)
    }

    fn with_map<T>(r: &Resolver, urn: &Urn, f: impl FnOnce(&mut MapStream) -> Aff4Result<T>) -> T {
        r.with_object(urn, OpenMode::Write, |object| f(object.as_map_mut().unwrap()))
            .unwrap()
    }

    #[test]
    fn ranges_and_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let a = target_file(dir.path(), "a.raw", b'A', 1000);
        let b = target_file(dir.path(), "b.raw", b'B', 1000);
        let r = resolver(MapReadPolicy::BestEffort);
        let volume = r.create_volume(&dir.path().join("v.aff4")).unwrap();
        let map = r.create_map(volume.urn(), None).unwrap();
        with_map(&r, map.urn(), |m| {
            m.add_range(0, 0, 100, &a)?;
            m.add_range(200, 500, 100, &b)
        });

        let mut buf = vec![0xFFu8; 300];
        assert_eq!(r.read_stream_at(map.urn(), 0, &mut buf).unwrap(), 300);
        assert!(buf[..100].iter().all(|&x| x == b'A'));
        // Runs on through A until the next point.
        assert!(buf[100..200].iter().all(|&x| x == b'A'));
        assert!(buf[200..].iter().all(|&x| x == b'B'));
        assert_eq!(r.stream_size(map.urn()).unwrap(), 300);
    }

    #[test]
    fn missing_target_follows_policy() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Urn::from_path(&dir.path().join("gone.raw"));
        for (policy, ok) in [(MapReadPolicy::BestEffort, true), (MapReadPolicy::FailFast, false)] {
            let r = resolver(policy);
            let volume = r.create_volume(&dir.path().join("v.aff4")).unwrap();
            let map = r.create_map(volume.urn(), None).unwrap();
            with_map(&r, map.urn(), |m| m.add_range(0, 0, 64, &missing));
            let mut buf = vec![0xFFu8; 64];
            let result = r.read_stream_at(map.urn(), 0, &mut buf);
            assert_eq!(result.is_ok(), ok, "{policy:?}");
            if ok {
                assert!(buf.iter().all(|&x| x == 0));
            }
            r.close(&volume).unwrap();
        }
    }

    #[test]
    fn self_reference_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(MapReadPolicy::BestEffort);
        let volume = r.create_volume(&dir.path().join("v.aff4")).unwrap();
        let map = r.create_map(volume.urn(), None).unwrap();
        let me = map.urn().clone();
        let result = r.with_object(&me, OpenMode::Write, |object| {
            object.as_map_mut().unwrap().add_point(0, 0, &me)
        });
        assert!(matches!(result, Err(Aff4Error::InvalidArgument(_))));
    }

    #[test]
    fn mutual_maps_fail_instead_of_waiting_on_themselves() {
        let dir = tempfile::tempdir().unwrap();
        for policy in [MapReadPolicy::FailFast, MapReadPolicy::BestEffort] {
            let r = resolver(policy);
            let path = dir.path().join(format!("{policy:?}.aff4"));
            let volume = r.create_volume(&path).unwrap();
            let a = r.create_map(volume.urn(), None).unwrap();
            let b = r.create_map(volume.urn(), None).unwrap();
            with_map(&r, a.urn(), |m| m.add_range(0, 0, 64, b.urn()));
            with_map(&r, b.urn(), |m| m.add_range(0, 0, 64, a.urn()));

            let mut buf = vec![0xFFu8; 64];
            let result = r.read_stream_at(a.urn(), 0, &mut buf);
            match policy {
                MapReadPolicy::FailFast => {
                    assert!(matches!(result, Err(Aff4Error::CorruptArchive(_))), "{result:?}")
                }
                MapReadPolicy::BestEffort => {
                    assert_eq!(result.unwrap(), 64);
                    assert!(buf.iter().all(|&x| x == 0));
                }
            }
            // The chain unwinds, so unrelated reads still work afterwards.
            assert_eq!(r.stream_size(b.urn()).unwrap(), 64);
            r.close(&volume).unwrap();
        }
    }

    #[test]
    fn block_size_must_fit_the_stored_attribute() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(MapReadPolicy::FailFast);
        let volume = r.create_volume(&dir.path().join("v.aff4")).unwrap();
        let map = r.create_map(volume.urn(), None).unwrap();
        let result = r.with_object(map.urn(), OpenMode::Write, |object| {
            object.as_map_mut().unwrap().set_block_size(1 << 32)
        });
        assert!(matches!(result, Err(Aff4Error::InvalidArgument(_))));
        let data = target_file(dir.path(), "data.raw", 1, 64);
        with_map(&r, map.urn(), |m| {
            m.set_block_size(i32::MAX as u64)?;
            m.add_range(0, 0, 64, &data)
        });

        r.close(&map).unwrap();
        assert_eq!(
            r.store().resolve(map.urn(), BLOCKSIZE).unwrap(),
            Value::from(i32::MAX)
        );
    }

    #[test]
    fn stored_maps_reload_in_every_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let data = target_file(dir.path(), "data.raw", 7, 64 * 1024);
        let path = dir.path().join("maps.aff4");
        let mut maps = Vec::new();
        {
            let r = resolver(MapReadPolicy::FailFast);
            let volume = r.create_volume(&path).unwrap();
            for points in [1u64, 5, 40] {
                let map = r.create_map(volume.urn(), None).unwrap();
                with_map(&r, map.urn(), |m| {
                    m.set_block_size(512)?;
                    // Reverse order so no point continues its predecessor.
                    for i in 0..points {
                        m.add_range(i * 1024, (points - 1 - i) * 1024, 1024, &data)?;
                    }
                    Ok(())
                });
                maps.push((map.urn().clone(), points));
            }
            r.close(&volume).unwrap();
        }

        let r = resolver(MapReadPolicy::FailFast);
        r.open_volume(&path, OpenMode::Read).unwrap();
        for (urn, points) in maps {
            let encoding = r.store().resolve_string(&urn, MAP_ENCODING).unwrap();
            let expected = MapEncoding::for_point_count(points as usize).name();
            assert_eq!(encoding, expected);
            assert_eq!(r.stream_size(&urn).unwrap(), points * 1024);
            let mut buf = vec![0u8; 1024];
            assert_eq!(r.read_stream_at(&urn, (points - 1) * 1024, &mut buf).unwrap(), 1024);
            assert!(buf.iter().all(|&x| x == 7));
            let loaded = r
                .with_object(&urn, OpenMode::Read, |o| Ok(o.as_map_mut().unwrap().table().len()))
                .unwrap();
            assert_eq!(loaded, points as usize);
        }
    }

    #[test]
    fn periodic_map_stripes_two_targets() {
        let dir = tempfile::tempdir().unwrap();
        let disk0: Vec<u8> = (0..4096u32).map(|i| (i / 64) as u8).collect();
        let disk1: Vec<u8> = (0..4096u32).map(|i| 128 + (i / 64) as u8).collect();
        std::fs::write(dir.path().join("d0"), &disk0).unwrap();
        std::fs::write(dir.path().join("d1"), &disk1).unwrap();
        let d0 = Urn::from_path(&dir.path().join("d0"));
        let d1 = Urn::from_path(&dir.path().join("d1"));

        let r = resolver(MapReadPolicy::FailFast);
        let volume = r.create_volume(&dir.path().join("raid.aff4")).unwrap();
        let map = r.create_map(volume.urn(), None).unwrap();
        with_map(&r, map.urn(), |m| {
            m.add_point(0, 0, &d0)?;
            m.add_point(64, 0, &d1)?;
            m.set_period(Some(128), 64)?;
            m.set_size(8192)
        });

        let mut logical = vec![0u8; 8192];
        assert_eq!(r.read_stream_at(map.urn(), 0, &mut logical).unwrap(), 8192);
        for stripe in 0..64usize {
            let at = stripe * 128;
            assert_eq!(&logical[at..at + 64], &disk0[stripe * 64..stripe * 64 + 64]);
            assert_eq!(&logical[at + 64..at + 128], &disk1[stripe * 64..stripe * 64 + 64]);
        }
    }

    #[test]
    fn reads_past_end_return_zero() {
        let dir = tempfile::tempdir().unwrap();
        let a = target_file(dir.path(), "a.raw", 1, 100);
        let r = resolver(MapReadPolicy::FailFast);
        let volume = r.create_volume(&dir.path().join("v.aff4")).unwrap();
        let map = r.create_map(volume.urn(), None).unwrap();
        with_map(&r, map.urn(), |m| m.add_range(0, 0, 100, &a));
        let mut buf = [0u8; 10];
        assert_eq!(r.read_stream_at(map.urn(), 100, &mut buf).unwrap(), 0);
        assert_eq!(r.read_stream_at(map.urn(), 95, &mut buf).unwrap(), 5);
    }
}
