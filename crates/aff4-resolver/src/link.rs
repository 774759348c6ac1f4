//! Links: a stream name standing for another stream.

use aff4_store::TripleStore;
use aff4_types::predicates::TARGET;
use aff4_types::Urn;

use crate::error::{Aff4Error, Aff4Result};
use crate::object::Stream;
use crate::resolver::Resolver;

/// Reads go to `aff4:target`; links cannot be written through.
#[derive(Debug)]
pub struct Link {
    urn: Urn,
    target: Urn,
    position: u64,
}

impl Link {
    pub(crate) fn open(resolver: &Resolver, urn: &Urn) -> Aff4Result<Self> {
        let target = resolver.store().resolve_urn(urn, TARGET)?;
        if target == *urn {
            return Err(Aff4Error::InvalidArgument(format!("link {urn} points at itself")));
        }
        Ok(Self {
            urn: urn.clone(),
            target,
            position: 0,
        })
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn target(&self) -> &Urn {
        &self.target
    }
}

impl Stream for Link {
    fn size(&self, resolver: &Resolver) -> Aff4Result<u64> {
        resolver.stream_size(&self.target)
    }

    fn read_at(&mut self, resolver: &Resolver, offset: u64, buf: &mut [u8]) -> Aff4Result<usize> {
        resolver.read_stream_at(&self.target, offset, buf)
    }

    fn write(&mut self, _: &Resolver, _: &[u8]) -> Aff4Result<usize> {
        Err(Aff4Error::InvalidArgument(format!("link {} is read-only", self.urn)))
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) {
        self.position = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MapReadPolicy, ResolverConfig};
    use crate::object::OpenMode;

    #[test]
    fn link_reads_through_to_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.aff4");
        let name = Urn::from("aff4://evidence/disk0");
        let image_urn = {
            let r = Resolver::new(ResolverConfig {
                lock_files: false,
                ..ResolverConfig::default()
            });
            let volume = r.create_volume(&path).unwrap();
            let image = r.create_image(volume.urn(), None).unwrap();
            r.write_stream(image.urn(), b"through the link").unwrap();
            let link = r.create_link(volume.urn(), &name, image.urn()).unwrap();
            assert!(matches!(
                r.write_stream(link.urn(), b"x"),
                Err(Aff4Error::InvalidArgument(_))
            ));
            let urn = image.urn().clone();
            r.close_all().unwrap();
            urn
        };

        let r = Resolver::default();
        r.open_volume(&path, OpenMode::Read).unwrap();
        assert_eq!(r.store().resolve_urn(&name, TARGET).unwrap(), image_urn);
        assert_eq!(r.stream_size(&name).unwrap(), 16);
        let mut buf = [0u8; 16];
        r.read_stream_at(&name, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"through the link");
    }

    #[test]
    fn link_and_map_pointing_at_each_other_fail() {
        let dir = tempfile::tempdir().unwrap();
        let r = Resolver::new(ResolverConfig {
            lock_files: false,
            map_read_policy: MapReadPolicy::FailFast,
            ..ResolverConfig::default()
        });
        let volume = r.create_volume(&dir.path().join("v.aff4")).unwrap();
        let map = r.create_map(volume.urn(), None).unwrap();
        let name = Urn::from("aff4://evidence/loop");
        r.create_link(volume.urn(), &name, map.urn()).unwrap();
        r.with_object(map.urn(), OpenMode::Write, |object| {
            object.as_map_mut().unwrap().add_range(0, 0, 16, &name)
        })
        .unwrap();

        let mut buf = [0u8; 16];
        assert!(matches!(
            r.read_stream_at(&name, 0, &mut buf),
            Err(Aff4Error::CorruptArchive(_))
        ));
        assert!(matches!(
            r.read_stream_at(map.urn(), 0, &mut buf),
            Err(Aff4Error::CorruptArchive(_))
        ));
    }

    #[test]
    fn links_to_each_other_fail() {
        let dir = tempfile::tempdir().unwrap();
        let r = Resolver::new(ResolverConfig {
            lock_files: false,
            ..ResolverConfig::default()
        });
        let volume = r.create_volume(&dir.path().join("v.aff4")).unwrap();
        let (a, b) = (Urn::from("aff4://link/a"), Urn::from("aff4://link/b"));
        r.create_link(volume.urn(), &a, &b).unwrap();
        r.create_link(volume.urn(), &b, &a).unwrap();
        assert!(matches!(r.stream_size(&a), Err(Aff4Error::CorruptArchive(_))));
        let mut buf = [0u8; 4];
        assert!(matches!(
            r.read_stream_at(&b, 0, &mut buf),
            Err(Aff4Error::CorruptArchive(_))
        ));
    }

    #[test]
    fn self_link_rejected() {
        let r = Resolver::default();
        let urn = Urn::from("aff4://loop");
        r.set(&urn, TARGET, &urn).unwrap();
        assert!(Link::open(&r, &urn).is_err());
    }
}
